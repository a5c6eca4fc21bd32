//! Application-facing facade over the cache, router and coordinator.
//!
//! A [`ClinicClient`] is created once at startup and torn down with [`ClinicClient::clear`]
//! on logout. Each adapter validates its input, builds the mutation in canonical field
//! names, lets the transform layer rename it for the wire, and hands it to the
//! coordinator. Call sites never see backend naming.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;

use crate::active_household::{self, StoreHandle};
use crate::cache::{CacheState, EntityCache, EntityKey, EntityKind, EntityRecord};
use crate::command::{CommandCall, CommandInvoker};
use crate::config::ClientConfig;
use crate::coordinator::MutationCoordinator;
use crate::entities::{
    Appointment, AppointmentDraft, AppointmentUpdate, Attachment, AttachmentUpload, Contact,
    ContactUpdate, Entity, Household, HouseholdUpdate, MedicalRecord, MedicalRecordDraft,
    MedicalRecordUpdate, Patient, PatientDraft, PatientUpdate, Person, PersonUpdate,
};
use crate::error::BACKEND_NOT_FOUND;
use crate::metrics::{CacheMetrics, MetricsSnapshot};
use crate::mutation::{Mutation, PendingMutation};
use crate::queries::{self, QueryKey, QuerySpec};
use crate::router::{InvalidationRouter, QuerySubscription};
use crate::transform::{normalize, to_wire};
use crate::validation;
use crate::{AppError, AppResult};

/// One loaded window of an infinite-scroll list.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: Option<i64>,
    pub has_more: bool,
}

pub struct ClinicClient {
    config: ClientConfig,
    invoker: Arc<dyn CommandInvoker>,
    metrics: Arc<CacheMetrics>,
    cache: Arc<EntityCache>,
    router: InvalidationRouter,
    coordinator: MutationCoordinator,
    active: StoreHandle,
}

fn canonical_object<T: Serialize>(value: &T) -> AppResult<Map<String, Value>> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        _ => Ok(Map::new()),
    }
}

fn command_with(name: &str, kind: EntityKind, delta: &Map<String, Value>) -> CommandCall {
    let mut call = CommandCall::new(name);
    call.args.extend(to_wire(kind, delta));
    call
}

fn settled_record(key: EntityKey, record: Option<EntityRecord>) -> AppResult<EntityRecord> {
    record.ok_or_else(|| {
        AppError::new(BACKEND_NOT_FOUND, "Mutation settled without an entity")
            .with_context("key", key.to_string())
    })
}

impl ClinicClient {
    pub fn new(config: ClientConfig, invoker: Arc<dyn CommandInvoker>) -> Self {
        Self::with_active_store(config, invoker, StoreHandle::in_memory())
    }

    pub fn with_active_store(
        config: ClientConfig,
        invoker: Arc<dyn CommandInvoker>,
        active: StoreHandle,
    ) -> Self {
        let metrics = Arc::new(CacheMetrics::new());
        let cache = Arc::new(EntityCache::new(metrics.clone()));
        let router = InvalidationRouter::new(cache.clone(), invoker.clone(), metrics.clone());
        let coordinator = MutationCoordinator::new(
            cache.clone(),
            invoker.clone(),
            router.clone(),
            metrics.clone(),
            config.ordering,
        );
        info!(
            target: "vetclinic",
            event = "client_started",
            ordering = %config.ordering,
            page_size = config.page_size
        );
        Self {
            config,
            invoker,
            metrics,
            cache,
            router,
            coordinator,
            active,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn cache(&self) -> &EntityCache {
        &self.cache
    }

    pub fn router(&self) -> &InvalidationRouter {
        &self.router
    }

    pub fn coordinator(&self) -> &MutationCoordinator {
        &self.coordinator
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn pending(&self) -> Vec<PendingMutation> {
        self.coordinator.pending()
    }

    /// Drop every subscription and cached entity. Used on logout and test teardown.
    pub fn clear(&self) {
        self.router.clear();
        self.cache.clear();
        info!(target: "vetclinic", event = "client_cleared");
    }

    /// Typed read of whatever the cache currently holds, speculative values included.
    pub fn cached<E: Entity>(&self, id: i64) -> AppResult<Option<E>> {
        self.cache
            .get(&EntityKey::new(E::KIND, id))
            .map(|record| E::from_record(&record))
            .transpose()
    }

    /// Register a query and keep it fresh: invalidations refetch it in the background
    /// until [`ClinicClient::unwatch`] is called.
    pub fn watch(&self, spec: QuerySpec) -> AppResult<QueryKey> {
        let key = self.router.register(spec);
        self.router.observe(&key)?;
        Ok(key)
    }

    pub fn unwatch(&self, key: &QueryKey) {
        self.router.unobserve(key);
    }

    async fn load_one<E: Entity>(&self, spec: QuerySpec, id: i64) -> AppResult<E> {
        let key = self.router.register(spec);
        self.router.fetch(&key).await?;
        let entity_key = EntityKey::new(E::KIND, id);
        let record = self.cache.get(&entity_key).ok_or_else(|| {
            AppError::new(BACKEND_NOT_FOUND, "Entity not found")
                .with_context("key", entity_key.to_string())
        })?;
        E::from_record(&record)
    }

    fn decode_all<E: Entity>(&self, sub: &QuerySubscription) -> AppResult<Vec<E>> {
        sub.entity_keys()
            .iter()
            .filter_map(|key| self.cache.get(key))
            .map(|record| E::from_record(&record))
            .collect()
    }

    async fn load_list<E: Entity>(&self, spec: QuerySpec) -> AppResult<Vec<E>> {
        let key = self.router.register(spec);
        let sub = self.router.fetch(&key).await?;
        self.decode_all(&sub)
    }

    async fn load_page<E: Entity>(&self, spec: QuerySpec, more: bool) -> AppResult<Page<E>> {
        let key = self.router.register(spec);
        let loaded = self.router.subscription(&key).map_or(0, |sub| sub.pages_loaded);
        let sub = if more && loaded > 0 {
            self.router.fetch_next_page(&key).await?
        } else {
            self.router.fetch(&key).await?
        };
        Ok(Page {
            items: self.decode_all(&sub)?,
            total: sub.total,
            has_more: sub.has_more,
        })
    }

    pub async fn household(&self, id: i64) -> AppResult<Household> {
        self.load_one(queries::household_detail(id), id).await
    }

    pub async fn households(&self) -> AppResult<Vec<Household>> {
        self.load_list(queries::household_list()).await
    }

    pub async fn people(&self, household_id: i64) -> AppResult<Vec<Person>> {
        self.load_list(queries::people_for_household(household_id))
            .await
    }

    pub async fn contacts(&self, person_id: i64) -> AppResult<Vec<Contact>> {
        self.load_list(queries::contacts_for_person(person_id)).await
    }

    pub async fn patient(&self, id: i64) -> AppResult<Patient> {
        self.load_one(queries::patient_detail(id), id).await
    }

    pub async fn patients(&self, household_id: i64) -> AppResult<Vec<Patient>> {
        self.load_list(queries::patients_for_household(household_id))
            .await
    }

    pub async fn medical_record(&self, id: i64) -> AppResult<MedicalRecord> {
        self.load_one(queries::medical_record_detail(id), id).await
    }

    /// First page of a patient's records, or the already loaded window when `more` is
    /// false and a fetch has happened before.
    pub async fn medical_records(&self, patient_id: i64, more: bool) -> AppResult<Page<MedicalRecord>> {
        let spec = queries::medical_records_for_patient(patient_id, self.config.page_size);
        self.load_page(spec, more).await
    }

    pub async fn attachments(&self, record_id: i64, more: bool) -> AppResult<Page<Attachment>> {
        let spec = queries::attachments_for_record(record_id, self.config.page_size);
        self.load_page(spec, more).await
    }

    pub async fn appointments(&self, patient_id: i64) -> AppResult<Vec<Appointment>> {
        self.load_list(queries::appointments_for_patient(patient_id))
            .await
    }

    async fn update<E: Entity, U: Serialize>(
        &self,
        id: i64,
        update: &U,
        command: &str,
    ) -> AppResult<E> {
        let delta = canonical_object(update)?;
        let call = command_with(command, E::KIND, &delta).arg("id", id);
        let record = self
            .coordinator
            .execute(Mutation::update(E::KIND, id, delta, call))
            .await?;
        self.settled(id, record).await
    }

    /// Decode a settled record, or fetch the entity when the backend only acknowledged.
    async fn settled<E: Entity>(&self, id: i64, record: Option<EntityRecord>) -> AppResult<E> {
        if let Some(record) = record {
            return E::from_record(&record);
        }
        let key = EntityKey::new(E::KIND, id);
        match queries::detail(key) {
            Some(spec) => self.load_one(spec, id).await,
            None => E::from_record(&settled_record(key, None)?),
        }
    }

    async fn create<E: Entity, D: Serialize>(&self, draft: &D, command: &str) -> AppResult<E> {
        let draft = canonical_object(draft)?;
        let call = command_with(command, E::KIND, &draft);
        let record = self
            .coordinator
            .execute(Mutation::create(E::KIND, draft, call))
            .await?
            .ok_or_else(|| {
                AppError::new(BACKEND_NOT_FOUND, "Backend returned no entity")
                    .with_context("command", command.to_string())
            })?;
        E::from_record(&record)
    }

    pub async fn create_household(&self, name: &str) -> AppResult<Household> {
        validation::household_name(name)?;
        let draft = HouseholdUpdate {
            household_name: Some(name.trim().to_string()),
            ..HouseholdUpdate::default()
        };
        self.create(&draft, "create_household").await
    }

    pub async fn update_household(&self, id: i64, mut update: HouseholdUpdate) -> AppResult<Household> {
        validation::household_update(&update)?;
        if let Some(name) = update.household_name.as_mut() {
            *name = name.trim().to_string();
        }
        self.update(id, &update, "update_household").await
    }

    pub async fn delete_household(&self, id: i64) -> AppResult<()> {
        let call = CommandCall::new("delete_household").arg("id", id);
        self.coordinator
            .execute(Mutation::delete(EntityKind::Household, id, call))
            .await?;
        Ok(())
    }

    pub async fn update_person(&self, id: i64, update: PersonUpdate) -> AppResult<Person> {
        validation::person_update(&update)?;
        self.update(id, &update, "update_person").await
    }

    pub async fn update_contact(&self, id: i64, update: ContactUpdate) -> AppResult<Contact> {
        let current_type = self
            .cache
            .get(&EntityKey::new(EntityKind::Contact, id))
            .map(|record| record.text("contactType").to_string())
            .unwrap_or_default();
        validation::contact_update(&update, &current_type)?;
        self.update(id, &update, "update_contact").await
    }

    pub async fn create_patient(&self, draft: PatientDraft) -> AppResult<Patient> {
        validation::patient_draft(&draft)?;
        self.create(&draft, "create_patient").await
    }

    pub async fn update_patient(&self, id: i64, update: PatientUpdate) -> AppResult<Patient> {
        validation::patient_update(&update)?;
        self.update(id, &update, "update_patient").await
    }

    pub async fn create_medical_record(&self, draft: MedicalRecordDraft) -> AppResult<MedicalRecord> {
        validation::medical_record_draft(&draft)?;
        self.create(&draft, "create_medical_record").await
    }

    pub async fn update_medical_record(
        &self,
        id: i64,
        update: MedicalRecordUpdate,
    ) -> AppResult<MedicalRecord> {
        validation::medical_record_update(&update)?;
        self.update(id, &update, "update_medical_record").await
    }

    /// The archive command answers with unit; the settled record is read back afterwards.
    pub async fn archive_medical_record(&self, id: i64, archive: bool) -> AppResult<MedicalRecord> {
        let mut delta = Map::new();
        delta.insert("isArchived".into(), Value::Bool(archive));
        let call = CommandCall::new("archive_medical_record")
            .arg("recordId", id)
            .arg("archive", archive);
        let record = self
            .coordinator
            .execute(Mutation::update(EntityKind::MedicalRecord, id, delta, call))
            .await?;
        self.settled(id, record).await
    }

    /// Undo the record's latest change. Only the backend knows the restored values, so
    /// nothing new is guessed locally and the record it returns is what gets confirmed.
    pub async fn revert_medical_record(&self, id: i64) -> AppResult<MedicalRecord> {
        let call = CommandCall::new("revert_medical_record").arg("recordId", id);
        let record = self
            .coordinator
            .execute(Mutation::update(EntityKind::MedicalRecord, id, Map::new(), call))
            .await?;
        self.settled(id, record).await
    }

    /// A record as it stood at `version`. Past versions are read straight from the
    /// backend and never enter the cache.
    pub async fn medical_record_at_version(&self, id: i64, version: i64) -> AppResult<MedicalRecord> {
        let call = CommandCall::new("get_medical_record_at_version")
            .arg("recordId", id)
            .arg("version", version);
        let response = self.invoker.invoke(&call.name, call.args_value()).await?;
        MedicalRecord::from_record(&normalize(EntityKind::MedicalRecord, &response))
    }

    pub async fn upload_attachment(&self, upload: AttachmentUpload) -> AppResult<Attachment> {
        validation::attachment_upload(&upload)?;
        self.create(&upload, "upload_medical_attachment").await
    }

    pub async fn delete_attachment(&self, id: i64) -> AppResult<()> {
        let call = CommandCall::new("delete_medical_attachment").arg("id", id);
        self.coordinator
            .execute(Mutation::delete(EntityKind::Attachment, id, call))
            .await?;
        Ok(())
    }

    pub async fn update_appointment(
        &self,
        id: i64,
        update: AppointmentUpdate,
    ) -> AppResult<Appointment> {
        let current = self
            .cache
            .get(&EntityKey::new(EntityKind::Appointment, id))
            .map(|record| (record.integer("startTime"), record.integer("endTime")))
            .unwrap_or((0, 0));
        validation::appointment_update(&update, current)?;
        self.update(id, &update, "update_appointment").await
    }

    pub async fn create_appointment(&self, draft: AppointmentDraft) -> AppResult<Appointment> {
        validation::appointment_draft(&draft)?;
        self.create(&draft, "create_appointment").await
    }

    pub async fn delete_appointment(&self, id: i64) -> AppResult<()> {
        let call = CommandCall::new("delete_appointment").arg("id", id);
        self.coordinator
            .execute(Mutation::delete(EntityKind::Appointment, id, call))
            .await?;
        Ok(())
    }

    pub async fn reschedule_appointment(
        &self,
        id: i64,
        start_time: i64,
        end_time: i64,
    ) -> AppResult<Appointment> {
        self.update_appointment(
            id,
            AppointmentUpdate {
                start_time: Some(start_time),
                end_time: Some(end_time),
                ..AppointmentUpdate::default()
            },
        )
        .await
    }

    pub async fn active_household(&self) -> AppResult<Option<i64>> {
        active_household::get_active_household_id(self.invoker.as_ref(), &self.active).await
    }

    /// Select another household. Entities and queries scoped to the previous household
    /// are dropped; unconfirmed local values are kept until they settle.
    pub async fn switch_household(&self, id: i64) -> AppResult<()> {
        let previous = self.active.snapshot();
        active_household::set_active_household_id(self.invoker.as_ref(), &self.active, id).await?;
        if previous == Some(id) {
            return Ok(());
        }

        let scoped: Vec<QueryKey> = self
            .router
            .subscriptions()
            .into_iter()
            .filter(|sub| sub.kind() != EntityKind::Household)
            .map(|sub| sub.key().clone())
            .collect();
        for key in &scoped {
            self.router.unregister(key);
        }
        let evicted = self.cache.evict_where(|key, entry| {
            key.kind != EntityKind::Household && entry.state != CacheState::Speculative
        });
        info!(
            target: "vetclinic",
            event = "active_household_switched",
            from = ?previous,
            to = id,
            evicted,
            queries = scoped.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn commands_carry_wire_names() {
        let mut delta = Map::new();
        delta.insert("householdName".into(), json!("Doe"));
        let call = command_with("update_household", EntityKind::Household, &delta).arg("id", 4);
        assert_eq!(
            call.args_value(),
            json!({ "household_name": "Doe", "id": 4 })
        );

        let upload = AttachmentUpload {
            medical_record_id: 2,
            original_name: "xray.png".into(),
            file_size: 10,
            mime_type: None,
        };
        let draft = canonical_object(&upload).expect("draft");
        let call = command_with("upload_medical_attachment", EntityKind::Attachment, &draft);
        assert_eq!(
            call.args_value(),
            json!({ "medicalRecordId": 2, "fileName": "xray.png", "fileSize": 10 })
        );

        let booking = AppointmentDraft {
            patient_id: 3,
            title: "Booster".into(),
            start_time: 1_000,
            end_time: 2_000,
            ..AppointmentDraft::default()
        };
        let draft = canonical_object(&booking).expect("draft");
        let call = command_with("create_appointment", EntityKind::Appointment, &draft);
        assert_eq!(
            call.args_value(),
            json!({ "patient_id": 3, "title": "Booster", "start_time": 1_000, "end_time": 2_000 })
        );
    }
}
