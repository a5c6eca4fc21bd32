//! Named, parameterised reads and the entity keys each one depends on.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::cache::{EntityKey, EntityKind};
use crate::command::CommandCall;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct QueryKey {
    pub name: String,
    pub params: BTreeMap<String, String>,
}

impl QueryKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.insert(key.into(), value.to_string());
        self
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if self.params.is_empty() {
            return Ok(());
        }
        f.write_str("{")?;
        for (idx, (key, value)) in self.params.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            write!(f, "{key}={value}")?;
        }
        f.write_str("}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dependency {
    /// One exact entity.
    Entity(EntityKey),
    /// Every entity of a kind.
    Kind(EntityKind),
}

impl Dependency {
    pub fn matches(&self, key: &EntityKey) -> bool {
        match self {
            Dependency::Entity(own) => own == key,
            Dependency::Kind(kind) => *kind == key.kind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryShape {
    Single(EntityKind),
    List(EntityKind),
    /// Infinite-scroll list fetched `page_size` rows at a time.
    Paged { kind: EntityKind, page_size: usize },
}

impl QueryShape {
    pub fn kind(&self) -> EntityKind {
        match self {
            QueryShape::Single(kind) | QueryShape::List(kind) => *kind,
            QueryShape::Paged { kind, .. } => *kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    pub key: QueryKey,
    pub command: CommandCall,
    pub shape: QueryShape,
    pub dependencies: Vec<Dependency>,
}

impl QuerySpec {
    pub fn new(key: QueryKey, command: CommandCall, shape: QueryShape) -> Self {
        Self {
            key,
            command,
            shape,
            dependencies: Vec::new(),
        }
    }

    pub fn depends_on(mut self, dependency: Dependency) -> Self {
        if !self.dependencies.contains(&dependency) {
            self.dependencies.push(dependency);
        }
        self
    }

    pub fn depends_on_key(&self, key: &EntityKey) -> bool {
        self.dependencies.iter().any(|dep| dep.matches(key))
    }
}

/// Household detail embeds its people and their contacts.
pub fn household_detail(id: i64) -> QuerySpec {
    QuerySpec::new(
        QueryKey::new("household.detail").param("id", id),
        CommandCall::new("get_household").arg("id", id),
        QueryShape::Single(EntityKind::Household),
    )
    .depends_on(Dependency::Entity(EntityKey::new(EntityKind::Household, id)))
    .depends_on(Dependency::Kind(EntityKind::Person))
    .depends_on(Dependency::Kind(EntityKind::Contact))
}

pub fn household_list() -> QuerySpec {
    QuerySpec::new(
        QueryKey::new("household.list"),
        CommandCall::new("list_households"),
        QueryShape::List(EntityKind::Household),
    )
    .depends_on(Dependency::Kind(EntityKind::Household))
}

pub fn people_for_household(household_id: i64) -> QuerySpec {
    QuerySpec::new(
        QueryKey::new("person.list").param("household", household_id),
        CommandCall::new("list_people").arg("household_id", household_id),
        QueryShape::List(EntityKind::Person),
    )
    .depends_on(Dependency::Entity(EntityKey::new(
        EntityKind::Household,
        household_id,
    )))
    .depends_on(Dependency::Kind(EntityKind::Person))
}

pub fn contacts_for_person(person_id: i64) -> QuerySpec {
    QuerySpec::new(
        QueryKey::new("contact.list").param("person", person_id),
        CommandCall::new("list_contacts").arg("person_id", person_id),
        QueryShape::List(EntityKind::Contact),
    )
    .depends_on(Dependency::Entity(EntityKey::new(EntityKind::Person, person_id)))
    .depends_on(Dependency::Kind(EntityKind::Contact))
}

pub fn patient_detail(id: i64) -> QuerySpec {
    QuerySpec::new(
        QueryKey::new("patient.detail").param("id", id),
        CommandCall::new("get_patient").arg("id", id),
        QueryShape::Single(EntityKind::Patient),
    )
    .depends_on(Dependency::Entity(EntityKey::new(EntityKind::Patient, id)))
}

pub fn patients_for_household(household_id: i64) -> QuerySpec {
    QuerySpec::new(
        QueryKey::new("patient.list").param("household", household_id),
        CommandCall::new("list_patients").arg("householdId", household_id),
        QueryShape::List(EntityKind::Patient),
    )
    .depends_on(Dependency::Entity(EntityKey::new(
        EntityKind::Household,
        household_id,
    )))
    .depends_on(Dependency::Kind(EntityKind::Patient))
}

pub fn medical_record_detail(id: i64) -> QuerySpec {
    QuerySpec::new(
        QueryKey::new("medical_record.detail").param("id", id),
        CommandCall::new("get_medical_record").arg("recordId", id),
        QueryShape::Single(EntityKind::MedicalRecord),
    )
    .depends_on(Dependency::Entity(EntityKey::new(EntityKind::MedicalRecord, id)))
    .depends_on(Dependency::Kind(EntityKind::Attachment))
}

pub fn medical_records_for_patient(patient_id: i64, page_size: usize) -> QuerySpec {
    QuerySpec::new(
        QueryKey::new("medical_record.list").param("patient", patient_id),
        CommandCall::new("list_medical_records").arg("patientId", patient_id),
        QueryShape::Paged {
            kind: EntityKind::MedicalRecord,
            page_size,
        },
    )
    .depends_on(Dependency::Entity(EntityKey::new(EntityKind::Patient, patient_id)))
    .depends_on(Dependency::Kind(EntityKind::MedicalRecord))
}

pub fn attachments_for_record(record_id: i64, page_size: usize) -> QuerySpec {
    QuerySpec::new(
        QueryKey::new("attachment.list").param("record", record_id),
        CommandCall::new("list_medical_attachments").arg("recordId", record_id),
        QueryShape::Paged {
            kind: EntityKind::Attachment,
            page_size,
        },
    )
    .depends_on(Dependency::Entity(EntityKey::new(
        EntityKind::MedicalRecord,
        record_id,
    )))
    .depends_on(Dependency::Kind(EntityKind::Attachment))
}

pub fn appointments_for_patient(patient_id: i64) -> QuerySpec {
    QuerySpec::new(
        QueryKey::new("appointment.list").param("patient", patient_id),
        CommandCall::new("list_appointments").arg("patient_id", patient_id),
        QueryShape::List(EntityKind::Appointment),
    )
    .depends_on(Dependency::Kind(EntityKind::Appointment))
}

/// The single-entity query for `key`, for kinds that have one.
pub fn detail(key: EntityKey) -> Option<QuerySpec> {
    match key.kind {
        EntityKind::Household => Some(household_detail(key.id)),
        EntityKind::Patient => Some(patient_detail(key.id)),
        EntityKind::MedicalRecord => Some(medical_record_detail(key.id)),
        _ => None,
    }
}
