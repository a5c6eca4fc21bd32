#![allow(clippy::unwrap_used, clippy::expect_used)]

mod util;

use std::sync::Arc;

use serde_json::json;

use util::{seeded_store, GatedInvoker, Release};
use vetclinic_lib::cache::{CacheState, EntityKey, EntityKind};
use vetclinic_lib::config::{ClientConfig, MutationOrdering};
use vetclinic_lib::entities::{
    AttachmentUpload, ContactUpdate, Household, HouseholdUpdate, MedicalRecord,
};
use vetclinic_lib::error::{
    BACKEND_UNAVAILABLE, RUNTIME_PANIC, VALIDATION_EMPTY_UPDATE, VALIDATION_INVALID_VALUE,
};
use vetclinic_lib::mutation::MutationStatus;
use vetclinic_lib::ClinicClient;

const SMITH: i64 = 1;

fn household_key() -> EntityKey {
    EntityKey::new(EntityKind::Household, SMITH)
}

fn rename(name: &str) -> HouseholdUpdate {
    HouseholdUpdate {
        household_name: Some(name.to_string()),
        ..HouseholdUpdate::default()
    }
}

async fn client_with(ordering: MutationOrdering) -> (ClinicClient, Arc<GatedInvoker>) {
    let store = seeded_store().await;
    let invoker = GatedInvoker::new(Arc::new(store));
    let config = ClientConfig::default().with_ordering(ordering);
    let client = ClinicClient::new(config, invoker.clone());
    client.household(SMITH).await.expect("load household");
    (client, invoker)
}

fn cached_name(client: &ClinicClient) -> String {
    client
        .cached::<Household>(SMITH)
        .expect("decode")
        .expect("cached")
        .household_name
}

#[tokio::test]
async fn rename_is_visible_before_the_backend_answers_and_after_it_confirms() {
    let (client, invoker) = client_with(MutationOrdering::Concurrent).await;
    assert_eq!(cached_name(&client), "Smith");

    let gate = invoker.hold("update_household");
    let driver = async {
        invoker.wait_for_calls("update_household", 1).await;
        assert_eq!(cached_name(&client), "Smith-Jones");
        assert_eq!(
            client.cache().state(&household_key()),
            Some(CacheState::Speculative)
        );
        let pending = client.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].status, MutationStatus::InFlight);
        gate.forward();
    };
    let (result, ()) = tokio::join!(client.update_household(SMITH, rename("Smith-Jones")), driver);

    let household = result.expect("rename commits");
    assert_eq!(household.household_name, "Smith-Jones");
    assert_eq!(cached_name(&client), "Smith-Jones");
    assert_eq!(
        client.cache().state(&household_key()),
        Some(CacheState::Confirmed)
    );
    assert!(client.pending().is_empty());

    let sent = invoker.calls_to("update_household");
    assert_eq!(sent[0], json!({ "id": SMITH, "household_name": "Smith-Jones" }));
}

#[tokio::test]
async fn rejected_rename_restores_the_previous_value_and_returns_the_error() {
    let (client, invoker) = client_with(MutationOrdering::Concurrent).await;
    let before = client.cache().entry(&household_key()).expect("entry");

    let gate = invoker.hold("update_household");
    let driver = async {
        invoker.wait_for_calls("update_household", 1).await;
        assert_eq!(cached_name(&client), "X");
        gate.fail(BACKEND_UNAVAILABLE);
    };
    let (result, ()) = tokio::join!(client.update_household(SMITH, rename("X")), driver);

    let err = result.expect_err("backend refused");
    assert_eq!(err.code(), BACKEND_UNAVAILABLE);
    assert_eq!(
        err.context().get("key").map(String::as_str),
        Some("household:1")
    );
    assert_eq!(client.cache().entry(&household_key()), Some(before));
    assert_eq!(client.metrics().rollbacks, 1);
}

#[tokio::test]
async fn authoritative_response_wins_over_the_speculative_guess() {
    let (client, invoker) = client_with(MutationOrdering::Concurrent).await;

    let gate = invoker.hold("update_household");
    let driver = async {
        invoker.wait_for_calls("update_household", 1).await;
        gate.release(Release::Respond(Ok(json!({
            "household": { "id": SMITH, "household_name": "SMITH-JONES", "updated_at": 9_999_999_999_999_i64 }
        }))));
    };
    let (result, ()) = tokio::join!(client.update_household(SMITH, rename("Smith-Jones")), driver);

    assert_eq!(result.expect("commit").household_name, "SMITH-JONES");
    assert_eq!(cached_name(&client), "SMITH-JONES");
}

#[tokio::test]
async fn concurrent_mutations_on_one_key_settle_last_wins() {
    let (client, invoker) = client_with(MutationOrdering::Concurrent).await;

    let first = invoker.hold("update_household");
    let second = invoker.hold("update_household");
    let driver = async {
        invoker.wait_for_calls("update_household", 2).await;
        assert_eq!(cached_name(&client), "Second");
        second.forward();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        first.release(Release::Respond(Ok(json!({
            "household": { "id": SMITH, "household_name": "First" }
        }))));
    };
    let (a, b, ()) = tokio::join!(
        client.update_household(SMITH, rename("First")),
        client.update_household(SMITH, rename("Second")),
        driver
    );

    a.expect("first commits");
    b.expect("second commits");
    assert_eq!(cached_name(&client), "First");
}

#[tokio::test]
async fn per_key_serial_ordering_dispatches_one_mutation_at_a_time() {
    let (client, invoker) = client_with(MutationOrdering::PerKeySerial).await;

    let first = invoker.hold("update_household");
    let second = invoker.hold("update_household");
    let driver = async {
        invoker.wait_for_calls("update_household", 1).await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(invoker.calls_to("update_household").len(), 1);
        assert_eq!(cached_name(&client), "First");
        first.forward();

        invoker.wait_for_calls("update_household", 2).await;
        assert_eq!(cached_name(&client), "Second");
        second.forward();
    };
    let (a, b, ()) = tokio::join!(
        client.update_household(SMITH, rename("First")),
        client.update_household(SMITH, rename("Second")),
        driver
    );

    a.expect("first commits");
    b.expect("second commits");
    assert_eq!(cached_name(&client), "Second");
    assert!(client.coordinator().pending().is_empty());
}

#[tokio::test]
async fn failed_delete_puts_the_entity_back() {
    let (client, invoker) = client_with(MutationOrdering::Concurrent).await;
    let before = client.cache().entry(&household_key()).expect("entry");

    let gate = invoker.hold("delete_household");
    let driver = async {
        invoker.wait_for_calls("delete_household", 1).await;
        assert!(client.cache().get(&household_key()).is_none());
        gate.fail(BACKEND_UNAVAILABLE);
    };
    let (result, ()) = tokio::join!(client.delete_household(SMITH), driver);

    assert!(result.is_err());
    assert_eq!(client.cache().entry(&household_key()), Some(before));
}

#[tokio::test]
async fn successful_delete_keeps_the_entity_gone() {
    let (client, _invoker) = client_with(MutationOrdering::Concurrent).await;
    client.delete_household(SMITH).await.expect("delete");
    assert!(client.cache().get(&household_key()).is_none());
    assert!(client.household(SMITH).await.is_err());
}

#[tokio::test]
async fn create_lands_under_the_backend_assigned_key() {
    let (client, _invoker) = client_with(MutationOrdering::Concurrent).await;
    let created = client.create_household("  Murphy ").await.expect("create");
    assert_eq!(created.household_name, "Murphy");
    assert!(created.id > 2);

    let key = EntityKey::new(EntityKind::Household, created.id);
    assert_eq!(client.cache().state(&key), Some(CacheState::Confirmed));
}

#[tokio::test]
async fn failed_create_leaves_nothing_behind() {
    let (client, invoker) = client_with(MutationOrdering::Concurrent).await;
    let before = client.cache().len();

    let gate = invoker.hold("create_household");
    let driver = async {
        invoker.wait_for_calls("create_household", 1).await;
        gate.fail(BACKEND_UNAVAILABLE);
    };
    let (result, ()) = tokio::join!(client.create_household("Murphy"), driver);

    assert!(result.is_err());
    assert_eq!(client.cache().len(), before);
}

#[tokio::test]
async fn panicking_backend_rolls_back_and_reports_a_crash() {
    let (client, invoker) = client_with(MutationOrdering::Concurrent).await;

    let gate = invoker.hold("update_household");
    let driver = async {
        invoker.wait_for_calls("update_household", 1).await;
        gate.release(Release::Panic);
    };
    let (result, ()) = tokio::join!(client.update_household(SMITH, rename("Boom")), driver);

    let err = result.expect_err("panic is fenced");
    assert_eq!(err.code(), RUNTIME_PANIC);
    assert!(err.crash_id().is_some());
    assert_eq!(cached_name(&client), "Smith");
}

#[tokio::test]
async fn validation_failures_never_reach_the_backend() {
    let (client, invoker) = client_with(MutationOrdering::Concurrent).await;
    let calls_before = invoker.calls().len();

    let err = client
        .update_household(SMITH, HouseholdUpdate::default())
        .await
        .expect_err("empty update");
    assert_eq!(err.code(), VALIDATION_EMPTY_UPDATE);

    let err = client
        .update_contact(
            1,
            ContactUpdate {
                contact_type: Some("pager".into()),
                ..ContactUpdate::default()
            },
        )
        .await
        .expect_err("unknown contact type");
    assert_eq!(err.code(), VALIDATION_INVALID_VALUE);

    let err = client
        .upload_attachment(AttachmentUpload {
            medical_record_id: 1,
            original_name: " ".into(),
            file_size: 1,
            mime_type: None,
        })
        .await
        .expect_err("blank file name");
    assert!(err.is_validation());

    assert_eq!(invoker.calls().len(), calls_before);
    assert_eq!(client.metrics().speculative_applies, 0);
}

#[tokio::test]
async fn archive_acknowledgement_confirms_the_speculative_flag() {
    let (client, _invoker) = client_with(MutationOrdering::Concurrent).await;
    let record: MedicalRecord = client.medical_record(1).await.expect("record");
    assert!(!record.is_archived);

    let archived = client
        .archive_medical_record(1, true)
        .await
        .expect("archive");
    assert!(archived.is_archived);
    assert_eq!(
        client
            .cache()
            .state(&EntityKey::new(EntityKind::MedicalRecord, 1)),
        Some(CacheState::Confirmed)
    );
}

#[tokio::test]
async fn updates_to_uncached_entities_start_from_schema_defaults() {
    let store = seeded_store().await;
    let invoker = GatedInvoker::new(Arc::new(store));
    let client = ClinicClient::new(ClientConfig::default(), invoker.clone());

    let gate = invoker.hold("update_household");
    let driver = async {
        invoker.wait_for_calls("update_household", 1).await;
        let speculative = client
            .cached::<Household>(2)
            .expect("decode")
            .expect("speculative entry");
        assert_eq!(speculative.household_name, "Renamed");
        assert_eq!(speculative.city, "");
        assert_eq!(speculative.pet_count, 0);
        gate.forward();
    };
    let (result, ()) = tokio::join!(client.update_household(2, rename("Renamed")), driver);
    assert_eq!(result.expect("commit").id, 2);
}

#[tokio::test]
async fn acknowledged_archive_of_an_uncached_record_returns_the_stored_row() {
    let store = seeded_store().await;
    let invoker = GatedInvoker::new(Arc::new(store));
    let client = ClinicClient::new(ClientConfig::default(), invoker.clone());
    let key = EntityKey::new(EntityKind::MedicalRecord, 1);

    let gate = invoker.hold("archive_medical_record");
    let driver = async {
        invoker.wait_for_calls("archive_medical_record", 1).await;
        assert_eq!(client.cache().state(&key), Some(CacheState::Speculative));
        gate.forward();
    };
    let (result, ()) = tokio::join!(client.archive_medical_record(1, true), driver);

    let record = result.expect("archive");
    assert_eq!(record.name, "Vaccination");
    assert_eq!(record.patient_id, 1);
    assert!(record.is_archived);
    assert!(record.updated_at > 0);

    let entry = client.cache().entry(&key).expect("fetched entry");
    assert_eq!(entry.state, CacheState::Confirmed);
    assert_eq!(entry.record.text("name"), "Vaccination");
    assert_eq!(invoker.calls_to("get_medical_record").len(), 1);
}

#[tokio::test]
async fn rollbacks_on_one_key_restore_each_snapshot_in_settle_order() {
    let (client, invoker) = client_with(MutationOrdering::Concurrent).await;

    let first = invoker.hold("update_household");
    let second = invoker.hold("update_household");
    let driver = async {
        invoker.wait_for_calls("update_household", 2).await;
        assert_eq!(cached_name(&client), "Second");

        // The second mutation's snapshot is the first one's guess.
        second.fail(BACKEND_UNAVAILABLE);
        while client.pending().len() > 1 {
            tokio::task::yield_now().await;
        }
        assert_eq!(cached_name(&client), "First");
        assert_eq!(
            client.cache().state(&household_key()),
            Some(CacheState::Speculative)
        );

        first.fail(BACKEND_UNAVAILABLE);
    };
    let (a, b, ()) = tokio::join!(
        client.update_household(SMITH, rename("First")),
        client.update_household(SMITH, rename("Second")),
        driver
    );

    assert!(a.is_err());
    assert!(b.is_err());
    assert_eq!(cached_name(&client), "Smith");
    assert_eq!(
        client.cache().state(&household_key()),
        Some(CacheState::Confirmed)
    );
    assert_eq!(client.metrics().rollbacks, 2);
}
