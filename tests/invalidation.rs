#![allow(clippy::unwrap_used, clippy::expect_used)]

mod util;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use util::{seeded_store, GatedInvoker, Release};
use vetclinic_lib::cache::{CacheState, EntityKey, EntityKind};
use vetclinic_lib::config::ClientConfig;
use vetclinic_lib::entities::{Household, HouseholdUpdate};
use vetclinic_lib::error::{
    BACKEND_NOT_FOUND, BACKEND_UNAVAILABLE, CACHE_NOT_PAGED, CACHE_UNKNOWN_QUERY,
};
use vetclinic_lib::queries::{self, QueryKey};
use vetclinic_lib::router::SubscriptionState;
use vetclinic_lib::store::SqliteCommandLayer;
use vetclinic_lib::ClinicClient;

struct Harness {
    store: SqliteCommandLayer,
    invoker: Arc<GatedInvoker>,
    client: ClinicClient,
}

async fn harness_with(config: ClientConfig) -> Harness {
    let store = seeded_store().await;
    let invoker = GatedInvoker::new(Arc::new(store.clone()));
    let client = ClinicClient::new(config, invoker.clone());
    Harness {
        store,
        invoker,
        client,
    }
}

async fn harness() -> Harness {
    harness_with(ClientConfig::default()).await
}

fn any_household() -> EntityKey {
    EntityKey::new(EntityKind::Household, 99)
}

impl Harness {
    fn state(&self, key: &QueryKey) -> SubscriptionState {
        self.client
            .router()
            .subscription(key)
            .expect("registered")
            .state
    }

    fn data(&self, key: &QueryKey) -> Vec<i64> {
        self.client
            .router()
            .subscription(key)
            .expect("registered")
            .data
    }

    async fn add_household(&self, name: &str) -> i64 {
        self.store
            .seed("households", json!({ "household_name": name }))
            .await
            .expect("seed household")
    }
}

#[tokio::test]
async fn observed_query_refetches_after_invalidation() {
    let h = harness().await;
    let key = h.client.watch(queries::household_list()).expect("watch");
    h.client.router().wait_idle().await;
    assert_eq!(h.state(&key), SubscriptionState::Fresh);
    assert_eq!(h.data(&key), vec![2, 1]);

    let added = h.add_household("Adams").await;
    let touched = h.client.router().invalidate(&any_household());
    assert_eq!(touched, vec![key.clone()]);
    h.client.router().wait_idle().await;

    assert_eq!(h.state(&key), SubscriptionState::Fresh);
    assert_eq!(h.data(&key), vec![added, 2, 1]);
    assert_eq!(h.invoker.calls_to("list_households").len(), 2);
}

#[tokio::test]
async fn repeated_invalidation_ends_in_the_same_state_as_one() {
    let once = harness().await;
    let once_key = once.client.watch(queries::household_list()).expect("watch");
    once.client.router().wait_idle().await;
    once.add_household("Adams").await;
    once.client.router().invalidate(&any_household());
    once.client.router().wait_idle().await;

    let many = harness().await;
    let many_key = many.client.watch(queries::household_list()).expect("watch");
    many.client.router().wait_idle().await;
    many.add_household("Adams").await;
    for _ in 0..3 {
        many.client.router().invalidate(&any_household());
    }
    many.client.router().wait_idle().await;

    assert_eq!(once.data(&once_key), many.data(&many_key));
    assert_eq!(many.state(&many_key), SubscriptionState::Fresh);
    assert_eq!(many.invoker.calls_to("list_households").len(), 2);
    let names: Vec<String> = many
        .data(&many_key)
        .into_iter()
        .map(|id| {
            many.client
                .cached::<Household>(id)
                .expect("decode")
                .expect("cached")
                .household_name
        })
        .collect();
    assert_eq!(names, ["Adams", "Doe", "Smith"]);
}

#[tokio::test]
async fn unobserved_query_waits_for_the_next_observer() {
    let h = harness().await;
    h.client.households().await.expect("load list");
    let key = queries::household_list().key;
    assert_eq!(h.state(&key), SubscriptionState::Fresh);

    h.client.router().invalidate(&any_household());
    h.client.router().wait_idle().await;
    assert_eq!(h.state(&key), SubscriptionState::Stale);
    assert_eq!(h.invoker.calls_to("list_households").len(), 1);

    h.client.router().observe(&key).expect("observe");
    h.client.router().wait_idle().await;
    assert_eq!(h.state(&key), SubscriptionState::Fresh);
    assert_eq!(h.invoker.calls_to("list_households").len(), 2);
}

#[tokio::test]
async fn invalidation_during_a_refetch_queues_exactly_one_more() {
    let h = harness().await;
    let key = h.client.watch(queries::household_list()).expect("watch");
    h.client.router().wait_idle().await;

    let gate = h.invoker.hold("list_households");
    h.client.router().invalidate(&any_household());
    h.invoker.wait_for_calls("list_households", 2).await;

    let added = h.add_household("Adams").await;
    h.client.router().invalidate(&any_household());
    h.client.router().invalidate(&any_household());
    gate.forward();
    h.client.router().wait_idle().await;

    assert_eq!(h.invoker.calls_to("list_households").len(), 3);
    assert_eq!(h.state(&key), SubscriptionState::Fresh);
    assert!(h.data(&key).contains(&added));
}

#[tokio::test]
async fn paged_queries_refetch_their_whole_loaded_window() {
    let h = harness_with(ClientConfig {
        page_size: 1,
        ..ClientConfig::default()
    })
    .await;

    let first = h.client.medical_records(1, false).await.expect("first page");
    assert_eq!(first.items.len(), 1);
    assert_eq!(first.total, Some(2));
    assert!(first.has_more);

    let both = h.client.medical_records(1, true).await.expect("second page");
    assert_eq!(both.items.len(), 2);
    assert!(!both.has_more);

    let key = queries::medical_records_for_patient(1, 1).key;
    h.client.router().observe(&key).expect("observe");
    h.client
        .router()
        .invalidate(&EntityKey::new(EntityKind::MedicalRecord, 1));
    h.client.router().wait_idle().await;

    let calls = h.invoker.calls_to("list_medical_records");
    assert_eq!(calls.len(), 3);
    assert_eq!(
        calls.last().cloned(),
        Some(json!({ "patientId": 1, "page": 1, "pageSize": 2 }))
    );
    let sub = h.client.router().subscription(&key).expect("registered");
    assert_eq!(sub.pages_loaded, 2);
    assert_eq!(sub.data.len(), 2);

    let err = h
        .client
        .router()
        .fetch_next_page(&queries::household_list().key)
        .await
        .expect_err("list is not registered");
    assert_eq!(err.code(), CACHE_UNKNOWN_QUERY);

    h.client.households().await.expect("register list");
    let err = h
        .client
        .router()
        .fetch_next_page(&queries::household_list().key)
        .await
        .expect_err("list is not paged");
    assert_eq!(err.code(), CACHE_NOT_PAGED);
}

#[tokio::test]
async fn failed_refetch_stays_stale_and_is_not_retried() {
    let h = harness().await;
    let key = h.client.watch(queries::household_detail(1)).expect("watch");
    h.client.router().wait_idle().await;
    let household = EntityKey::new(EntityKind::Household, 1);
    assert_eq!(h.client.cache().state(&household), Some(CacheState::Confirmed));

    let gate = h.invoker.hold("get_household");
    h.client.router().invalidate(&household);
    h.invoker.wait_for_calls("get_household", 2).await;
    gate.fail(BACKEND_UNAVAILABLE);
    h.client.router().wait_idle().await;

    let sub = h.client.router().subscription(&key).expect("registered");
    assert_eq!(sub.state, SubscriptionState::Stale);
    assert_eq!(
        sub.last_error.as_ref().map(|err| err.code()),
        Some(BACKEND_UNAVAILABLE)
    );
    assert_eq!(h.client.cache().state(&household), Some(CacheState::Stale));
    assert_eq!(h.client.metrics().refetch_failures, 1);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.invoker.calls_to("get_household").len(), 2);
}

#[tokio::test]
async fn mutation_cancels_a_refetch_already_in_flight() {
    let h = harness().await;
    let key = h.client.watch(queries::household_detail(1)).expect("watch");
    h.client.router().wait_idle().await;

    let stale_read = h.invoker.hold("get_household");
    h.client
        .router()
        .invalidate(&EntityKey::new(EntityKind::Household, 1));
    h.invoker.wait_for_calls("get_household", 2).await;

    let update = HouseholdUpdate {
        household_name: Some("Smith-Jones".into()),
        ..HouseholdUpdate::default()
    };
    h.client
        .update_household(1, update)
        .await
        .expect("rename commits");
    stale_read.release(Release::Respond(Ok(json!({
        "household": { "id": 1, "household_name": "Smith", "updated_at": 1 }
    }))));
    h.client.router().wait_idle().await;

    let household = h
        .client
        .cached::<Household>(1)
        .expect("decode")
        .expect("cached");
    assert_eq!(household.household_name, "Smith-Jones");
    assert_eq!(h.state(&key), SubscriptionState::Fresh);
    assert_eq!(h.invoker.calls_to("get_household").len(), 3);
}

#[tokio::test]
async fn single_queries_answering_null_report_not_found() {
    let h = harness().await;
    let gate = h.invoker.hold("get_patient");
    gate.release(Release::Respond(Ok(Value::Null)));
    let err = h.client.patient(1).await.expect_err("null payload");
    assert_eq!(err.code(), BACKEND_NOT_FOUND);

    let err = h
        .client
        .router()
        .observe(&QueryKey::new("nothing.here"))
        .expect_err("unknown query");
    assert_eq!(err.code(), CACHE_UNKNOWN_QUERY);
}

#[tokio::test]
async fn clear_drops_subscriptions_and_entities() {
    let h = harness().await;
    h.client.watch(queries::household_list()).expect("watch");
    h.client.router().wait_idle().await;
    assert!(!h.client.cache().is_empty());

    h.client.clear();
    assert!(h.client.router().subscriptions().is_empty());
    assert!(h.client.cache().is_empty());
    assert!(h.client.router().is_idle());
}
