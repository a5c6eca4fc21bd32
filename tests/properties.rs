#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use futures::future::BoxFuture;
use proptest::prelude::*;
use serde_json::{json, Map, Value};

use vetclinic_lib::cache::{CacheState, EntityCache, EntityKey, EntityKind};
use vetclinic_lib::command::{CommandCall, CommandInvoker};
use vetclinic_lib::config::MutationOrdering;
use vetclinic_lib::coordinator::MutationCoordinator;
use vetclinic_lib::error::BACKEND_UNAVAILABLE;
use vetclinic_lib::metrics::CacheMetrics;
use vetclinic_lib::mutation::Mutation;
use vetclinic_lib::router::InvalidationRouter;
use vetclinic_lib::transform::{normalize, schema_for, FieldKind};
use vetclinic_lib::{AppError, AppResult};

struct Refusing;

impl CommandInvoker for Refusing {
    fn invoke(&self, _command: &str, _args: Value) -> BoxFuture<'_, AppResult<Value>> {
        Box::pin(async { Err(AppError::new(BACKEND_UNAVAILABLE, "backend offline")) })
    }
}

fn wire_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        any::<f64>().prop_map(Value::from),
        ".{0,12}".prop_map(Value::String),
        Just(json!("2024-03-01 10:30:00")),
        Just(json!("2024-03-01T10:30:00Z")),
        Just(json!("1")),
    ];
    leaf.prop_recursive(2, 8, 3, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..3).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..3)
                .prop_map(|map| Value::Object(map.into_iter().collect())),
        ]
    })
}

fn matches_kind(kind: FieldKind, value: &Value) -> bool {
    match kind {
        FieldKind::Text => value.is_string(),
        FieldKind::Integer | FieldKind::Timestamp => value.is_i64(),
        FieldKind::Float => value.is_f64(),
        FieldKind::Bool => value.is_boolean(),
        FieldKind::List => value.is_array(),
    }
}

/// Place `value` under `path`, building nested objects for dotted aliases.
fn nest(path: &str, value: Value) -> Value {
    path.rsplit('.').fold(value, |inner, segment| {
        let mut map = Map::new();
        map.insert(segment.to_string(), inner);
        Value::Object(map)
    })
}

proptest! {
    #[test]
    fn normalized_records_declare_every_field_with_its_type(
        kind_idx in 0usize..EntityKind::ALL.len(),
        field_idx in 0usize..32,
        spelling_idx in 0usize..8,
        value in wire_value(),
        envelope in any::<bool>(),
    ) {
        let kind = EntityKind::ALL[kind_idx];
        let schema = schema_for(kind);
        let spec = &schema.fields[field_idx % schema.fields.len()];
        let spellings: Vec<&str> = std::iter::once(spec.canonical)
            .chain(spec.aliases.iter().copied())
            .collect();
        let spelling = spellings[spelling_idx % spellings.len()];

        let mut payload = nest(spelling, value);
        if envelope {
            payload = nest(schema.envelopes[0], payload);
        }
        let record = normalize(kind, &payload);

        for field in schema.fields {
            let got = record.fields.get(field.canonical);
            prop_assert!(got.is_some(), "{kind} lost {}", field.canonical);
            prop_assert!(
                matches_kind(field.kind, got.unwrap_or(&Value::Null)),
                "{kind}.{} has the wrong type: {:?}",
                field.canonical,
                got
            );
        }
    }

    #[test]
    fn failed_mutations_leave_the_cache_as_it_was(
        kind_idx in 0usize..EntityKind::ALL.len(),
        id in 1i64..500,
        seeded in proptest::option::of((
            prop::collection::vec((0usize..32, wire_value()), 0..4),
            0i64..2_000_000_000_000,
            any::<bool>(),
        )),
        delta in prop::collection::vec((0usize..32, wire_value()), 0..5),
        delete in any::<bool>(),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("create tokio runtime");
        let kind = EntityKind::ALL[kind_idx];
        let key = EntityKey::new(kind, id);

        let (before, after) = runtime.block_on(async move {
            let metrics = Arc::new(CacheMetrics::new());
            let cache = Arc::new(EntityCache::new(metrics.clone()));
            let invoker: Arc<dyn CommandInvoker> = Arc::new(Refusing);
            let router = InvalidationRouter::new(cache.clone(), invoker.clone(), metrics.clone());
            let coordinator = MutationCoordinator::new(
                cache.clone(),
                invoker,
                router,
                metrics,
                MutationOrdering::Concurrent,
            );

            let schema = schema_for(kind);
            if let Some((fields, updated_at, stale)) = seeded {
                let mut raw: Map<String, Value> = fields
                    .into_iter()
                    .map(|(idx, value)| {
                        (schema.fields[idx % schema.fields.len()].canonical.to_string(), value)
                    })
                    .collect();
                raw.insert("id".into(), json!(id));
                raw.insert("updatedAt".into(), json!(updated_at));
                let record = normalize(kind, &Value::Object(raw));
                let state = if stale { CacheState::Stale } else { CacheState::Confirmed };
                cache.put(key, record, state);
            }

            let delta: Map<String, Value> = delta
                .into_iter()
                .map(|(idx, value)| {
                    (schema.fields[idx % schema.fields.len()].canonical.to_string(), value)
                })
                .collect();
            let mutation = if delete {
                Mutation::delete(kind, id, CommandCall::new("delete_entity").arg("id", id))
            } else {
                Mutation::update(kind, id, delta, CommandCall::new("update_entity").arg("id", id))
            };

            let before = cache.get(&key);
            let result = coordinator.execute(mutation).await;
            assert!(result.is_err());
            assert!(coordinator.pending().is_empty());
            (before, cache.get(&key))
        });

        prop_assert_eq!(before, after);
    }
}
