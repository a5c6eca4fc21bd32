//! Optimistic mutation protocol.
//!
//! Every mutation runs the same sequence against the shared cache: cancel pending reads
//! for the target key, snapshot the current entry, apply the change speculatively,
//! dispatch the command, then either confirm the backend's answer or restore the
//! snapshot. Settling always invalidates the dependent queries, whatever the outcome.
//!
//! Only the dispatch awaits. Everything before and after it happens under the cache's
//! own lock, one synchronous step at a time, so no task ever observes a half-applied
//! change. Two mutations on the same key may still interleave around their dispatches;
//! with [`MutationOrdering::Concurrent`] the last to settle wins, while
//! [`MutationOrdering::PerKeySerial`] queues them behind an async per-key lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::cache::{CacheEntry, CacheState, EntityCache, EntityKey, EntityKind, EntityRecord};
use crate::command::CommandInvoker;
use crate::config::MutationOrdering;
use crate::metrics::CacheMetrics;
use crate::mutation::{Mutation, MutationKind, MutationStatus, PendingMutation, PendingRegistry};
use crate::mutation_log::LogScope;
use crate::router::InvalidationRouter;
use crate::transform::{canonical_delta, default_record, normalize};
use crate::util::dispatch_async_app_result;
use crate::AppResult;

pub struct MutationCoordinator {
    cache: Arc<EntityCache>,
    invoker: Arc<dyn CommandInvoker>,
    router: InvalidationRouter,
    metrics: Arc<CacheMetrics>,
    pending: PendingRegistry,
    ordering: MutationOrdering,
    key_locks: Mutex<HashMap<EntityKey, Arc<AsyncMutex<()>>>>,
}

struct Settled {
    record: Option<EntityRecord>,
    key: Option<EntityKey>,
    authoritative: bool,
}

/// The entity a response holds, if it is more than an acknowledgement such as `null`.
fn carries_entity(kind: EntityKind, response: &Value) -> Option<EntityRecord> {
    if !response.is_object() {
        return None;
    }
    let record = normalize(kind, response);
    (record.id != 0).then_some(record)
}

impl MutationCoordinator {
    pub fn new(
        cache: Arc<EntityCache>,
        invoker: Arc<dyn CommandInvoker>,
        router: InvalidationRouter,
        metrics: Arc<CacheMetrics>,
        ordering: MutationOrdering,
    ) -> Self {
        Self {
            cache,
            invoker,
            router,
            metrics,
            pending: PendingRegistry::new(),
            ordering,
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn ordering(&self) -> MutationOrdering {
        self.ordering
    }

    /// Mutations dispatched but not yet settled.
    pub fn pending(&self) -> Vec<PendingMutation> {
        self.pending.all()
    }

    pub fn pending_for(&self, key: &EntityKey) -> Vec<PendingMutation> {
        self.pending.for_key(key)
    }

    /// Run one mutation to settle. Returns the confirmed record, or `None` for deletes
    /// and for acknowledgements that left nothing confirmable in the cache.
    pub async fn execute(&self, mutation: Mutation) -> AppResult<Option<EntityRecord>> {
        let serial = match (self.ordering, mutation.target()) {
            (MutationOrdering::PerKeySerial, Some(key)) => Some(self.lock_key(key).await),
            _ => None,
        };
        let result = self.run(mutation).await;
        if serial.is_some() {
            drop(serial);
            self.prune_key_locks();
        }
        result
    }

    async fn lock_key(&self, key: EntityKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.key_locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(key).or_default().clone()
        };
        lock.lock_owned().await
    }

    fn prune_key_locks(&self) {
        self.key_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    async fn run(&self, mutation: Mutation) -> AppResult<Option<EntityRecord>> {
        let target = mutation.target();
        let scope = LogScope::new(&mutation.command.name, mutation.label(), target.as_ref());

        if let Some(key) = target {
            self.router.cancel_reads(&key);
        }
        let snapshot = target.and_then(|key| self.cache.entry(&key));
        let seeded = target.is_some_and(|key| self.is_seeded(key, snapshot.as_ref()));
        if let Some(key) = target {
            self.apply_speculative(&mutation, key, snapshot.as_ref());
        }
        let pending = PendingMutation::begin(&mutation, snapshot.clone(), seeded);
        let pending_id = pending.id.clone();
        self.pending.insert(pending);

        let invoker = &self.invoker;
        let command = mutation.command.name.as_str();
        let args = mutation.command.args_value();
        let response = dispatch_async_app_result(move || invoker.invoke(command, args)).await;

        let (result, settled_key) = match response {
            Ok(response) => {
                let settled = self.commit(&mutation, target, &response, seeded);
                self.pending.settle(&pending_id, MutationStatus::Committed);
                self.metrics.record_commit();
                scope.success(
                    settled.key.as_ref(),
                    json!({ "outcome": "committed", "authoritative": settled.authoritative }),
                );
                (Ok(settled.record), settled.key)
            }
            Err(err) => {
                if let Some(key) = target {
                    self.rollback(key, snapshot, &pending_id);
                }
                self.pending.settle(&pending_id, MutationStatus::RolledBack);
                self.metrics.record_rollback();
                let mut err = err.with_context("command", command);
                if let Some(key) = target {
                    err = err.with_context("key", key.to_string());
                }
                scope.fail(&err);
                (Err(err), target)
            }
        };

        match settled_key {
            Some(key) => self.router.invalidate(&key),
            None => self.router.invalidate_kind(mutation.entity),
        };
        result
    }

    /// True when the speculative value would rest on schema defaults: the key is not
    /// cached, or it holds a guess from another in-flight mutation that was itself seeded.
    fn is_seeded(&self, key: EntityKey, snapshot: Option<&CacheEntry>) -> bool {
        match snapshot {
            None => true,
            Some(entry) if entry.state == CacheState::Speculative => self
                .pending
                .for_key(&key)
                .iter()
                .any(|pending| pending.seeded),
            Some(_) => false,
        }
    }

    fn apply_speculative(&self, mutation: &Mutation, key: EntityKey, snapshot: Option<&CacheEntry>) {
        match &mutation.kind {
            MutationKind::Update { delta, .. } => {
                let base = snapshot
                    .map(|entry| entry.record.clone())
                    .unwrap_or_else(|| default_record(key.kind, key.id));
                let merged = base.merged(&canonical_delta(key.kind, delta));
                self.cache.put(key, merged, CacheState::Speculative);
            }
            MutationKind::Delete { .. } => {
                self.cache.remove(&key);
            }
            MutationKind::Create { .. } => return,
        }
        self.metrics.record_speculative_apply();
    }

    fn commit(
        &self,
        mutation: &Mutation,
        target: Option<EntityKey>,
        response: &Value,
        seeded: bool,
    ) -> Settled {
        let returned = carries_entity(mutation.entity, response);
        let authoritative = returned.is_some();
        let (record, key) = match (&mutation.kind, target) {
            (MutationKind::Update { .. }, Some(key)) => match returned {
                Some(record) => {
                    self.cache.put(key, record.clone(), CacheState::Confirmed);
                    (Some(record), Some(key))
                }
                // A bare acknowledgement never confirms a guess built from defaults; the
                // entry is dropped and the settle-time invalidation fetches the real row.
                None if seeded => {
                    self.cache.remove(&key);
                    (None, Some(key))
                }
                None => {
                    let confirmed = self.cache.entry(&key).map(|entry| entry.record);
                    if let Some(record) = &confirmed {
                        self.cache.put(key, record.clone(), CacheState::Confirmed);
                    }
                    (confirmed, Some(key))
                }
            },
            (MutationKind::Delete { .. }, Some(key)) => {
                self.cache.remove(&key);
                (None, Some(key))
            }
            (MutationKind::Create { .. }, _) => match returned {
                Some(record) => {
                    let key = EntityKey::new(mutation.entity, record.id);
                    self.cache.put(key, record.clone(), CacheState::Confirmed);
                    (Some(record), Some(key))
                }
                None => (None, None),
            },
            (_, None) => (None, None),
        };
        Settled {
            record,
            key,
            authoritative,
        }
    }

    /// Restore the snapshot. A snapshot that was another mutation's guess stays
    /// speculative while that mutation is still in flight.
    fn rollback(&self, key: EntityKey, snapshot: Option<CacheEntry>, pending_id: &str) {
        let Some(entry) = snapshot else {
            self.cache.remove(&key);
            return;
        };
        let others_in_flight = self
            .pending
            .for_key(&key)
            .iter()
            .any(|pending| pending.id != pending_id);
        let state = if entry.state == CacheState::Speculative && others_in_flight {
            CacheState::Speculative
        } else {
            CacheState::Confirmed
        };
        self.cache.put(key, entry.record, state);
    }
}
