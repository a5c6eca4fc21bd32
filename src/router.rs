//! Invalidation Router: maps a settled entity key to the query subscriptions that read it
//! and refetches the ones somebody is looking at.
//!
//! Subscriptions are registered once per [`QueryKey`] and may be observed and unobserved
//! at any time. Invalidation bumps a per-subscription generation; a refetch that finishes
//! under an older generation leaves the subscription stale, and the background task runs
//! once more instead of starting a second task. Refetches never retry on failure.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::cache::{EntityCache, EntityKey, EntityKind};
use crate::command::CommandInvoker;
use crate::error::{BACKEND_NOT_FOUND, CACHE_NOT_PAGED, CACHE_UNKNOWN_QUERY};
use crate::metrics::CacheMetrics;
use crate::queries::{Dependency, QueryKey, QueryShape, QuerySpec};
use crate::transform::{list_items, list_total, normalize};
use crate::util::dispatch_async_app_result;
use crate::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    /// Registered but never fetched.
    Idle,
    Fresh,
    Stale,
}

#[derive(Debug, Clone)]
pub struct QuerySubscription {
    pub spec: QuerySpec,
    pub state: SubscriptionState,
    pub observers: usize,
    /// Ids of the entities the last fetch returned, in response order.
    pub data: Vec<i64>,
    pub pages_loaded: usize,
    pub total: Option<i64>,
    pub has_more: bool,
    pub fetch_count: u64,
    pub last_error: Option<AppError>,
}

impl QuerySubscription {
    fn new(spec: QuerySpec) -> Self {
        Self {
            spec,
            state: SubscriptionState::Idle,
            observers: 0,
            data: Vec::new(),
            pages_loaded: 0,
            total: None,
            has_more: true,
            fetch_count: 0,
            last_error: None,
        }
    }

    pub fn key(&self) -> &QueryKey {
        &self.spec.key
    }

    pub fn kind(&self) -> EntityKind {
        self.spec.shape.kind()
    }

    /// Cache keys of the entities this subscription currently lists.
    pub fn entity_keys(&self) -> Vec<EntityKey> {
        let kind = self.kind();
        self.data.iter().map(|id| EntityKey::new(kind, *id)).collect()
    }
}

#[derive(Clone, Copy)]
enum Target {
    Key(EntityKey),
    Kind(EntityKind),
}

struct InFlight {
    task: u64,
    handle: AbortHandle,
}

struct Slot {
    sub: QuerySubscription,
    generation: u64,
    inflight: Option<InFlight>,
}

impl Slot {
    fn affected_by(&self, target: Target) -> bool {
        match target {
            Target::Key(key) => {
                self.sub.spec.depends_on_key(&key)
                    || (self.sub.kind() == key.kind && self.sub.data.contains(&key.id))
            }
            Target::Kind(kind) => self.sub.spec.dependencies.iter().any(|dep| match dep {
                Dependency::Kind(own) => *own == kind,
                Dependency::Entity(key) => key.kind == kind,
            }),
        }
    }
}

struct Fetched {
    generation: u64,
    ids: Vec<i64>,
    total: Option<i64>,
    pages: usize,
    has_more: bool,
}

struct RouterInner {
    cache: Arc<EntityCache>,
    invoker: Arc<dyn CommandInvoker>,
    metrics: Arc<CacheMetrics>,
    slots: Mutex<HashMap<QueryKey, Slot>>,
    next_task: AtomicU64,
    idle: Notify,
}

#[derive(Clone)]
pub struct InvalidationRouter {
    inner: Arc<RouterInner>,
}

fn unknown_query(key: &QueryKey) -> AppError {
    AppError::new(CACHE_UNKNOWN_QUERY, "Query is not registered")
        .with_context("query", key.to_string())
}

impl InvalidationRouter {
    pub fn new(
        cache: Arc<EntityCache>,
        invoker: Arc<dyn CommandInvoker>,
        metrics: Arc<CacheMetrics>,
    ) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                cache,
                invoker,
                metrics,
                slots: Mutex::new(HashMap::new()),
                next_task: AtomicU64::new(1),
                idle: Notify::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<QueryKey, Slot>> {
        self.inner.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a subscription. Registering a key twice keeps the existing one.
    pub fn register(&self, spec: QuerySpec) -> QueryKey {
        let key = spec.key.clone();
        let mut slots = self.lock();
        if !slots.contains_key(&key) {
            debug!(target: "vetclinic", event = "router_register", query = %key);
            slots.insert(
                key.clone(),
                Slot {
                    sub: QuerySubscription::new(spec),
                    generation: 0,
                    inflight: None,
                },
            );
        }
        key
    }

    /// A consumer started watching `key`. Anything not fresh is refetched in the background.
    pub fn observe(&self, key: &QueryKey) -> AppResult<()> {
        let mut slots = self.lock();
        let slot = slots.get_mut(key).ok_or_else(|| unknown_query(key))?;
        slot.sub.observers += 1;
        if slot.sub.state != SubscriptionState::Fresh {
            self.spawn_refetch(key, slot);
        }
        Ok(())
    }

    pub fn unobserve(&self, key: &QueryKey) {
        if let Some(slot) = self.lock().get_mut(key) {
            slot.sub.observers = slot.sub.observers.saturating_sub(1);
        }
    }

    pub fn unregister(&self, key: &QueryKey) -> bool {
        let removed = self.lock().remove(key);
        let found = removed.is_some();
        if let Some(inflight) = removed.and_then(|slot| slot.inflight) {
            inflight.handle.abort();
        }
        self.inner.idle.notify_waiters();
        found
    }

    /// Mark every subscription that reads `key` stale and refetch the observed ones.
    pub fn invalidate(&self, key: &EntityKey) -> Vec<QueryKey> {
        self.invalidate_target(Target::Key(*key))
    }

    /// Like [`Self::invalidate`], for changes whose entity id is not known, such as a
    /// create that failed.
    pub fn invalidate_kind(&self, kind: EntityKind) -> Vec<QueryKey> {
        self.invalidate_target(Target::Kind(kind))
    }

    fn invalidate_target(&self, target: Target) -> Vec<QueryKey> {
        let mut touched = Vec::new();
        let mut slots = self.lock();
        for (query, slot) in slots.iter_mut() {
            if !slot.affected_by(target) {
                continue;
            }
            slot.generation += 1;
            slot.sub.state = SubscriptionState::Stale;
            if slot.sub.observers > 0 {
                self.spawn_refetch(query, slot);
            }
            touched.push(query.clone());
        }
        drop(slots);
        touched.sort();

        match target {
            Target::Key(key) => info!(
                target: "vetclinic",
                event = "router_invalidate",
                key = %key,
                queries = touched.len()
            ),
            Target::Kind(kind) => info!(
                target: "vetclinic",
                event = "router_invalidate",
                kind = %kind,
                queries = touched.len()
            ),
        }
        touched
    }

    /// Abandon pending refetches that could write `key`. Their network calls may still
    /// complete, but the cache discards what they return.
    pub fn cancel_reads(&self, key: &EntityKey) {
        self.inner.cache.cancel_reads(key);
        let mut cancelled = 0usize;
        {
            let mut slots = self.lock();
            for slot in slots.values_mut() {
                if !slot.affected_by(Target::Key(*key)) {
                    continue;
                }
                if let Some(inflight) = slot.inflight.take() {
                    inflight.handle.abort();
                    slot.generation += 1;
                    slot.sub.state = SubscriptionState::Stale;
                    cancelled += 1;
                }
            }
        }
        if cancelled > 0 {
            debug!(
                target: "vetclinic",
                event = "router_reads_cancelled",
                key = %key,
                queries = cancelled
            );
            self.inner.idle.notify_waiters();
        }
    }

    /// Fetch `key` now and wait for the result.
    pub async fn fetch(&self, key: &QueryKey) -> AppResult<QuerySubscription> {
        let outcome = self.run_fetch(key).await;
        let failure = outcome.as_ref().err().cloned();
        let mut slots = self.lock();
        let slot = slots.get_mut(key).ok_or_else(|| unknown_query(key))?;
        self.apply_outcome(slot, outcome);
        match failure {
            Some(err) => Err(err),
            None => Ok(slot.sub.clone()),
        }
    }

    /// Load the page after the last one fetched and append its ids.
    pub async fn fetch_next_page(&self, key: &QueryKey) -> AppResult<QuerySubscription> {
        let (spec, page_size, next_page) = {
            let slots = self.lock();
            let slot = slots.get(key).ok_or_else(|| unknown_query(key))?;
            let QueryShape::Paged { page_size, .. } = slot.sub.spec.shape else {
                return Err(AppError::new(CACHE_NOT_PAGED, "Query is not paged")
                    .with_context("query", key.to_string()));
            };
            if slot.sub.pages_loaded > 0 && !slot.sub.has_more {
                return Ok(slot.sub.clone());
            }
            (slot.sub.spec.clone(), page_size, slot.sub.pages_loaded + 1)
        };

        let kind = spec.shape.kind();
        let read = self.inner.cache.begin_read();
        let mut args = spec.command.args.clone();
        args.insert("page".into(), Value::from(next_page as u64));
        args.insert("pageSize".into(), Value::from(page_size as u64));
        let response = self.invoke(&spec.command.name, Value::Object(args)).await;
        self.inner.metrics.record_refetch(response.is_ok());
        let response = response?;

        let items = list_items(&response);
        let mut ids = Vec::with_capacity(items.len());
        for item in items {
            let record = normalize(kind, item);
            ids.push(record.id);
            self.inner.cache.observe(kind, record, read.ticket());
        }
        let total = list_total(&response);

        let mut slots = self.lock();
        let slot = slots.get_mut(key).ok_or_else(|| unknown_query(key))?;
        for id in &ids {
            if !slot.sub.data.contains(id) {
                slot.sub.data.push(*id);
            }
        }
        slot.sub.pages_loaded = next_page;
        slot.sub.total = total;
        slot.sub.has_more = match total {
            Some(total) => (slot.sub.data.len() as i64) < total,
            None => ids.len() >= page_size,
        };
        slot.sub.fetch_count += 1;
        slot.sub.last_error = None;
        if slot.sub.state == SubscriptionState::Idle {
            slot.sub.state = SubscriptionState::Fresh;
        }
        Ok(slot.sub.clone())
    }

    pub fn subscription(&self, key: &QueryKey) -> Option<QuerySubscription> {
        self.lock().get(key).map(|slot| slot.sub.clone())
    }

    pub fn subscriptions(&self) -> Vec<QuerySubscription> {
        let mut subs: Vec<QuerySubscription> =
            self.lock().values().map(|slot| slot.sub.clone()).collect();
        subs.sort_by(|a, b| a.spec.key.cmp(&b.spec.key));
        subs
    }

    pub fn is_idle(&self) -> bool {
        self.lock().values().all(|slot| slot.inflight.is_none())
    }

    /// Wait until no background refetch is running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Drop every subscription, aborting running refetches.
    pub fn clear(&self) {
        let drained: Vec<Slot> = self.lock().drain().map(|(_, slot)| slot).collect();
        for slot in drained {
            if let Some(inflight) = slot.inflight {
                inflight.handle.abort();
            }
        }
        self.inner.idle.notify_waiters();
    }

    fn invoke<'a>(
        &'a self,
        command: &'a str,
        args: Value,
    ) -> impl std::future::Future<Output = AppResult<Value>> + 'a {
        let invoker = &self.inner.invoker;
        dispatch_async_app_result(move || invoker.invoke(command, args))
    }

    fn spawn_refetch(&self, key: &QueryKey, slot: &mut Slot) {
        if slot.inflight.is_some() {
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            debug!(target: "vetclinic", event = "router_refetch_deferred", query = %key);
            return;
        };
        let task = self.inner.next_task.fetch_add(1, Ordering::Relaxed);
        let router = self.clone();
        let owned = key.clone();
        let handle = runtime.spawn(async move { router.refetch_loop(owned, task).await });
        slot.inflight = Some(InFlight {
            task,
            handle: handle.abort_handle(),
        });
    }

    async fn refetch_loop(self, key: QueryKey, task: u64) {
        loop {
            let outcome = self.run_fetch(&key).await;
            let again = {
                let mut slots = self.lock();
                let Some(slot) = slots.get_mut(&key) else {
                    break;
                };
                if slot.inflight.as_ref().map(|inflight| inflight.task) != Some(task) {
                    break;
                }
                self.apply_outcome(slot, outcome);
                let again = slot.sub.state == SubscriptionState::Stale
                    && slot.sub.observers > 0
                    && slot.sub.last_error.is_none();
                if !again {
                    slot.inflight = None;
                }
                again
            };
            if !again {
                break;
            }
        }
        self.inner.idle.notify_waiters();
    }

    async fn run_fetch(&self, key: &QueryKey) -> AppResult<Fetched> {
        let (spec, pages, generation) = {
            let slots = self.lock();
            let slot = slots.get(key).ok_or_else(|| unknown_query(key))?;
            (
                slot.sub.spec.clone(),
                slot.sub.pages_loaded.max(1),
                slot.generation,
            )
        };

        let kind = spec.shape.kind();
        let read = self.inner.cache.begin_read();
        let mut args = spec.command.args.clone();
        if let QueryShape::Paged { page_size, .. } = spec.shape {
            // The loaded window is refetched as one page so ids stay contiguous.
            args.insert("page".into(), Value::from(1_u64));
            args.insert("pageSize".into(), Value::from((page_size * pages) as u64));
        }
        let response = self
            .invoke(&spec.command.name, Value::Object(args))
            .await
            .map_err(|err| err.with_context("query", key.to_string()))?;

        match spec.shape {
            QueryShape::Single(_) => {
                if response.is_null() {
                    return Err(AppError::new(BACKEND_NOT_FOUND, "Entity not found")
                        .with_context("query", key.to_string()));
                }
                let record = normalize(kind, &response);
                let id = record.id;
                self.inner.cache.observe(kind, record, read.ticket());
                Ok(Fetched {
                    generation,
                    ids: vec![id],
                    total: None,
                    pages: 0,
                    has_more: false,
                })
            }
            QueryShape::List(_) | QueryShape::Paged { .. } => {
                let items = list_items(&response);
                let mut ids = Vec::with_capacity(items.len());
                for item in items {
                    let record = normalize(kind, item);
                    ids.push(record.id);
                    self.inner.cache.observe(kind, record, read.ticket());
                }
                let total = list_total(&response);
                let (pages, has_more) = match spec.shape {
                    QueryShape::Paged { page_size, .. } => {
                        let has_more = match total {
                            Some(total) => (ids.len() as i64) < total,
                            None => ids.len() >= page_size * pages,
                        };
                        (pages, has_more)
                    }
                    _ => (0, false),
                };
                Ok(Fetched {
                    generation,
                    ids,
                    total,
                    pages,
                    has_more,
                })
            }
        }
    }

    fn apply_outcome(&self, slot: &mut Slot, outcome: AppResult<Fetched>) {
        slot.sub.fetch_count += 1;
        match outcome {
            Ok(fetched) => {
                self.inner.metrics.record_refetch(true);
                slot.sub.data = fetched.ids;
                slot.sub.total = fetched.total;
                slot.sub.pages_loaded = fetched.pages;
                slot.sub.has_more = fetched.has_more;
                slot.sub.last_error = None;
                slot.sub.state = if slot.generation == fetched.generation {
                    SubscriptionState::Fresh
                } else {
                    SubscriptionState::Stale
                };
            }
            Err(err) => {
                self.inner.metrics.record_refetch(false);
                warn!(
                    target: "vetclinic",
                    event = "router_refetch_failed",
                    query = %slot.sub.spec.key,
                    code = err.code(),
                    message = err.message()
                );
                for key in slot.sub.entity_keys() {
                    self.inner.cache.mark_stale(&key);
                }
                slot.sub.state = SubscriptionState::Stale;
                slot.sub.last_error = Some(err);
            }
        }
    }
}
