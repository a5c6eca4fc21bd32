//! In-memory store of the last known state of every fetched or mutated entity.
//!
//! Entries are keyed by [`EntityKey`] and carry a [`CacheState`] tag. `put` is
//! unconditional (last write wins); the read path goes through [`EntityCache::observe`],
//! which refuses to overwrite speculative values, values whose reads were cancelled
//! after they started, and values older than what is already confirmed.
//!
//! The lock is only taken inside synchronous methods and never held across an `.await`,
//! so every method is atomic with respect to other tasks.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::metrics::CacheMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Household,
    Person,
    Contact,
    Patient,
    MedicalRecord,
    Attachment,
    Appointment,
}

impl EntityKind {
    pub const ALL: [EntityKind; 7] = [
        EntityKind::Household,
        EntityKind::Person,
        EntityKind::Contact,
        EntityKind::Patient,
        EntityKind::MedicalRecord,
        EntityKind::Attachment,
        EntityKind::Appointment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Household => "household",
            EntityKind::Person => "person",
            EntityKind::Contact => "contact",
            EntityKind::Patient => "patient",
            EntityKind::MedicalRecord => "medical_record",
            EntityKind::Attachment => "attachment",
            EntityKind::Appointment => "appointment",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown entity kind: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub id: i64,
}

impl EntityKey {
    pub fn new(kind: EntityKind, id: i64) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// A server-owned object in canonical shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: i64,
    /// Monotonic change marker in milliseconds since the epoch.
    pub updated_at: i64,
    pub fields: Map<String, Value>,
}

impl EntityRecord {
    pub fn new(id: i64, updated_at: i64, fields: Map<String, Value>) -> Self {
        Self {
            id,
            updated_at,
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn text(&self, name: &str) -> &str {
        self.fields.get(name).and_then(Value::as_str).unwrap_or("")
    }

    pub fn integer(&self, name: &str) -> i64 {
        self.fields.get(name).and_then(Value::as_i64).unwrap_or(0)
    }

    pub fn flag(&self, name: &str) -> bool {
        self.fields
            .get(name)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Copy of this record with `delta` laid over its fields. `id` and `updatedAt`
    /// are identity/change markers and are never taken from a delta.
    pub fn merged(&self, delta: &Map<String, Value>) -> Self {
        let mut fields = self.fields.clone();
        for (key, value) in delta {
            if key == "id" || key == "updatedAt" {
                continue;
            }
            fields.insert(key.clone(), value.clone());
        }
        Self {
            id: self.id,
            updated_at: self.updated_at,
            fields,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheState {
    Confirmed,
    Speculative,
    Stale,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub record: EntityRecord,
    pub state: CacheState,
}

/// Clock value captured when a read begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReadTicket(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Applied,
    /// A mutation cancelled reads for the key after this read began.
    Cancelled,
    /// The entry holds an unconfirmed local value.
    Speculative,
    /// The cached confirmed value is newer than the fetched one.
    Outdated,
}

/// An open read. Dropping it, including when the read's task is aborted, closes it.
pub struct ReadGuard<'a> {
    cache: &'a EntityCache,
    ticket: ReadTicket,
}

impl ReadGuard<'_> {
    pub fn ticket(&self) -> ReadTicket {
        self.ticket
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.cache.end_read(self.ticket);
    }
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<EntityKey, CacheEntry>,
    /// Cancellation marks, kept only while some open read predates them.
    cancelled_at: HashMap<EntityKey, u64>,
    open_reads: BTreeSet<u64>,
    clock: u64,
}

pub struct EntityCache {
    inner: Mutex<CacheInner>,
    metrics: Arc<CacheMetrics>,
}

impl EntityCache {
    pub fn new(metrics: Arc<CacheMetrics>) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            metrics,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, key: &EntityKey) -> Option<EntityRecord> {
        let found = self.lock().entries.get(key).map(|entry| entry.record.clone());
        self.metrics.record_lookup(found.is_some());
        found
    }

    pub fn entry(&self, key: &EntityKey) -> Option<CacheEntry> {
        self.lock().entries.get(key).cloned()
    }

    pub fn state(&self, key: &EntityKey) -> Option<CacheState> {
        self.lock().entries.get(key).map(|entry| entry.state)
    }

    pub fn put(&self, key: EntityKey, record: EntityRecord, state: CacheState) {
        self.lock()
            .entries
            .insert(key, CacheEntry { record, state });
    }

    pub fn remove(&self, key: &EntityKey) -> Option<CacheEntry> {
        self.lock().entries.remove(key)
    }

    /// Tag a confirmed entry as stale. Speculative entries keep their tag.
    pub fn mark_stale(&self, key: &EntityKey) -> bool {
        let mut inner = self.lock();
        match inner.entries.get_mut(key) {
            Some(entry) if entry.state == CacheState::Confirmed => {
                entry.state = CacheState::Stale;
                true
            }
            _ => false,
        }
    }

    pub fn evict_where<F>(&self, mut predicate: F) -> usize
    where
        F: FnMut(&EntityKey, &CacheEntry) -> bool,
    {
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|key, entry| !predicate(key, entry));
        before - inner.entries.len()
    }

    pub fn keys_of(&self, kind: EntityKind) -> Vec<EntityKey> {
        let mut keys: Vec<EntityKey> = self
            .lock()
            .entries
            .keys()
            .filter(|key| key.kind == kind)
            .copied()
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.cancelled_at.clear();
        inner.open_reads.clear();
    }

    pub fn begin_read(&self) -> ReadGuard<'_> {
        let mut inner = self.lock();
        inner.clock += 1;
        let ticket = inner.clock;
        inner.open_reads.insert(ticket);
        ReadGuard {
            cache: self,
            ticket: ReadTicket(ticket),
        }
    }

    fn end_read(&self, ticket: ReadTicket) {
        let mut inner = self.lock();
        inner.open_reads.remove(&ticket.0);
        // A mark only blocks reads that began before it.
        match inner.open_reads.first().copied() {
            Some(oldest) => inner.cancelled_at.retain(|_, mark| *mark > oldest),
            None => inner.cancelled_at.clear(),
        }
    }

    /// Any read that began before this call will not be applied to `key`.
    pub fn cancel_reads(&self, key: &EntityKey) {
        let mut inner = self.lock();
        inner.clock += 1;
        let now = inner.clock;
        if !inner.open_reads.is_empty() {
            inner.cancelled_at.insert(*key, now);
        }
    }

    /// Keys whose cancellation marks are still held for open reads.
    pub fn cancellation_marks(&self) -> usize {
        self.lock().cancelled_at.len()
    }

    pub fn observe(&self, kind: EntityKind, record: EntityRecord, ticket: ReadTicket) -> Observation {
        let key = EntityKey::new(kind, record.id);
        let mut inner = self.lock();

        let outcome = if inner
            .cancelled_at
            .get(&key)
            .is_some_and(|cancelled| *cancelled > ticket.0)
        {
            Observation::Cancelled
        } else {
            match inner.entries.get(&key) {
                Some(entry) if entry.state == CacheState::Speculative => Observation::Speculative,
                Some(entry) if entry.record.updated_at > record.updated_at => {
                    Observation::Outdated
                }
                _ => Observation::Applied,
            }
        };

        if outcome == Observation::Applied {
            inner.entries.insert(
                key,
                CacheEntry {
                    record,
                    state: CacheState::Confirmed,
                },
            );
        } else {
            drop(inner);
            self.metrics.record_discarded_read();
            debug!(
                target: "vetclinic",
                event = "cache_observation_discarded",
                key = %key,
                reason = ?outcome
            );
        }
        outcome
    }
}
