use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::cache::{CacheEntry, EntityKey, EntityKind};
use crate::command::CommandCall;
use crate::id::new_uuid_v7;
use crate::time::now_ms;

#[derive(Debug, Clone, PartialEq)]
pub enum MutationKind {
    /// Merge a canonical delta into an existing entity.
    Update { id: i64, delta: Map<String, Value> },
    Delete { id: i64 },
    /// The id is assigned by the backend, so nothing is applied speculatively.
    Create { draft: Map<String, Value> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub entity: EntityKind,
    pub kind: MutationKind,
    pub command: CommandCall,
}

impl Mutation {
    pub fn update(
        entity: EntityKind,
        id: i64,
        delta: Map<String, Value>,
        command: CommandCall,
    ) -> Self {
        Self {
            entity,
            kind: MutationKind::Update { id, delta },
            command,
        }
    }

    pub fn delete(entity: EntityKind, id: i64, command: CommandCall) -> Self {
        Self {
            entity,
            kind: MutationKind::Delete { id },
            command,
        }
    }

    pub fn create(entity: EntityKind, draft: Map<String, Value>, command: CommandCall) -> Self {
        Self {
            entity,
            kind: MutationKind::Create { draft },
            command,
        }
    }

    /// Key the mutation targets, when the backend has already assigned one.
    pub fn target(&self) -> Option<EntityKey> {
        match &self.kind {
            MutationKind::Update { id, .. } | MutationKind::Delete { id } => {
                Some(EntityKey::new(self.entity, *id))
            }
            MutationKind::Create { .. } => None,
        }
    }

    pub fn delta(&self) -> Map<String, Value> {
        match &self.kind {
            MutationKind::Update { delta, .. } => delta.clone(),
            MutationKind::Create { draft } => draft.clone(),
            MutationKind::Delete { .. } => Map::new(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self.kind {
            MutationKind::Update { .. } => "update",
            MutationKind::Delete { .. } => "delete",
            MutationKind::Create { .. } => "create",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationStatus {
    InFlight,
    Committed,
    RolledBack,
}

/// A mutation between dispatch and settle.
#[derive(Debug, Clone)]
pub struct PendingMutation {
    pub id: String,
    pub entity: EntityKind,
    pub target: Option<EntityKey>,
    pub delta: Map<String, Value>,
    /// Cache entry as it was before the speculative apply; `None` when uncached.
    pub snapshot: Option<CacheEntry>,
    /// The speculative value was laid over schema defaults rather than a backend record.
    pub seeded: bool,
    pub status: MutationStatus,
    pub started_at: i64,
}

impl PendingMutation {
    pub fn begin(mutation: &Mutation, snapshot: Option<CacheEntry>, seeded: bool) -> Self {
        Self {
            id: new_uuid_v7(),
            entity: mutation.entity,
            target: mutation.target(),
            delta: mutation.delta(),
            snapshot,
            seeded,
            status: MutationStatus::InFlight,
            started_at: now_ms(),
        }
    }
}

/// Mutations currently in flight, keyed by their id. Entries leave once settled.
#[derive(Default)]
pub struct PendingRegistry {
    inner: Mutex<HashMap<String, PendingMutation>>,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingMutation>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert(&self, pending: PendingMutation) {
        self.lock().insert(pending.id.clone(), pending);
    }

    /// Remove a pending mutation, stamping its final status.
    pub fn settle(&self, id: &str, status: MutationStatus) -> Option<PendingMutation> {
        self.lock().remove(id).map(|mut pending| {
            pending.status = status;
            pending
        })
    }

    pub fn for_key(&self, key: &EntityKey) -> Vec<PendingMutation> {
        let mut found: Vec<PendingMutation> = self
            .lock()
            .values()
            .filter(|pending| pending.target.as_ref() == Some(key))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }

    pub fn all(&self) -> Vec<PendingMutation> {
        let mut found: Vec<PendingMutation> = self.lock().values().cloned().collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rename(id: i64, name: &str) -> Mutation {
        let delta = json!({ "householdName": name });
        Mutation::update(
            EntityKind::Household,
            id,
            delta.as_object().cloned().unwrap_or_default(),
            CommandCall::new("update_household").arg("id", id),
        )
    }

    #[test]
    fn create_has_no_target() {
        let create = Mutation::create(
            EntityKind::Household,
            Map::new(),
            CommandCall::new("create_household"),
        );
        assert_eq!(create.target(), None);
        assert_eq!(create.label(), "create");
        assert_eq!(
            rename(7, "x").target(),
            Some(EntityKey::new(EntityKind::Household, 7))
        );
    }

    #[test]
    fn registry_tracks_in_flight_mutations_per_key() {
        let registry = PendingRegistry::new();
        let first = PendingMutation::begin(&rename(7, "a"), None, false);
        let second = PendingMutation::begin(&rename(7, "b"), None, false);
        let other = PendingMutation::begin(&rename(8, "c"), None, false);
        let first_id = first.id.clone();
        registry.insert(first);
        registry.insert(second);
        registry.insert(other);

        let key = EntityKey::new(EntityKind::Household, 7);
        assert_eq!(registry.for_key(&key).len(), 2);
        assert_eq!(registry.len(), 3);

        let settled = registry
            .settle(&first_id, MutationStatus::Committed)
            .expect("pending present");
        assert_eq!(settled.status, MutationStatus::Committed);
        assert_eq!(registry.for_key(&key).len(), 1);
        assert!(registry.settle(&first_id, MutationStatus::Committed).is_none());
    }
}
