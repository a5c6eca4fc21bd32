use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::cache::EntityKind;
use crate::command::CommandInvoker;
use crate::error::BACKEND_NOT_FOUND;
use crate::transform::{list_items, normalize};
use crate::AppError;

pub const ACTIVE_HOUSEHOLD_KEY: &str = "activeHouseholdId";

trait ActiveStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn save(&self) -> anyhow::Result<()>;
}

/// Small JSON object on disk, loaded once and rewritten on save.
struct JsonFileStore {
    path: PathBuf,
    data: Mutex<HashMap<String, String>>,
}

impl JsonFileStore {
    fn open(path: PathBuf) -> Self {
        let data = fs::read_to_string(&path)
            .ok()
            .and_then(|text| serde_json::from_str::<HashMap<String, String>>(&text).ok())
            .unwrap_or_default();
        Self {
            path,
            data: Mutex::new(data),
        }
    }
}

impl ActiveStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.data
            .lock()
            .map(|guard| guard.get(key).cloned())
            .unwrap_or_default()
    }

    fn set(&self, key: &str, value: &str) {
        if let Ok(mut guard) = self.data.lock() {
            guard.insert(key.to_string(), value.to_string());
        }
    }

    fn save(&self) -> anyhow::Result<()> {
        let text = {
            let guard = self
                .data
                .lock()
                .map_err(|_| anyhow::anyhow!("active household store poisoned"))?;
            serde_json::to_string_pretty(&*guard)?
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create store directory {}", parent.display()))?;
        }
        fs::write(&self.path, text)
            .with_context(|| format!("write active household store {}", self.path.display()))
    }
}

#[derive(Default)]
struct MemoryStore {
    data: Mutex<HashMap<String, String>>,
}

impl ActiveStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.data
            .lock()
            .map(|guard| guard.get(key).cloned())
            .unwrap_or_default()
    }

    fn set(&self, key: &str, value: &str) {
        if let Ok(mut guard) = self.data.lock() {
            guard.insert(key.to_string(), value.to_string());
        }
    }

    fn save(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<dyn ActiveStore + Send + Sync>,
}

impl StoreHandle {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(JsonFileStore::open(path.into())),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(MemoryStore::default()),
        }
    }

    fn read_active(&self) -> Option<i64> {
        self.inner
            .get(ACTIVE_HOUSEHOLD_KEY)
            .and_then(|value| value.parse().ok())
    }

    fn write_active(&self, id: i64) {
        self.inner.set(ACTIVE_HOUSEHOLD_KEY, &id.to_string());
    }

    fn persist(&self) -> anyhow::Result<()> {
        self.inner.save()
    }

    pub fn snapshot(&self) -> Option<i64> {
        self.read_active()
    }
}

#[derive(Error, Debug)]
pub enum ActiveSetError {
    #[error("household not found")]
    NotFound,
    #[error("household lookup failed: {0}")]
    Lookup(AppError),
}

impl From<ActiveSetError> for AppError {
    fn from(err: ActiveSetError) -> Self {
        match err {
            ActiveSetError::NotFound => AppError::new(BACKEND_NOT_FOUND, "Household not found"),
            ActiveSetError::Lookup(inner) => inner,
        }
    }
}

async fn household_exists(invoker: &dyn CommandInvoker, id: i64) -> Result<bool, AppError> {
    match invoker.invoke("get_household", json!({ "id": id })).await {
        Ok(Value::Null) => Ok(false),
        Ok(_) => Ok(true),
        Err(err) if err.code() == BACKEND_NOT_FOUND => Ok(false),
        Err(err) => Err(err),
    }
}

async fn first_household(invoker: &dyn CommandInvoker) -> Result<Option<i64>, AppError> {
    let response = invoker.invoke("list_households", json!({})).await?;
    Ok(list_items(&response)
        .iter()
        .map(|item| normalize(EntityKind::Household, item).id)
        .find(|id| *id != 0))
}

/// The stored selection when it still exists, otherwise the first household the
/// backend lists. A fallback is written back to the store.
pub async fn get_active_household_id(
    invoker: &dyn CommandInvoker,
    store: &StoreHandle,
) -> Result<Option<i64>, AppError> {
    let reason = match store.read_active() {
        Some(candidate) => {
            if household_exists(invoker, candidate).await? {
                return Ok(Some(candidate));
            }
            "not_found"
        }
        None => "missing",
    };

    let Some(fallback) = first_household(invoker).await? else {
        return Ok(None);
    };
    store.write_active(fallback);
    store
        .persist()
        .context("persist active household selection")?;
    info!(
        target: "vetclinic",
        event = "active_household_fallback",
        reason,
        chosen_id = fallback
    );
    Ok(Some(fallback))
}

pub async fn set_active_household_id(
    invoker: &dyn CommandInvoker,
    store: &StoreHandle,
    id: i64,
) -> Result<(), ActiveSetError> {
    match household_exists(invoker, id).await {
        Ok(true) => {
            store.write_active(id);
            if let Err(err) = store.persist() {
                warn!(
                    target: "vetclinic",
                    event = "active_household_store_save_failed",
                    error = %err
                );
            }
            Ok(())
        }
        Ok(false) => {
            warn!(
                target: "vetclinic",
                event = "active_household_set_rejected",
                reason = "not_found",
                id
            );
            Err(ActiveSetError::NotFound)
        }
        Err(err) => Err(ActiveSetError::Lookup(err)),
    }
}
