#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{json, Value};
use tokio::sync::oneshot;

use vetclinic_lib::command::CommandInvoker;
use vetclinic_lib::store::SqliteCommandLayer;
use vetclinic_lib::{AppError, AppResult};

/// What a held call does once the test lets it go.
pub enum Release {
    /// Pass the call through to the wrapped backend.
    Forward,
    Respond(AppResult<Value>),
    Panic,
}

/// Wraps a backend, records every call and can hold chosen calls until released.
pub struct GatedInvoker {
    inner: Arc<dyn CommandInvoker>,
    calls: Mutex<Vec<(String, Value)>>,
    gates: Mutex<HashMap<String, VecDeque<oneshot::Receiver<Release>>>>,
}

pub struct Gate(oneshot::Sender<Release>);

impl Gate {
    pub fn release(self, release: Release) {
        let _ = self.0.send(release);
    }

    pub fn forward(self) {
        self.release(Release::Forward);
    }

    pub fn fail(self, code: &str) {
        self.release(Release::Respond(Err(AppError::new(
            code.to_string(),
            "backend refused",
        ))));
    }
}

impl GatedInvoker {
    pub fn new(inner: Arc<dyn CommandInvoker>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            calls: Mutex::new(Vec::new()),
            gates: Mutex::new(HashMap::new()),
        })
    }

    /// Hold the next call to `command` until the returned gate is released.
    pub fn hold(&self, command: &str) -> Gate {
        let (tx, rx) = oneshot::channel();
        self.gates
            .lock()
            .unwrap()
            .entry(command.to_string())
            .or_default()
            .push_back(rx);
        Gate(tx)
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, command: &str) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == command)
            .map(|(_, args)| args.clone())
            .collect()
    }

    pub async fn wait_for_calls(&self, command: &str, count: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.calls_to(command).len() < count {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {count} call(s) to {command}"
            );
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

impl CommandInvoker for GatedInvoker {
    fn invoke(&self, command: &str, args: Value) -> BoxFuture<'_, AppResult<Value>> {
        self.calls
            .lock()
            .unwrap()
            .push((command.to_string(), args.clone()));
        let gate = self
            .gates
            .lock()
            .unwrap()
            .get_mut(command)
            .and_then(VecDeque::pop_front);
        let command = command.to_string();
        Box::pin(async move {
            let release = match gate {
                Some(rx) => rx.await.unwrap_or(Release::Forward),
                None => Release::Forward,
            };
            match release {
                Release::Forward => self.inner.invoke(&command, args).await,
                Release::Respond(result) => result,
                Release::Panic => panic!("backend panicked while handling {command}"),
            }
        })
    }
}

pub async fn memory_store() -> SqliteCommandLayer {
    SqliteCommandLayer::in_memory()
        .await
        .expect("open in-memory store")
}

/// Households "Smith" (id 1) and "Doe" (id 2), a person with an email contact, a
/// patient with two medical records and an appointment.
pub async fn seeded_store() -> SqliteCommandLayer {
    let store = memory_store().await;
    let smith = store
        .seed("households", json!({ "household_name": "Smith", "city": "Cork" }))
        .await
        .unwrap();
    store
        .seed("households", json!({ "household_name": "Doe" }))
        .await
        .unwrap();
    let person = store
        .seed(
            "people",
            json!({ "household_id": smith, "first_name": "Ann", "last_name": "Smith", "is_primary": true }),
        )
        .await
        .unwrap();
    store
        .seed(
            "contacts",
            json!({ "person_id": person, "contact_type": "email", "contact_value": "ann@example.com" }),
        )
        .await
        .unwrap();
    let patient = store
        .seed(
            "patients",
            json!({ "household_id": smith, "name": "Rex", "species": "dog", "weight": 21.5 }),
        )
        .await
        .unwrap();
    for name in ["Vaccination", "Dental"] {
        store
            .seed(
                "medical_records",
                json!({ "patient_id": patient, "record_type": "procedure", "name": name, "description": "routine" }),
            )
            .await
            .unwrap();
    }
    store
        .seed(
            "appointments",
            json!({
                "patient_id": patient,
                "title": "Booster",
                "start_time": 1_704_067_200_000_i64,
                "end_time": 1_704_069_000_000_i64
            }),
        )
        .await
        .unwrap();
    store
}
