use std::collections::HashMap;
use std::time::Instant;

use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

use crate::cache::EntityKey;
use crate::AppError;

fn context_to_json(context: &HashMap<String, String>) -> Option<Value> {
    if context.is_empty() {
        None
    } else {
        let mut map = Map::with_capacity(context.len());
        for (key, value) in context {
            map.insert(key.clone(), Value::String(value.clone()));
        }
        Some(Value::Object(map))
    }
}

fn wrap_details(value: Value) -> Value {
    if value.is_object() {
        value
    } else {
        json!({ "value": value })
    }
}

/// Timing and outcome logging for one mutation, from dispatch to settle.
pub struct LogScope {
    cmd: String,
    op: &'static str,
    key: Option<String>,
    start: Instant,
}

impl LogScope {
    pub fn new(cmd: &str, op: &'static str, key: Option<&EntityKey>) -> Self {
        let scope = Self {
            cmd: cmd.to_string(),
            op,
            key: key.map(ToString::to_string),
            start: Instant::now(),
        };
        let details = json!({ "stage": "enter" });
        debug!(
            target: "vetclinic",
            area = "mutation",
            cmd = scope.cmd.as_str(),
            op = scope.op,
            key = scope.key.as_deref(),
            details = %details
        );
        scope
    }

    fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    pub fn success(&self, key: Option<&EntityKey>, details: Value) {
        let resolved = key.map(ToString::to_string).or_else(|| self.key.clone());
        info!(
            target: "vetclinic",
            area = "mutation",
            cmd = self.cmd.as_str(),
            op = self.op,
            key = resolved.as_deref(),
            duration_ms = self.elapsed_ms(),
            details = %wrap_details(details)
        );
    }

    pub fn warn(&self, details: Value) {
        warn!(
            target: "vetclinic",
            area = "mutation",
            cmd = self.cmd.as_str(),
            op = self.op,
            key = self.key.as_deref(),
            duration_ms = self.elapsed_ms(),
            details = %wrap_details(details)
        );
    }

    pub fn fail(&self, err: &AppError) {
        let mut map = Map::new();
        map.insert("code".into(), Value::String(err.code().to_string()));
        map.insert("message".into(), Value::String(err.message().to_string()));
        if let Some(context) = context_to_json(err.context()) {
            map.insert("context".into(), context);
        }

        if err.is_validation() {
            self.warn(Value::Object(map));
            return;
        }

        if let Some(crash) = err.crash_id() {
            map.insert("crash_id".into(), Value::String(crash.to_string()));
        }
        let details = Value::Object(map);
        error!(
            target: "vetclinic",
            area = "mutation",
            cmd = self.cmd.as_str(),
            op = self.op,
            key = self.key.as_deref(),
            duration_ms = self.elapsed_ms(),
            details = %details
        );
    }
}
