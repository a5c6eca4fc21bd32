//! Contract for the backend command layer: a command is invoked by name with a JSON
//! parameter object and answers with a JSON payload or a named [`AppError`].
//!
//! Delivery is at-most-once per call and nothing here retries.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{Map, Value};

use crate::AppResult;

pub trait CommandInvoker: Send + Sync {
    fn invoke(&self, command: &str, args: Value) -> BoxFuture<'_, AppResult<Value>>;
}

impl<T> CommandInvoker for Arc<T>
where
    T: CommandInvoker + ?Sized,
{
    fn invoke(&self, command: &str, args: Value) -> BoxFuture<'_, AppResult<Value>> {
        (**self).invoke(command, args)
    }
}

/// A named command together with its parameter object.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandCall {
    pub name: String,
    pub args: Map<String, Value>,
}

impl CommandCall {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Map::new(),
        }
    }

    pub fn arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    pub fn args_value(&self) -> Value {
        Value::Object(self.args.clone())
    }
}

impl fmt::Display for CommandCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builds_argument_object() {
        let call = CommandCall::new("archive_medical_record")
            .arg("record_id", 5)
            .arg("archive", true);
        assert_eq!(call.to_string(), "archive_medical_record");
        assert_eq!(call.args_value(), json!({ "record_id": 5, "archive": true }));
    }
}
