//! Converts backend payloads into canonical records and canonical deltas back into the
//! field names each write endpoint expects.
//!
//! Resolution order for every declared field is: canonical name, then the listed legacy
//! aliases (dotted paths reach into nested objects), each tried at the payload root and
//! then inside the schema's envelope objects. Absent, `null` and uncoercible values all
//! degrade to the field's typed default, so a normalized record always carries every
//! declared field.

use serde_json::{Map, Number, Value};
use tracing::debug;

use crate::cache::{EntityKind, EntityRecord};
use crate::time::{normalize_epoch, parse_timestamp_ms};

pub mod schemas;

pub use schemas::schema_for;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Float,
    Bool,
    /// Milliseconds since the epoch.
    Timestamp,
    List,
}

impl FieldKind {
    pub fn default_value(&self) -> Value {
        match self {
            FieldKind::Text => Value::String(String::new()),
            FieldKind::Integer | FieldKind::Timestamp => Value::from(0_i64),
            FieldKind::Float => Value::from(0.0_f64),
            FieldKind::Bool => Value::Bool(false),
            FieldKind::List => Value::Array(Vec::new()),
        }
    }

    /// Coerce a wire value into this kind, or `None` when it cannot be read as one.
    pub fn coerce(&self, value: &Value) -> Option<Value> {
        match self {
            FieldKind::Text => match value {
                Value::String(s) => Some(Value::String(s.clone())),
                Value::Number(n) => Some(Value::String(n.to_string())),
                Value::Bool(b) => Some(Value::String(b.to_string())),
                _ => None,
            },
            FieldKind::Integer => match value {
                Value::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().map(|f| f as i64))
                    .map(Value::from),
                Value::String(s) => {
                    let trimmed = s.trim();
                    trimmed
                        .parse::<i64>()
                        .ok()
                        .or_else(|| trimmed.parse::<f64>().ok().map(|f| f as i64))
                        .map(Value::from)
                }
                Value::Bool(b) => Some(Value::from(i64::from(*b))),
                _ => None,
            },
            FieldKind::Float => {
                let raw = match value {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse::<f64>().ok(),
                    _ => None,
                }?;
                Number::from_f64(raw).map(Value::Number)
            }
            FieldKind::Bool => match value {
                Value::Bool(b) => Some(Value::Bool(*b)),
                Value::Number(n) => n.as_f64().map(|f| Value::Bool(f != 0.0)),
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" | "yes" => Some(Value::Bool(true)),
                    "false" | "0" | "no" | "" => Some(Value::Bool(false)),
                    _ => None,
                },
                _ => None,
            },
            FieldKind::Timestamp => match value {
                Value::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().map(|f| f as i64))
                    .map(|v| Value::from(normalize_epoch(v))),
                Value::String(s) => parse_timestamp_ms(s).map(Value::from),
                _ => None,
            },
            FieldKind::List => match value {
                Value::Array(items) => Some(Value::Array(items.clone())),
                _ => None,
            },
        }
    }
}

#[derive(Debug)]
pub struct FieldSpec {
    pub canonical: &'static str,
    pub aliases: &'static [&'static str],
    /// Name the write endpoint expects for this field.
    pub wire: &'static str,
    pub kind: FieldKind,
}

#[derive(Debug)]
pub struct EntitySchema {
    pub kind: EntityKind,
    pub fields: &'static [FieldSpec],
    /// Keys under which the backend sometimes wraps the entity.
    pub envelopes: &'static [&'static str],
}

impl EntitySchema {
    pub fn field(&self, canonical: &str) -> Option<&'static FieldSpec> {
        self.fields.iter().find(|spec| spec.canonical == canonical)
    }

    /// Find a field by canonical, wire or alias spelling.
    pub fn resolve(&self, name: &str) -> Option<&'static FieldSpec> {
        self.fields.iter().find(|spec| {
            spec.canonical == name || spec.wire == name || spec.aliases.contains(&name)
        })
    }
}

fn lookup<'a>(raw: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = raw;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

fn candidates(spec: &FieldSpec) -> impl Iterator<Item = &'static str> + '_ {
    std::iter::once(spec.canonical).chain(spec.aliases.iter().copied())
}

fn resolve_field<'a>(schema: &EntitySchema, spec: &FieldSpec, raw: &'a Value) -> Option<&'a Value> {
    candidates(spec)
        .find_map(|name| lookup(raw, name))
        .or_else(|| {
            schema.envelopes.iter().find_map(|envelope| {
                let inner = raw.as_object()?.get(*envelope)?;
                if !inner.is_object() {
                    return None;
                }
                candidates(spec).find_map(|name| lookup(inner, name))
            })
        })
}

/// Normalize one backend payload into a canonical record.
pub fn normalize(kind: EntityKind, raw: &Value) -> EntityRecord {
    let schema = schema_for(kind);
    let mut fields = Map::with_capacity(schema.fields.len());

    for spec in schema.fields {
        let value = match resolve_field(schema, spec, raw) {
            Some(found) => spec.kind.coerce(found).unwrap_or_else(|| {
                debug!(
                    target: "vetclinic",
                    event = "transform_coerce_default",
                    entity = %kind,
                    field = spec.canonical
                );
                spec.kind.default_value()
            }),
            None => spec.kind.default_value(),
        };
        fields.insert(spec.canonical.to_string(), value);
    }

    if kind == EntityKind::Attachment {
        fill_attachment_mime(&mut fields);
    }

    record_from_fields(fields)
}

fn fill_attachment_mime(fields: &mut Map<String, Value>) {
    let missing = fields
        .get("mimeType")
        .and_then(Value::as_str)
        .map_or(true, str::is_empty);
    if !missing {
        return;
    }
    let guessed = fields
        .get("originalName")
        .and_then(Value::as_str)
        .and_then(|name| mime_guess::from_path(name).first_raw());
    if let Some(mime) = guessed {
        fields.insert("mimeType".into(), Value::String(mime.to_string()));
    }
}

fn record_from_fields(fields: Map<String, Value>) -> EntityRecord {
    let id = fields.get("id").and_then(Value::as_i64).unwrap_or(0);
    let updated_at = fields.get("updatedAt").and_then(Value::as_i64).unwrap_or(0);
    EntityRecord::new(id, updated_at, fields)
}

/// Locate the item array inside a list response.
pub fn list_items(raw: &Value) -> &[Value] {
    if let Value::Array(items) = raw {
        return items;
    }
    for key in ["records", "results", "items", "data"] {
        if let Some(Value::Array(items)) = raw.get(key) {
            return items;
        }
    }
    &[]
}

pub fn normalize_list(kind: EntityKind, raw: &Value) -> Vec<EntityRecord> {
    list_items(raw)
        .iter()
        .map(|item| normalize(kind, item))
        .collect()
}

/// Total row count advertised by a paged list response, if any.
pub fn list_total(raw: &Value) -> Option<i64> {
    ["total", "totalCount", "total_count"]
        .iter()
        .find_map(|key| raw.get(*key).and_then(Value::as_i64))
}

/// A schema-complete record for `id` with every field at its default.
pub fn default_record(kind: EntityKind, id: i64) -> EntityRecord {
    let mut fields: Map<String, Value> = schema_for(kind)
        .fields
        .iter()
        .map(|spec| (spec.canonical.to_string(), spec.kind.default_value()))
        .collect();
    fields.insert("id".into(), Value::from(id));
    record_from_fields(fields)
}

/// Rename delta keys to canonical spelling and coerce their values. Keys the schema
/// does not know are kept as-is.
pub fn canonical_delta(kind: EntityKind, delta: &Map<String, Value>) -> Map<String, Value> {
    let schema = schema_for(kind);
    delta
        .iter()
        .map(|(key, value)| match schema.resolve(key) {
            Some(spec) => (
                spec.canonical.to_string(),
                spec.kind
                    .coerce(value)
                    .unwrap_or_else(|| spec.kind.default_value()),
            ),
            None => (key.clone(), value.clone()),
        })
        .collect()
}

/// Rename canonical delta keys to the write endpoint's field names.
pub fn to_wire(kind: EntityKind, delta: &Map<String, Value>) -> Map<String, Value> {
    let schema = schema_for(kind);
    let mut wire = Map::with_capacity(delta.len());
    for (key, value) in delta {
        match schema.resolve(key) {
            Some(spec) => {
                wire.insert(spec.wire.to_string(), value.clone());
            }
            None => {
                debug!(
                    target: "vetclinic",
                    event = "transform_unknown_outbound_field",
                    entity = %kind,
                    field = key.as_str()
                );
                wire.insert(key.clone(), value.clone());
            }
        }
    }
    wire
}
