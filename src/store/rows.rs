use serde_json::{Map, Value};
use sqlx::{sqlite::SqliteRow, Column, Row, TypeInfo, ValueRef};

use crate::error::BACKEND_BAD_ARGS;
use crate::{AppError, AppResult};

pub(crate) type SqliteQuery<'q> =
    sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

/// A table the command layer writes to, with the columns callers may set.
pub(crate) struct Table {
    pub name: &'static str,
    pub writable: &'static [&'static str],
    /// Whether rows carry an `updated_at` change marker.
    pub touched: bool,
}

pub(crate) static HOUSEHOLDS: Table = Table {
    name: "households",
    writable: &["household_name", "address", "city", "postal_code", "notes"],
    touched: true,
};

pub(crate) static PEOPLE: Table = Table {
    name: "people",
    writable: &["household_id", "first_name", "last_name", "is_primary"],
    touched: true,
};

pub(crate) static CONTACTS: Table = Table {
    name: "contacts",
    writable: &["person_id", "contact_type", "contact_value", "is_primary"],
    touched: true,
};

pub(crate) static PATIENTS: Table = Table {
    name: "patients",
    writable: &[
        "household_id",
        "name",
        "species",
        "breed",
        "gender",
        "date_of_birth",
        "color",
        "weight",
        "microchip_id",
        "medical_notes",
        "is_active",
    ],
    touched: true,
};

pub(crate) static MEDICAL_RECORDS: Table = Table {
    name: "medical_records",
    writable: &[
        "patient_id",
        "record_type",
        "name",
        "procedure_name",
        "description",
        "price",
        "currency_id",
        "is_archived",
    ],
    touched: true,
};

pub(crate) static ATTACHMENTS: Table = Table {
    name: "medical_attachments",
    writable: &[
        "medical_record_id",
        "file_id",
        "original_name",
        "file_size",
        "mime_type",
        "attachment_type",
    ],
    touched: false,
};

pub(crate) static APPOINTMENTS: Table = Table {
    name: "appointments",
    writable: &[
        "patient_id",
        "title",
        "description",
        "start_time",
        "end_time",
        "room_id",
        "status",
    ],
    touched: true,
};

pub(crate) fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for ch in name.chars() {
        if ch.is_ascii_uppercase() {
            out.push('_');
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

pub(crate) fn camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = false;
    for ch in name.chars() {
        if ch == '_' {
            upper = true;
        } else if upper {
            out.push(ch.to_ascii_uppercase());
            upper = false;
        } else {
            out.push(ch);
        }
    }
    out
}

/// Rename the keys of a row object to camelCase.
pub(crate) fn camelize(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (camel_case(&key), value))
                .collect(),
        ),
        other => other,
    }
}

pub(crate) fn row_to_value(row: SqliteRow) -> Value {
    let mut map = Map::new();
    for col in row.columns() {
        let idx = col.ordinal();
        let val = match row.try_get_raw(idx).ok() {
            Some(raw) if !raw.is_null() => match raw.type_info().name() {
                "INTEGER" => row
                    .try_get::<i64, _>(idx)
                    .map(Value::from)
                    .unwrap_or(Value::Null),
                "REAL" => row
                    .try_get::<f64, _>(idx)
                    .map(Value::from)
                    .unwrap_or(Value::Null),
                _ => row
                    .try_get::<String, _>(idx)
                    .map(Value::from)
                    .unwrap_or(Value::Null),
            },
            _ => Value::Null,
        };
        map.insert(col.name().to_string(), val);
    }
    Value::Object(map)
}

pub(crate) fn bind_value<'q>(q: SqliteQuery<'q>, v: &Value) -> SqliteQuery<'q> {
    match v {
        Value::Null => q.bind(Option::<i64>::None),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                q.bind(i)
            } else if let Some(f) = n.as_f64() {
                q.bind(f)
            } else {
                q.bind(Option::<i64>::None)
            }
        }
        Value::Bool(b) => q.bind(*b as i64),
        Value::String(s) => q.bind(s.clone()),
        _ => q.bind(v.to_string()),
    }
}

/// Column assignments taken from a wire argument object. Keys are matched in either
/// spelling; `skip` names arguments that address the row rather than change it.
pub(crate) fn writable_columns(
    table: &Table,
    args: &Map<String, Value>,
    skip: &[&str],
) -> AppResult<Vec<(String, Value)>> {
    let mut columns = Vec::new();
    for (key, value) in args {
        if skip.contains(&key.as_str()) {
            continue;
        }
        let column = snake_case(key);
        if !table.writable.contains(&column.as_str()) {
            return Err(AppError::new(BACKEND_BAD_ARGS, "Unknown field for table")
                .with_context("table", table.name)
                .with_context("field", key.clone()));
        }
        columns.push((column, value.clone()));
    }
    Ok(columns)
}

pub(crate) fn arg_i64(args: &Map<String, Value>, names: &[&str]) -> AppResult<i64> {
    opt_i64(args, names).ok_or_else(|| {
        AppError::new(BACKEND_BAD_ARGS, "Missing integer argument")
            .with_context("argument", names.first().copied().unwrap_or_default())
    })
}

pub(crate) fn opt_i64(args: &Map<String, Value>, names: &[&str]) -> Option<i64> {
    names.iter().find_map(|name| match args.get(*name)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

pub(crate) fn arg_str(args: &Map<String, Value>, names: &[&str]) -> AppResult<String> {
    names
        .iter()
        .find_map(|name| args.get(*name).and_then(Value::as_str))
        .map(str::to_string)
        .ok_or_else(|| {
            AppError::new(BACKEND_BAD_ARGS, "Missing text argument")
                .with_context("argument", names.first().copied().unwrap_or_default())
        })
}

pub(crate) fn opt_bool(args: &Map<String, Value>, names: &[&str]) -> Option<bool> {
    names.iter().find_map(|name| match args.get(*name)? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|v| v != 0),
        _ => None,
    })
}
