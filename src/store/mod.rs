//! In-process command layer over SQLite.
//!
//! Answers the same commands as the clinic backend, in the same uneven shapes: household
//! detail arrives nested under `household` with snake_case columns, household lists and
//! patients are flattened camelCase, medical records come wrapped in a `record` envelope,
//! attachment pages sit under `data`, and appointment times are RFC 3339 text.

use std::path::Path;
use std::str::FromStr;

use futures::future::BoxFuture;
use serde_json::{json, Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::debug;

use crate::command::CommandInvoker;
use crate::error::{BACKEND_BAD_ARGS, BACKEND_NOT_FOUND, BACKEND_UNKNOWN_COMMAND};
use crate::id::new_uuid_v7;
use crate::time::{now_ms, parse_timestamp_ms, to_rfc3339_ms};
use crate::{AppError, AppResult};

pub mod migrate;
mod rows;

use rows::{
    arg_i64, arg_str, bind_value, camelize, opt_bool, opt_i64, row_to_value, writable_columns,
    Table, APPOINTMENTS, ATTACHMENTS, CONTACTS, HOUSEHOLDS, MEDICAL_RECORDS, PATIENTS, PEOPLE,
};

const DEFAULT_PAGE_SIZE: i64 = 50;

#[derive(Clone)]
pub struct SqliteCommandLayer {
    pool: SqlitePool,
}

fn not_found(table: &str, id: i64) -> AppError {
    AppError::new(BACKEND_NOT_FOUND, "Record not found")
        .with_context("table", table.to_string())
        .with_context("id", id.to_string())
}

fn args_object(args: Value) -> AppResult<Map<String, Value>> {
    match args {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(AppError::new(BACKEND_BAD_ARGS, "Arguments must be an object")
            .with_context("received", other.to_string())),
    }
}

fn flags_to_bool(mut row: Value, columns: &[&str]) -> Value {
    if let Some(map) = row.as_object_mut() {
        for column in columns {
            if let Some(flag) = map.get(*column).and_then(Value::as_i64) {
                map.insert((*column).to_string(), Value::Bool(flag != 0));
            }
        }
    }
    row
}

fn timestamps_to_text(mut row: Value, columns: &[&str]) -> Value {
    if let Some(map) = row.as_object_mut() {
        for column in columns {
            if let Some(ms) = map.get(*column).and_then(Value::as_i64) {
                map.insert((*column).to_string(), Value::String(to_rfc3339_ms(ms)));
            }
        }
    }
    row
}

/// Appointment times arrive as RFC 3339 text or epoch milliseconds; columns hold milliseconds.
fn times_to_ms(mut args: Map<String, Value>) -> AppResult<Map<String, Value>> {
    for column in ["start_time", "end_time"] {
        if let Some(Value::String(text)) = args.get(column) {
            let ms = parse_timestamp_ms(text).ok_or_else(|| {
                AppError::new(BACKEND_BAD_ARGS, "Unreadable timestamp").with_context("field", column)
            })?;
            args.insert(column.to_string(), Value::from(ms));
        }
    }
    Ok(args)
}

fn history_values(raw: &str) -> AppResult<Map<String, Value>> {
    match serde_json::from_str(raw)? {
        Value::Object(map) => Ok(map),
        other => Err(AppError::new(BACKEND_BAD_ARGS, "History entry is not an object")
            .with_context("received", other.to_string())),
    }
}

impl SqliteCommandLayer {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database at `path` and bring its schema up to date.
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        migrate::apply_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// A private in-memory database, used by tests.
    pub async fn in_memory() -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        migrate::apply_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn dispatch(&self, command: &str, args: Value) -> AppResult<Value> {
        let args = args_object(args)?;
        debug!(target: "vetclinic", event = "store_command", command);
        match command {
            "get_household" => self.get_household(arg_i64(&args, &["id", "household_id"])?).await,
            "list_households" => self.list_households().await,
            "create_household" => self.create_household(&args).await,
            "update_household" => {
                let id = arg_i64(&args, &["id"])?;
                self.update_row(&HOUSEHOLDS, id, &args, &["id"]).await?;
                self.household_detail(id, false).await
            }
            "delete_household" => {
                self.delete_row(&HOUSEHOLDS, arg_i64(&args, &["id"])?).await?;
                Ok(Value::Null)
            }
            "list_people" => {
                let household_id = arg_i64(&args, &["household_id", "householdId"])?;
                Ok(json!({ "results": self.people_with_contacts(household_id).await? }))
            }
            "update_person" => {
                let id = arg_i64(&args, &["id"])?;
                self.update_row(&PEOPLE, id, &args, &["id"]).await?;
                self.fetch_row(&PEOPLE, id).await
            }
            "list_contacts" => {
                let person_id = arg_i64(&args, &["person_id", "personId"])?;
                self.list_where(&CONTACTS, "person_id", person_id, "id").await
                    .map(Value::Array)
            }
            "update_contact" => {
                let id = arg_i64(&args, &["id"])?;
                self.update_row(&CONTACTS, id, &args, &["id"]).await?;
                self.fetch_row(&CONTACTS, id).await
            }
            "get_patient" => {
                let id = arg_i64(&args, &["id", "patientId"])?;
                self.fetch_row(&PATIENTS, id).await.map(camelize)
            }
            "list_patients" => {
                let household_id = arg_i64(&args, &["householdId", "household_id"])?;
                let items: Vec<Value> = self
                    .list_where(&PATIENTS, "household_id", household_id, "name")
                    .await?
                    .into_iter()
                    .map(camelize)
                    .collect();
                Ok(json!({ "total": items.len(), "items": items }))
            }
            "create_patient" => self.create_patient(&args).await,
            "update_patient" => {
                let id = arg_i64(&args, &["id"])?;
                self.update_row(&PATIENTS, id, &args, &["id"]).await?;
                self.fetch_row(&PATIENTS, id).await.map(camelize)
            }
            "get_medical_record" => {
                let id = arg_i64(&args, &["recordId", "record_id", "id"])?;
                self.medical_record_detail(id).await
            }
            "list_medical_records" => self.list_medical_records(&args).await,
            "create_medical_record" => self.create_medical_record(&args).await,
            "update_medical_record" => {
                let id = arg_i64(&args, &["id", "recordId"])?;
                let record = self
                    .update_medical_record(id, &args, &["id", "recordId"])
                    .await?;
                Ok(json!({ "record": camelize(record) }))
            }
            "archive_medical_record" => {
                let id = arg_i64(&args, &["recordId", "record_id", "id"])?;
                let archive = opt_bool(&args, &["archive", "isArchived"]).unwrap_or(true);
                let mut update = Map::new();
                update.insert("is_archived".into(), Value::Bool(archive));
                self.update_medical_record(id, &update, &[]).await?;
                Ok(Value::Null)
            }
            "revert_medical_record" => {
                let id = arg_i64(&args, &["recordId", "record_id", "id"])?;
                let record = self.revert_medical_record(id).await?;
                Ok(json!({ "record": camelize(record) }))
            }
            "get_medical_record_at_version" => {
                let id = arg_i64(&args, &["recordId", "record_id", "id"])?;
                let version = arg_i64(&args, &["version"])?;
                let record = self.medical_record_at_version(id, version).await?;
                Ok(json!({ "record": camelize(record) }))
            }
            "list_medical_attachments" => self.list_attachments(&args).await,
            "upload_medical_attachment" => self.upload_attachment(&args).await,
            "delete_medical_attachment" => {
                self.delete_row(&ATTACHMENTS, arg_i64(&args, &["id", "attachmentId"])?)
                    .await?;
                Ok(Value::Null)
            }
            "list_appointments" => {
                let patient_id = arg_i64(&args, &["patient_id", "patientId"])?;
                let rows = self
                    .list_where(&APPOINTMENTS, "patient_id", patient_id, "start_time")
                    .await?;
                Ok(Value::Array(
                    rows.into_iter()
                        .map(|row| timestamps_to_text(row, &["start_time", "end_time"]))
                        .collect(),
                ))
            }
            "create_appointment" => self.create_appointment(args).await,
            "update_appointment" => {
                let id = arg_i64(&args, &["id"])?;
                let args = times_to_ms(args)?;
                self.update_row(&APPOINTMENTS, id, &args, &["id"]).await?;
                let row = self.fetch_row(&APPOINTMENTS, id).await?;
                Ok(timestamps_to_text(row, &["start_time", "end_time"]))
            }
            "delete_appointment" => {
                self.delete_row(&APPOINTMENTS, arg_i64(&args, &["id", "appointmentId"])?)
                    .await?;
                Ok(Value::Null)
            }
            other => Err(AppError::new(BACKEND_UNKNOWN_COMMAND, "Unknown command")
                .with_context("command", other.to_string())),
        }
    }

    async fn fetch_row(&self, table: &Table, id: i64) -> AppResult<Value> {
        let sql = format!("SELECT * FROM {} WHERE id = ?", table.name);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_value)
            .ok_or_else(|| not_found(table.name, id))
    }

    async fn list_where(
        &self,
        table: &Table,
        column: &str,
        value: i64,
        order_by: &str,
    ) -> AppResult<Vec<Value>> {
        let sql = format!(
            "SELECT * FROM {} WHERE {column} = ? ORDER BY {order_by}, id",
            table.name
        );
        let rows = sqlx::query(&sql).bind(value).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(row_to_value).collect())
    }

    async fn insert_row(&self, table: &Table, columns: Vec<(String, Value)>) -> AppResult<i64> {
        let mut columns = columns;
        if table.touched {
            let now = now_ms();
            columns.push(("created_at".into(), Value::from(now)));
            columns.push(("updated_at".into(), Value::from(now)));
        }
        let names: Vec<&str> = columns.iter().map(|(name, _)| name.as_str()).collect();
        let placeholders = vec!["?"; names.len()].join(",");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            table.name,
            names.join(",")
        );
        let mut query = sqlx::query(&sql);
        for (_, value) in &columns {
            query = bind_value(query, value);
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.last_insert_rowid())
    }

    async fn update_row(
        &self,
        table: &Table,
        id: i64,
        args: &Map<String, Value>,
        skip: &[&str],
    ) -> AppResult<()> {
        let columns = writable_columns(table, args, skip)?;
        let mut assignments: Vec<String> = columns
            .iter()
            .map(|(column, _)| format!("{column} = ?"))
            .collect();
        if table.touched {
            // Strictly increasing even when two writes land in the same millisecond.
            assignments.push("updated_at = MAX(?, updated_at + 1)".into());
        }
        if table.name == MEDICAL_RECORDS.name {
            assignments.push("version = version + 1".into());
        }
        if assignments.is_empty() {
            return Err(AppError::new(BACKEND_BAD_ARGS, "Nothing to update")
                .with_context("table", table.name));
        }

        let sql = format!(
            "UPDATE {} SET {} WHERE id = ?",
            table.name,
            assignments.join(", ")
        );
        let mut query = sqlx::query(&sql);
        for (_, value) in &columns {
            query = bind_value(query, value);
        }
        if table.touched {
            query = query.bind(now_ms());
        }
        let result = query.bind(id).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(not_found(table.name, id));
        }
        Ok(())
    }

    async fn delete_row(&self, table: &Table, id: i64) -> AppResult<()> {
        let sql = format!("DELETE FROM {} WHERE id = ?", table.name);
        let result = sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(not_found(table.name, id));
        }
        Ok(())
    }

    async fn people_with_contacts(&self, household_id: i64) -> AppResult<Vec<Value>> {
        let mut people = self
            .list_where(&PEOPLE, "household_id", household_id, "is_primary DESC, id")
            .await?;
        for person in &mut people {
            let Some(person_id) = person.get("id").and_then(Value::as_i64) else {
                continue;
            };
            let contacts: Vec<Value> = self
                .list_where(&CONTACTS, "person_id", person_id, "id")
                .await?
                .into_iter()
                .map(|contact| flags_to_bool(contact, &["is_primary"]))
                .collect();
            if let Some(map) = person.as_object_mut() {
                map.insert("contacts".into(), Value::Array(contacts));
            }
        }
        Ok(people)
    }

    async fn household_detail(&self, id: i64, with_people: bool) -> AppResult<Value> {
        let mut household = self.fetch_row(&HOUSEHOLDS, id).await?;
        let pet_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM patients WHERE household_id = ?")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        let people = self.people_with_contacts(id).await?;
        // Legacy shape: contacts flattened onto the household with short key names.
        let contacts: Vec<Value> = people
            .iter()
            .filter_map(|person| person.get("contacts").and_then(Value::as_array))
            .flatten()
            .map(|contact| {
                json!({
                    "type": contact.get("contact_type").and_then(Value::as_str).unwrap_or_default(),
                    "value": contact.get("contact_value").and_then(Value::as_str).unwrap_or_default(),
                    "is_primary": contact.get("is_primary").and_then(Value::as_bool).unwrap_or(false),
                })
            })
            .collect();
        if let Some(map) = household.as_object_mut() {
            map.insert("pet_count".into(), Value::from(pet_count));
            map.insert("contacts".into(), Value::Array(contacts));
        }
        if with_people {
            Ok(json!({ "household": household, "people": people }))
        } else {
            Ok(json!({ "household": household }))
        }
    }

    async fn get_household(&self, id: i64) -> AppResult<Value> {
        self.household_detail(id, true).await
    }

    async fn list_households(&self) -> AppResult<Value> {
        let rows = sqlx::query(
            "SELECT h.*, (SELECT COUNT(*) FROM patients p WHERE p.household_id = h.id) AS pet_count \
             FROM households h ORDER BY h.household_name, h.id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(Value::Array(
            rows.into_iter()
                .map(|row| camelize(row_to_value(row)))
                .collect(),
        ))
    }

    async fn create_household(&self, args: &Map<String, Value>) -> AppResult<Value> {
        arg_str(args, &["household_name", "householdName"])?;
        let columns = writable_columns(&HOUSEHOLDS, args, &[])?;
        let id = self.insert_row(&HOUSEHOLDS, columns).await?;
        self.household_detail(id, false).await
    }

    async fn create_patient(&self, args: &Map<String, Value>) -> AppResult<Value> {
        arg_str(args, &["name"])?;
        let columns = writable_columns(&PATIENTS, args, &[])?;
        let id = self.insert_row(&PATIENTS, columns).await?;
        self.fetch_row(&PATIENTS, id).await.map(camelize)
    }

    async fn create_medical_record(&self, args: &Map<String, Value>) -> AppResult<Value> {
        let patient_id = arg_i64(args, &["patientId", "patient_id"])?;
        arg_str(args, &["name"])?;
        self.fetch_row(&PATIENTS, patient_id).await?;
        let columns = writable_columns(&MEDICAL_RECORDS, args, &[])?;
        let id = self.insert_row(&MEDICAL_RECORDS, columns).await?;
        let record = self.fetch_row(&MEDICAL_RECORDS, id).await?;
        Ok(json!({ "record": camelize(record) }))
    }

    async fn create_appointment(&self, args: Map<String, Value>) -> AppResult<Value> {
        let patient_id = arg_i64(&args, &["patient_id", "patientId"])?;
        arg_str(&args, &["title"])?;
        let args = times_to_ms(args)?;
        for column in ["start_time", "end_time"] {
            arg_i64(&args, &[column])?;
        }
        self.fetch_row(&PATIENTS, patient_id).await?;
        let columns = writable_columns(&APPOINTMENTS, &args, &[])?;
        let id = self.insert_row(&APPOINTMENTS, columns).await?;
        let row = self.fetch_row(&APPOINTMENTS, id).await?;
        Ok(timestamps_to_text(row, &["start_time", "end_time"]))
    }

    /// Apply a change and record the columns it replaced under the version it produced.
    async fn update_medical_record(
        &self,
        id: i64,
        args: &Map<String, Value>,
        skip: &[&str],
    ) -> AppResult<Value> {
        let before = self.fetch_row(&MEDICAL_RECORDS, id).await?;
        self.update_row(&MEDICAL_RECORDS, id, args, skip).await?;
        let after = self.fetch_row(&MEDICAL_RECORDS, id).await?;

        let mut old_values = Map::new();
        let mut new_values = Map::new();
        for (column, _) in writable_columns(&MEDICAL_RECORDS, args, skip)? {
            old_values.insert(column.clone(), before.get(&column).cloned().unwrap_or(Value::Null));
            new_values.insert(column.clone(), after.get(&column).cloned().unwrap_or(Value::Null));
        }
        let version = after.get("version").and_then(Value::as_i64).unwrap_or(1);
        sqlx::query(
            "INSERT INTO medical_record_history \
             (medical_record_id, version, old_values, new_values, changed_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(version)
        .bind(Value::Object(old_values).to_string())
        .bind(Value::Object(new_values).to_string())
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        debug!(target: "vetclinic", event = "medical_record_versioned", id, version);
        Ok(after)
    }

    /// Undo the latest change by writing back the values it replaced. The undo is itself
    /// a new version, so reverting twice restores the change.
    async fn revert_medical_record(&self, id: i64) -> AppResult<Value> {
        self.fetch_row(&MEDICAL_RECORDS, id).await?;
        let latest: Option<String> = sqlx::query_scalar(
            "SELECT old_values FROM medical_record_history \
             WHERE medical_record_id = ? ORDER BY version DESC LIMIT 1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        let latest = latest.ok_or_else(|| {
            AppError::new(BACKEND_NOT_FOUND, "No earlier version to revert to")
                .with_context("id", id.to_string())
        })?;
        let restore = history_values(&latest)?;
        self.update_medical_record(id, &restore, &[]).await
    }

    /// Rebuild a record as it stood at `version` by undoing every later change.
    async fn medical_record_at_version(&self, id: i64, version: i64) -> AppResult<Value> {
        let mut record = self.fetch_row(&MEDICAL_RECORDS, id).await?;
        let current = record.get("version").and_then(Value::as_i64).unwrap_or(1);
        if !(1..=current).contains(&version) {
            return Err(AppError::new(BACKEND_NOT_FOUND, "No such version")
                .with_context("id", id.to_string())
                .with_context("version", version.to_string()));
        }
        let later: Vec<String> = sqlx::query_scalar(
            "SELECT old_values FROM medical_record_history \
             WHERE medical_record_id = ? AND version > ? ORDER BY version DESC",
        )
        .bind(id)
        .bind(version)
        .fetch_all(&self.pool)
        .await?;
        if let Some(map) = record.as_object_mut() {
            for raw in &later {
                map.extend(history_values(raw)?);
            }
            map.insert("version".into(), Value::from(version));
        }
        Ok(record)
    }

    async fn medical_record_detail(&self, id: i64) -> AppResult<Value> {
        let record = self.fetch_row(&MEDICAL_RECORDS, id).await?;
        let attachments = self
            .list_where(&ATTACHMENTS, "medical_record_id", id, "uploaded_at")
            .await?;
        Ok(json!({
            "record": camelize(record),
            "attachments": attachments.into_iter().map(camelize).collect::<Vec<_>>(),
        }))
    }

    async fn list_medical_records(&self, args: &Map<String, Value>) -> AppResult<Value> {
        let patient_id = arg_i64(args, &["patientId", "patient_id"])?;
        let page = opt_i64(args, &["page"]).filter(|p| *p > 0).unwrap_or(1);
        let page_size = opt_i64(args, &["pageSize", "page_size"])
            .filter(|p| *p > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE);
        let archived = opt_bool(args, &["isArchived", "includeArchived"]).unwrap_or(false);

        let rows = sqlx::query(
            "SELECT * FROM medical_records WHERE patient_id = ? AND is_archived = ? \
             ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
        )
        .bind(patient_id)
        .bind(archived as i64)
        .bind(page_size)
        .bind((page - 1) * page_size)
        .fetch_all(&self.pool)
        .await?;
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM medical_records WHERE patient_id = ? AND is_archived = ?",
        )
        .bind(patient_id)
        .bind(archived as i64)
        .fetch_one(&self.pool)
        .await?;

        let records: Vec<Value> = rows
            .into_iter()
            .map(|row| camelize(row_to_value(row)))
            .collect();
        Ok(json!({
            "records": records,
            "total": total,
            "page": page,
            "pageSize": page_size,
        }))
    }

    async fn list_attachments(&self, args: &Map<String, Value>) -> AppResult<Value> {
        let record_id = arg_i64(args, &["recordId", "medical_record_id", "medicalRecordId"])?;
        let page = opt_i64(args, &["page"]).filter(|p| *p > 0).unwrap_or(1);
        let page_size = opt_i64(args, &["pageSize", "page_size"])
            .filter(|p| *p > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE);

        let rows = sqlx::query(
            "SELECT * FROM medical_attachments WHERE medical_record_id = ? \
             ORDER BY uploaded_at, id LIMIT ? OFFSET ?",
        )
        .bind(record_id)
        .bind(page_size)
        .bind((page - 1) * page_size)
        .fetch_all(&self.pool)
        .await?;
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM medical_attachments WHERE medical_record_id = ?")
                .bind(record_id)
                .fetch_one(&self.pool)
                .await?;
        let data: Vec<Value> = rows.into_iter().map(row_to_value).collect();
        Ok(json!({ "data": data, "total": total }))
    }

    async fn upload_attachment(&self, args: &Map<String, Value>) -> AppResult<Value> {
        let record_id = arg_i64(args, &["medicalRecordId", "medical_record_id", "recordId"])?;
        self.fetch_row(&MEDICAL_RECORDS, record_id).await?;
        let original_name = arg_str(args, &["fileName", "originalName", "original_name"])?;
        let file_size = opt_i64(args, &["fileSize", "file_size"]).unwrap_or(0);
        let mime_type = args
            .get("mimeType")
            .and_then(Value::as_str)
            .filter(|mime| !mime.is_empty())
            .map(str::to_string);

        let columns = vec![
            ("medical_record_id".to_string(), Value::from(record_id)),
            ("file_id".to_string(), Value::String(new_uuid_v7())),
            ("original_name".to_string(), Value::String(original_name)),
            ("file_size".to_string(), Value::from(file_size)),
            (
                "mime_type".to_string(),
                mime_type.map(Value::String).unwrap_or(Value::Null),
            ),
            ("uploaded_at".to_string(), Value::from(now_ms())),
        ];
        let id = self.insert_row(&ATTACHMENTS, columns).await?;
        self.fetch_row(&ATTACHMENTS, id).await
    }

    /// Insert rows directly, bypassing command validation. Used to seed fixtures.
    pub async fn seed(&self, table: &str, row: Value) -> AppResult<i64> {
        let table = [
            &HOUSEHOLDS,
            &PEOPLE,
            &CONTACTS,
            &PATIENTS,
            &MEDICAL_RECORDS,
            &ATTACHMENTS,
            &APPOINTMENTS,
        ]
        .into_iter()
        .find(|candidate| candidate.name == table)
        .ok_or_else(|| {
            AppError::new(BACKEND_BAD_ARGS, "Unknown table").with_context("table", table.to_string())
        })?;
        let args = args_object(row)?;
        let mut columns = writable_columns(table, &args, &["uploaded_at"])?;
        if table.name == ATTACHMENTS.name {
            let uploaded = opt_i64(&args, &["uploaded_at"]).unwrap_or_else(now_ms);
            columns.push(("uploaded_at".into(), Value::from(uploaded)));
        }
        self.insert_row(table, columns).await
    }
}

impl CommandInvoker for SqliteCommandLayer {
    fn invoke(&self, command: &str, args: Value) -> BoxFuture<'_, AppResult<Value>> {
        let command = command.to_string();
        Box::pin(async move { self.dispatch(&command, args).await })
    }
}
