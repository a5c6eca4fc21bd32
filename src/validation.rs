//! Checks run on caller input before a mutation is built. Failures never reach the
//! coordinator and surface as `VALIDATION/*` errors.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::entities::{
    AppointmentDraft, AppointmentUpdate, AttachmentUpload, ContactUpdate, HouseholdUpdate,
    MedicalRecordDraft, MedicalRecordUpdate, PatientDraft, PatientUpdate, PersonUpdate,
};
use crate::error::{
    VALIDATION_EMPTY_UPDATE, VALIDATION_INVALID_VALUE, VALIDATION_OUT_OF_RANGE,
    VALIDATION_REQUIRED,
};
use crate::AppError;

pub const CONTACT_TYPES: &[&str] = &["phone", "email", "mobile", "work_phone"];
pub const RECORD_TYPES: &[&str] = &["procedure", "note"];
pub const APPOINTMENT_STATUSES: &[&str] = &["scheduled", "in_progress", "completed", "cancelled"];
pub const MAX_ATTACHMENT_BYTES: i64 = 100 * 1024 * 1024;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email validation pattern to compile")
});

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} is required")]
    Required(&'static str),
    #[error("{field} has an unsupported value: {value}")]
    InvalidValue { field: &'static str, value: String },
    #[error("{0} is out of range")]
    OutOfRange(&'static str),
    #[error("nothing to update")]
    EmptyUpdate,
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::Required(_) => VALIDATION_REQUIRED,
            ValidationError::InvalidValue { .. } => VALIDATION_INVALID_VALUE,
            ValidationError::OutOfRange(_) => VALIDATION_OUT_OF_RANGE,
            ValidationError::EmptyUpdate => VALIDATION_EMPTY_UPDATE,
        }
    }

    fn field(&self) -> Option<&'static str> {
        match self {
            ValidationError::Required(field) | ValidationError::OutOfRange(field) => Some(*field),
            ValidationError::InvalidValue { field, .. } => Some(*field),
            ValidationError::EmptyUpdate => None,
        }
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        let app = AppError::new(err.code(), err.to_string());
        match err.field() {
            Some(field) => app.with_context("field", field),
            None => app,
        }
    }
}

type Check = Result<(), ValidationError>;

fn require_text(field: &'static str, value: Option<&str>) -> Check {
    match value {
        Some(text) if text.trim().is_empty() => Err(ValidationError::Required(field)),
        _ => Ok(()),
    }
}

fn one_of(field: &'static str, value: Option<&str>, allowed: &[&str]) -> Check {
    match value {
        Some(text) if !allowed.contains(&text) => Err(ValidationError::InvalidValue {
            field,
            value: text.to_string(),
        }),
        _ => Ok(()),
    }
}

pub fn is_valid_email(value: &str) -> bool {
    EMAIL_RE.is_match(value.trim())
}

pub fn household_name(name: &str) -> Check {
    require_text("householdName", Some(name))
}

pub fn household_update(update: &HouseholdUpdate) -> Check {
    if update == &HouseholdUpdate::default() {
        return Err(ValidationError::EmptyUpdate);
    }
    require_text("householdName", update.household_name.as_deref())
}

pub fn person_update(update: &PersonUpdate) -> Check {
    if update == &PersonUpdate::default() {
        return Err(ValidationError::EmptyUpdate);
    }
    require_text("firstName", update.first_name.as_deref())?;
    require_text("lastName", update.last_name.as_deref())
}

/// `current_type` is the cached contact type, used when the update only changes the value.
pub fn contact_update(update: &ContactUpdate, current_type: &str) -> Check {
    if update == &ContactUpdate::default() {
        return Err(ValidationError::EmptyUpdate);
    }
    one_of("contactType", update.contact_type.as_deref(), CONTACT_TYPES)?;
    require_text("contactValue", update.contact_value.as_deref())?;

    let contact_type = update.contact_type.as_deref().unwrap_or(current_type);
    if let Some(value) = update.contact_value.as_deref() {
        if contact_type == "email" && !is_valid_email(value) {
            return Err(ValidationError::InvalidValue {
                field: "contactValue",
                value: value.to_string(),
            });
        }
    }
    Ok(())
}

fn non_negative(field: &'static str, value: Option<f64>) -> Check {
    match value {
        Some(v) if !v.is_finite() || v < 0.0 => Err(ValidationError::OutOfRange(field)),
        _ => Ok(()),
    }
}

pub fn patient_draft(draft: &PatientDraft) -> Check {
    require_text("name", Some(&draft.name))?;
    non_negative("weight", draft.weight)
}

pub fn patient_update(update: &PatientUpdate) -> Check {
    if update == &PatientUpdate::default() {
        return Err(ValidationError::EmptyUpdate);
    }
    require_text("name", update.name.as_deref())?;
    non_negative("weight", update.weight)
}

pub fn medical_record_draft(draft: &MedicalRecordDraft) -> Check {
    one_of("recordType", Some(&draft.record_type), RECORD_TYPES)?;
    require_text("name", Some(&draft.name))?;
    require_text("description", Some(&draft.description))?;
    non_negative("price", draft.price)
}

pub fn medical_record_update(update: &MedicalRecordUpdate) -> Check {
    if update == &MedicalRecordUpdate::default() {
        return Err(ValidationError::EmptyUpdate);
    }
    one_of("recordType", update.record_type.as_deref(), RECORD_TYPES)?;
    require_text("name", update.name.as_deref())?;
    require_text("description", update.description.as_deref())?;
    non_negative("price", update.price)
}

pub fn attachment_upload(upload: &AttachmentUpload) -> Check {
    require_text("originalName", Some(&upload.original_name))?;
    if upload.file_size < 0 || upload.file_size > MAX_ATTACHMENT_BYTES {
        return Err(ValidationError::OutOfRange("fileSize"));
    }
    Ok(())
}

pub fn appointment_draft(draft: &AppointmentDraft) -> Check {
    require_text("title", Some(&draft.title))?;
    one_of("status", draft.status.as_deref(), APPOINTMENT_STATUSES)?;
    if draft.end_time <= draft.start_time {
        return Err(ValidationError::OutOfRange("endTime"));
    }
    Ok(())
}

/// `current` holds the cached start/end times, used for whichever bound is not changing.
pub fn appointment_update(update: &AppointmentUpdate, current: (i64, i64)) -> Check {
    if update == &AppointmentUpdate::default() {
        return Err(ValidationError::EmptyUpdate);
    }
    require_text("title", update.title.as_deref())?;
    one_of("status", update.status.as_deref(), APPOINTMENT_STATUSES)?;
    let start = update.start_time.unwrap_or(current.0);
    let end = update.end_time.unwrap_or(current.1);
    if (update.start_time.is_some() || update.end_time.is_some()) && end <= start {
        return Err(ValidationError::OutOfRange("endTime"));
    }
    Ok(())
}
