use crate::cache::EntityKind;

use super::{EntitySchema, FieldKind, FieldSpec};

const fn field(
    canonical: &'static str,
    aliases: &'static [&'static str],
    wire: &'static str,
    kind: FieldKind,
) -> FieldSpec {
    FieldSpec {
        canonical,
        aliases,
        wire,
        kind,
    }
}

// Households and their people/contacts are written with snake_case names.
static HOUSEHOLD: EntitySchema = EntitySchema {
    kind: EntityKind::Household,
    fields: &[
        field("id", &["household_id"], "id", FieldKind::Integer),
        field(
            "householdName",
            &[
                "household_name",
                "household.household_name",
                "household.householdName",
                "name",
            ],
            "household_name",
            FieldKind::Text,
        ),
        field("address", &["household.address"], "address", FieldKind::Text),
        field("city", &["household.city"], "city", FieldKind::Text),
        field(
            "postalCode",
            &["postal_code", "household.postal_code", "zip"],
            "postal_code",
            FieldKind::Text,
        ),
        field("notes", &["household.notes"], "notes", FieldKind::Text),
        field("contacts", &["household.contacts"], "contacts", FieldKind::List),
        field(
            "petCount",
            &["pet_count", "household.pet_count"],
            "pet_count",
            FieldKind::Integer,
        ),
        field(
            "createdAt",
            &["created_at", "household.created_at"],
            "created_at",
            FieldKind::Timestamp,
        ),
        field(
            "updatedAt",
            &["updated_at", "household.updated_at"],
            "updated_at",
            FieldKind::Timestamp,
        ),
    ],
    envelopes: &["household", "data"],
};

static PERSON: EntitySchema = EntitySchema {
    kind: EntityKind::Person,
    fields: &[
        field("id", &["person_id"], "id", FieldKind::Integer),
        field(
            "householdId",
            &["household_id"],
            "household_id",
            FieldKind::Integer,
        ),
        field("firstName", &["first_name"], "first_name", FieldKind::Text),
        field("lastName", &["last_name"], "last_name", FieldKind::Text),
        field("isPrimary", &["is_primary"], "is_primary", FieldKind::Bool),
        field("contacts", &[], "contacts", FieldKind::List),
        field("createdAt", &["created_at"], "created_at", FieldKind::Timestamp),
        field("updatedAt", &["updated_at"], "updated_at", FieldKind::Timestamp),
    ],
    envelopes: &["person", "data"],
};

static CONTACT: EntitySchema = EntitySchema {
    kind: EntityKind::Contact,
    fields: &[
        field("id", &["contact_id"], "id", FieldKind::Integer),
        field("personId", &["person_id"], "person_id", FieldKind::Integer),
        field(
            "contactType",
            &["contact_type", "type"],
            "contact_type",
            FieldKind::Text,
        ),
        field(
            "contactValue",
            &["contact_value", "value"],
            "contact_value",
            FieldKind::Text,
        ),
        field("isPrimary", &["is_primary"], "is_primary", FieldKind::Bool),
        field("createdAt", &["created_at"], "created_at", FieldKind::Timestamp),
        field(
            "updatedAt",
            &["updated_at", "createdAt", "created_at"],
            "updated_at",
            FieldKind::Timestamp,
        ),
    ],
    envelopes: &["contact", "data"],
};

// Patient, medical record and attachment endpoints take camelCase input.
static PATIENT: EntitySchema = EntitySchema {
    kind: EntityKind::Patient,
    fields: &[
        field("id", &["patient_id"], "id", FieldKind::Integer),
        field("name", &["patient_name"], "name", FieldKind::Text),
        field(
            "species",
            &["species_name", "species.name"],
            "species",
            FieldKind::Text,
        ),
        field("breed", &["breed_name", "breed.name"], "breed", FieldKind::Text),
        field("gender", &["sex"], "gender", FieldKind::Text),
        field(
            "dateOfBirth",
            &["date_of_birth", "dob"],
            "dateOfBirth",
            FieldKind::Text,
        ),
        field("color", &["colour"], "color", FieldKind::Text),
        field("weight", &["weight_kg"], "weight", FieldKind::Float),
        field(
            "microchipId",
            &["microchip_id", "microchip"],
            "microchipId",
            FieldKind::Text,
        ),
        field(
            "medicalNotes",
            &["medical_notes"],
            "medicalNotes",
            FieldKind::Text,
        ),
        field("isActive", &["is_active", "active"], "isActive", FieldKind::Bool),
        field(
            "householdId",
            &["household_id"],
            "householdId",
            FieldKind::Integer,
        ),
        field("createdAt", &["created_at"], "createdAt", FieldKind::Timestamp),
        field("updatedAt", &["updated_at"], "updatedAt", FieldKind::Timestamp),
    ],
    envelopes: &["patient", "data"],
};

static MEDICAL_RECORD: EntitySchema = EntitySchema {
    kind: EntityKind::MedicalRecord,
    fields: &[
        field("id", &["record_id"], "id", FieldKind::Integer),
        field("patientId", &["patient_id"], "patientId", FieldKind::Integer),
        field(
            "recordType",
            &["record_type", "type"],
            "recordType",
            FieldKind::Text,
        ),
        field("name", &["title"], "name", FieldKind::Text),
        field(
            "procedureName",
            &["procedure_name"],
            "procedureName",
            FieldKind::Text,
        ),
        field("description", &[], "description", FieldKind::Text),
        field("price", &[], "price", FieldKind::Float),
        field("currencyId", &["currency_id"], "currencyId", FieldKind::Integer),
        field(
            "isArchived",
            &["is_archived", "archived"],
            "isArchived",
            FieldKind::Bool,
        ),
        field("version", &[], "version", FieldKind::Integer),
        field("createdAt", &["created_at"], "createdAt", FieldKind::Timestamp),
        field("updatedAt", &["updated_at"], "updatedAt", FieldKind::Timestamp),
    ],
    envelopes: &["record", "data"],
};

static ATTACHMENT: EntitySchema = EntitySchema {
    kind: EntityKind::Attachment,
    fields: &[
        field("id", &["attachment_id"], "id", FieldKind::Integer),
        field(
            "medicalRecordId",
            &["medical_record_id", "record_id"],
            "medicalRecordId",
            FieldKind::Integer,
        ),
        field("fileId", &["file_id"], "fileId", FieldKind::Text),
        field(
            "originalName",
            &["original_name", "fileName", "file_name"],
            "fileName",
            FieldKind::Text,
        ),
        field("fileSize", &["file_size", "size"], "fileSize", FieldKind::Integer),
        field("mimeType", &["mime_type"], "mimeType", FieldKind::Text),
        field(
            "attachmentType",
            &["attachment_type"],
            "attachmentType",
            FieldKind::Text,
        ),
        field(
            "uploadedAt",
            &["uploaded_at"],
            "uploadedAt",
            FieldKind::Timestamp,
        ),
        // Attachments are immutable once uploaded; their upload time is the change marker.
        field(
            "updatedAt",
            &["updated_at", "uploadedAt", "uploaded_at"],
            "updatedAt",
            FieldKind::Timestamp,
        ),
    ],
    envelopes: &["attachment", "data"],
};

static APPOINTMENT: EntitySchema = EntitySchema {
    kind: EntityKind::Appointment,
    fields: &[
        field("id", &["appointment_id"], "id", FieldKind::Integer),
        field("patientId", &["patient_id"], "patient_id", FieldKind::Integer),
        field("title", &[], "title", FieldKind::Text),
        field("description", &[], "description", FieldKind::Text),
        field(
            "startTime",
            &["start_time"],
            "start_time",
            FieldKind::Timestamp,
        ),
        field("endTime", &["end_time"], "end_time", FieldKind::Timestamp),
        field("roomId", &["room_id"], "room_id", FieldKind::Integer),
        field("status", &[], "status", FieldKind::Text),
        field("createdAt", &["created_at"], "created_at", FieldKind::Timestamp),
        field("updatedAt", &["updated_at"], "updated_at", FieldKind::Timestamp),
    ],
    envelopes: &["appointment", "data"],
};

pub fn schema_for(kind: EntityKind) -> &'static EntitySchema {
    match kind {
        EntityKind::Household => &HOUSEHOLD,
        EntityKind::Person => &PERSON,
        EntityKind::Contact => &CONTACT,
        EntityKind::Patient => &PATIENT,
        EntityKind::MedicalRecord => &MEDICAL_RECORD,
        EntityKind::Attachment => &ATTACHMENT,
        EntityKind::Appointment => &APPOINTMENT,
    }
}
