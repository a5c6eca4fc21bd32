use uuid::Uuid;

/// Time-ordered identifier for pending mutations.
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}
