use uuid::Uuid;

/// Generate a time-ordered run identifier.
pub fn uuid7() -> Uuid {
    Uuid::now_v7()
}
