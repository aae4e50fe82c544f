/// All database primary keys are PostgreSQL BIGSERIAL, except sessions.
pub type DbId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Session identifiers are UUIDs so they can travel in the `sid` claim.
pub type SessionId = uuid::Uuid;
