use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("Database migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("A stored row could not be decoded: {0}")]
    Decode(String),
}

impl From<core_types::CoreError> for DbError {
    fn from(e: core_types::CoreError) -> Self {
        DbError::Decode(e.to_string())
    }
}
