use thiserror::Error;

/// Errors surfaced by credential repository implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique constraint was violated (duplicate username or credential id)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The backing store failed or is unavailable
    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                StoreError::Conflict(db_err.to_string())
            }
            _ => StoreError::Storage(err.to_string()),
        }
    }
}
