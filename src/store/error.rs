use thiserror::Error;
use uuid::Uuid;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("transaction {0} not found")]
    NotFound(Uuid),

    /// Unique constraint hit, e.g. a duplicate external reference.
    #[error("duplicate {field}: {value}")]
    Duplicate { field: &'static str, value: String },

    #[error("database error: {0}")]
    Database(String),
}

impl StoreError {
    /// Map a sqlx error onto the store taxonomy. Postgres 23505 is the
    /// unique-violation class, which here means a reference collision.
    pub fn from_sqlx(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
                StoreError::Duplicate {
                    field: "external_reference",
                    value: db_err.message().to_string(),
                }
            }
            other => StoreError::Database(other.to_string()),
        }
    }
}
