//! Typed error type for the db crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("row not found")]
    NotFound,

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The key-value backend could not be reached or rejected the operation.
    #[error("key-value store error: {0}")]
    Kv(String),

    /// An optimistic update lost the race: the entry changed since it was read.
    #[error("revision conflict on key '{key}'")]
    RevisionConflict { key: String },
}
