//! Error types for the storage layer.
//!
//! Every failure is a [`DbError`], which converts into the engine's
//! [`StorageError`] at the repository boundary.

use isleforge_core::StorageError;

/// Errors that can occur in the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A `PostgreSQL` migration failed.
    #[error("PostgreSQL migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored JSON document could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<DbError> for StorageError {
    fn from(e: DbError) -> Self {
        Self::Backend {
            message: e.to_string(),
        }
    }
}
