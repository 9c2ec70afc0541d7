//! Error types for the persistent store.

use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The database stayed busy/locked through every retry attempt
    #[error("database still busy after {attempts} attempts")]
    Busy { attempts: u32 },

    /// The on-disk schema is newer than this library understands
    #[error("unsupported schema version {0}")]
    UnsupportedVersion(i64),
}
