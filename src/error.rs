//! Error handling for tagwise.
//!
//! [`TagwiseError`] covers both the classifier's own taxonomy (insufficient
//! data, untrained model, schema mismatch, worker failure, lock timeout) and
//! the ambient failures from storage and serialization. "Not confident
//! enough" is never an error: predictions below threshold come back as
//! `Ok` values with `label = None`.

use std::io;

use thiserror::Error;

/// Main error type for tagwise operations.
#[derive(Error, Debug)]
pub enum TagwiseError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Unknown config key: {0}")]
    UnknownConfigKey(String),

    #[error("Insufficient training data: have {have} labeled items, need {need}")]
    InsufficientData { have: u64, need: u64 },

    #[error("Model has not been trained yet")]
    ModelNotTrained,

    #[error("Weight store schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Inference worker failed: {0}")]
    WorkerFailure(String),

    #[error("Store lock timeout: {0}")]
    LockTimeout(String),

    #[error("Unknown label: {0}")]
    UnknownLabel(String),

    #[error("Item not found: {0}")]
    ItemNotFound(i64),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

impl TagwiseError {
    /// Whether a caller can reasonably retry the failed operation as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout(_))
    }
}

pub type Result<T> = std::result::Result<T, TagwiseError>;

/// Map SQLite busy/locked errors to the retryable [`TagwiseError::LockTimeout`]
/// variant instead of the opaque database error.
pub fn from_sqlite(err: rusqlite::Error) -> TagwiseError {
    if let rusqlite::Error::SqliteFailure(code, ref msg) = err {
        if matches!(
            code.code,
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
        ) {
            return TagwiseError::LockTimeout(
                msg.clone().unwrap_or_else(|| "database is busy".to_string()),
            );
        }
    }
    TagwiseError::Database(err)
}
