//! Error types for the storage layer.
//!
//! Raw `duckdb`/`io` errors never leave this crate; they are converted here
//! with enough context (path, table) for diagnostics.

use thiserror::Error;

/// All errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store creation failed: {0}")]
    StoreCreateFailed(String),

    #[error("authentication failed: wrong key for this store")]
    AuthenticationFailed,

    #[error("rekey failed: {0}")]
    RekeyFailed(String),

    #[error("attach failed: {0}")]
    AttachFailed(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("unknown business table: {0}")]
    UnknownTable(String),

    #[error("storage error: {0}")]
    Database(String),

    #[error("crypto error: {0}")]
    Crypto(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<duckdb::Error> for StoreError {
    fn from(e: duckdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Database(format!("payload serialization: {e}"))
    }
}

/// Maps an I/O error, surfacing permission problems as their own variant.
pub(crate) fn io_error(context: &str, e: std::io::Error) -> StoreError {
    if e.kind() == std::io::ErrorKind::PermissionDenied {
        StoreError::PermissionDenied(format!("{context}: {e}"))
    } else {
        StoreError::Database(format!("{context}: {e}"))
    }
}
