//! Error types for backup and migration.

use quillvault_store::StoreError;
use thiserror::Error;

/// Failures while creating or verifying a backup snapshot.
///
/// Any of these is a hard stop: migration must not proceed without a
/// verified backup.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("backup write failed: {0}")]
    BackupWriteFailed(String),

    #[error("backup verification failed: {0}")]
    BackupVerificationFailed(String),

    #[error("reading legacy store: {0}")]
    Source(#[from] StoreError),
}

/// Failures during migration.
///
/// Everything up to `CopyFailed` is recoverable by retrying from the top —
/// abort handling deletes any partial encrypted store and the legacy store
/// is never written to. `RowCountMismatch` is the exception: it is detected
/// after the copy transaction committed, so the only remedy is restoring
/// from the backup snapshot.
#[derive(Debug, Error)]
pub enum MigrateError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("table copy failed: {0}")]
    CopyFailed(String),

    // Field must not be named `source`: thiserror would treat it as the
    // error's cause.
    #[error("row count mismatch in {table}: source {source_count}, destination {destination_count}; restore from backup")]
    RowCountMismatch {
        table: String,
        source_count: i64,
        destination_count: i64,
    },

    #[error("renaming legacy store failed: {0}")]
    FileRenameFailed(String),

    #[error("writing migration marker failed: {0}")]
    MarkerWriteFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_count_mismatch_carries_counts_not_a_cause() {
        let e = MigrateError::RowCountMismatch {
            table: "proposals".to_string(),
            source_count: 3,
            destination_count: 2,
        };
        let msg = e.to_string();
        assert!(msg.contains("proposals"));
        assert!(msg.contains('3') && msg.contains('2'));
        // The counts are data, not a wrapped error.
        assert!(std::error::Error::source(&e).is_none());
    }
}
