//! The migration state machine.
//!
//! `Idle → Attaching → CopyingTables → Verifying → Finalizing → Complete`,
//! with `Failed` reachable from any non-terminal state.
//!
//! The copy runs in one exclusive transaction on the encrypted store's
//! connection with the legacy database attached read-only. Before the commit
//! every failure is silently recoverable: the partial encrypted store is
//! deleted and the legacy store was never written to. After the commit a row
//! count mismatch cannot be rolled back — it is surfaced as
//! `RowCountMismatch` and the caller must direct the user to the backup.

use crate::backup::BackupSnapshot;
use crate::error::MigrateError;
use crate::marker::MigrationMarker;
use quillvault_crypto::DerivedKey;
use quillvault_store::{EncryptedStore, StoreError, BUSINESS_TABLES};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Phases of a migration run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MigrationPhase {
    Idle,
    Attaching,
    CopyingTables,
    Verifying,
    Finalizing,
    Complete,
    Failed,
}

/// Outcome of a verified migration.
#[derive(Clone, Debug)]
pub struct MigrationReport {
    /// Per-table row counts, independently re-queried after commit.
    pub counts: BTreeMap<String, u64>,
    /// Where the legacy store now lives (inert suffix, never deleted here).
    pub legacy_renamed_to: PathBuf,
}

/// Drives one legacy-to-encrypted migration attempt.
pub struct MigrationEngine {
    legacy_path: PathBuf,
    encrypted_path: PathBuf,
    marker_path: PathBuf,
    phase: MigrationPhase,
}

impl MigrationEngine {
    pub fn new(legacy_path: &Path, encrypted_path: &Path, marker_path: &Path) -> Self {
        Self {
            legacy_path: legacy_path.to_path_buf(),
            encrypted_path: encrypted_path.to_path_buf(),
            marker_path: marker_path.to_path_buf(),
            phase: MigrationPhase::Idle,
        }
    }

    pub fn phase(&self) -> MigrationPhase {
        self.phase
    }

    /// Whether a verified migration has already completed.
    ///
    /// The marker's presence is the sole signal; no marker plus a legacy
    /// store on disk always means "retry from the top".
    pub fn is_complete(&self) -> bool {
        self.marker_path.exists()
    }

    /// Removes a destination file left behind by an attempt that died before
    /// its abort handler ran.
    ///
    /// Safe exactly because the marker is written strictly after the legacy
    /// rename: marker absent + legacy present means the previous attempt
    /// never finished, so whatever sits at the destination path is a partial
    /// store, never live data. With the marker present the destination is a
    /// completed store and is left alone (`create` then refuses it).
    fn sweep_stale_destination(&mut self) -> Result<(), MigrateError> {
        if self.marker_path.exists() || !self.legacy_path.exists() || !self.encrypted_path.exists()
        {
            return Ok(());
        }
        tracing::warn!(
            path = %self.encrypted_path.display(),
            "removing stale encrypted store left by an interrupted attempt"
        );
        let wal = PathBuf::from(format!("{}.wal", self.encrypted_path.to_string_lossy()));
        let _ = fs::remove_file(&wal);
        if let Err(e) = fs::remove_file(&self.encrypted_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                self.phase = MigrationPhase::Failed;
                return Err(StoreError::StoreCreateFailed(format!(
                    "removing stale encrypted store: {e}"
                ))
                .into());
            }
        }
        Ok(())
    }

    /// Runs the full migration. Requires a verified backup snapshot and the
    /// derived key; it will not start without either.
    ///
    /// Not cancellable once the copy transaction begins; atomicity is
    /// preserved by running to completion or aborting entirely.
    pub fn run(
        &mut self,
        key: &DerivedKey,
        backup: &BackupSnapshot,
    ) -> Result<MigrationReport, MigrateError> {
        tracing::info!(
            legacy = %self.legacy_path.display(),
            encrypted = %self.encrypted_path.display(),
            backup = %backup.path.display(),
            "starting migration"
        );

        self.phase = MigrationPhase::Attaching;
        self.sweep_stale_destination()?;
        let store = EncryptedStore::create(&self.encrypted_path, key)?;
        let attachment = match store.attach_legacy(&self.legacy_path) {
            Ok(a) => a,
            Err(e) => {
                self.phase = MigrationPhase::Failed;
                let _ = store.destroy();
                return Err(e.into());
            }
        };

        self.phase = MigrationPhase::CopyingTables;
        let copied = match store.copy_tables_from_attached(&attachment) {
            Ok(c) => c,
            Err(e) => {
                // Abort handling: the transaction already rolled back; delete
                // the partial store file. The legacy store was never touched.
                self.phase = MigrationPhase::Failed;
                drop(attachment);
                let _ = store.destroy();
                tracing::warn!(error = %e, "copy aborted, partial store deleted");
                return Err(MigrateError::CopyFailed(e.to_string()));
            }
        };

        // Post-commit verification: independently re-query both sides. A
        // mismatch here cannot be rolled back — the transaction committed.
        self.phase = MigrationPhase::Verifying;
        let mut counts = BTreeMap::new();
        for table in BUSINESS_TABLES {
            let source = store.count_attached(&attachment, table).map_err(|e| {
                self.phase = MigrationPhase::Failed;
                MigrateError::from(e)
            })?;
            let destination = store.count(table).map_err(|e| {
                self.phase = MigrationPhase::Failed;
                MigrateError::from(e)
            })?;
            if source != destination {
                self.phase = MigrationPhase::Failed;
                tracing::error!(table, source, destination, "row count mismatch after commit");
                return Err(MigrateError::RowCountMismatch {
                    table: table.to_string(),
                    source_count: source,
                    destination_count: destination,
                });
            }
            counts.insert(table.to_string(), destination as u64);
        }
        debug_assert_eq!(counts, copied);

        self.phase = MigrationPhase::Finalizing;
        drop(attachment);

        let inert_path = PathBuf::from(format!("{}.old", self.encrypted_path.to_string_lossy()));
        fs::rename(&self.legacy_path, &inert_path).map_err(|e| {
            self.phase = MigrationPhase::Failed;
            MigrateError::FileRenameFailed(format!(
                "{} -> {}: {e}",
                self.legacy_path.display(),
                inert_path.display()
            ))
        })?;

        MigrationMarker::new(counts.clone())
            .write(&self.marker_path)
            .map_err(|e| {
                self.phase = MigrationPhase::Failed;
                e
            })?;

        // Close the migration handle; the app reopens the store normally.
        drop(store);

        self.phase = MigrationPhase::Complete;
        tracing::info!(?counts, renamed = %inert_path.display(), "migration complete");
        Ok(MigrationReport {
            counts,
            legacy_renamed_to: inert_path,
        })
    }
}
