//! The phase state machine driving setup, migration, unlock, and recovery.

use crate::error::{Error, Result};
use crate::recovery::{RecoveryError, RecoveryService, UnlockToken};
use quillvault_crypto::{
    derive_passphrase_key, validate_strength, DerivedKey, KdfParams, Strength, Zeroizing,
};
use quillvault_migrate::{
    create_backup, list_backups, BackupSnapshot, MigrationEngine, MigrationMarker,
    MigrationReport, MARKER_FILE,
};
use quillvault_store::{load_or_create_salt, EncryptedStore, LegacyStore, StoreError};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Phases of the orchestrator. Transitions are the only API surface the
/// surrounding application consumes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the user's passphrase (first setup or normal unlock).
    CollectPassphrase,
    /// Passphrase accepted; offering optional recovery-key setup.
    OfferRecoverySetup,
    /// Waiting to create the mandatory pre-migration backup.
    CreateBackup,
    /// Backup verified; migration may run.
    RunMigration,
    /// Migration verified; waiting for the user's keep/delete decision on
    /// the legacy store.
    AwaitUserDisposition,
    /// Store open, subsystem done.
    Ready,
    /// Forgotten-passphrase branch: waiting for the recovery secret.
    VerifyRecoveryKey,
    /// Recovery secret accepted; waiting for the replacement passphrase.
    SetNewPassphrase,
}

/// User decisions fed back through [`Orchestrator::confirm`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Choice {
    SetupRecovery,
    SkipRecovery,
    KeepLegacy,
    DeleteLegacy,
}

/// Owns the whole passphrase/encryption/migration/recovery lifecycle for one
/// data directory.
pub struct Orchestrator {
    data_dir: PathBuf,
    legacy_path: PathBuf,
    encrypted_path: PathBuf,
    marker_path: PathBuf,
    kdf: KdfParams,
    recovery: RecoveryService,
    phase: Phase,
    key: Option<DerivedKey>,
    store: Option<EncryptedStore>,
    backup: Option<BackupSnapshot>,
    recovery_token: Option<UnlockToken>,
}

impl Orchestrator {
    /// Creates an orchestrator for `<data_dir>/<store_name>.db` (legacy) and
    /// `<data_dir>/<store_name>.enc` (encrypted).
    pub fn new(data_dir: &Path, store_name: &str) -> Self {
        Self::with_kdf_params(data_dir, store_name, KdfParams::default())
    }

    /// As [`Orchestrator::new`] with explicit KDF cost parameters (tests use
    /// cheap ones).
    pub fn with_kdf_params(data_dir: &Path, store_name: &str, kdf: KdfParams) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            legacy_path: data_dir.join(format!("{store_name}.db")),
            encrypted_path: data_dir.join(format!("{store_name}.enc")),
            marker_path: data_dir.join(MARKER_FILE),
            recovery: RecoveryService::with_kdf_params(data_dir, kdf.clone()),
            kdf,
            phase: Phase::CollectPassphrase,
            key: None,
            store: None,
            backup: None,
            recovery_token: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether a verified migration has already completed (marker present).
    pub fn is_migrated(&self) -> bool {
        self.marker_path.exists()
    }

    /// Whether a recovery key has been configured.
    pub fn has_recovery(&self) -> bool {
        self.recovery.is_configured()
    }

    /// The open encrypted store, once the subsystem is `Ready`.
    pub fn store(&self) -> Option<&EncryptedStore> {
        self.store.as_ref()
    }

    /// Where the renamed legacy store lives after migration.
    pub fn legacy_artifact_path(&self) -> PathBuf {
        PathBuf::from(format!("{}.old", self.encrypted_path.to_string_lossy()))
    }

    /// Existing backup snapshots, newest first.
    pub fn list_backups(&self) -> Vec<PathBuf> {
        list_backups(&self.data_dir)
    }

    fn require_phase(&self, expected: Phase, required: &'static str) -> Result<()> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(Error::PhaseViolation {
                required,
                actual: self.phase,
            })
        }
    }

    fn current_key(&self) -> Result<&DerivedKey> {
        self.key
            .as_ref()
            .ok_or_else(|| Error::Internal("no derived key in session".to_string()))
    }

    async fn derive(&self, passphrase: Zeroizing<String>) -> Result<DerivedKey> {
        let salt = load_or_create_salt(&self.data_dir)?;
        let kdf = self.kdf.clone();
        // CPU-bound; keep it off the event loop.
        let key = tokio::task::spawn_blocking(move || derive_passphrase_key(passphrase, &salt, &kdf))
            .await
            .map_err(|e| Error::Internal(format!("derivation task failed: {e}")))??;
        Ok(key)
    }

    // ── Setup / unlock path ──────────────────────────────────────

    /// Rates a candidate passphrase without touching any state.
    pub fn get_strength(&self, passphrase: &str) -> Result<Strength> {
        Ok(validate_strength(passphrase)?)
    }

    /// Accepts the passphrase, derives the key, and either unlocks the
    /// existing encrypted store (post-migration starts) or advances the
    /// setup flow.
    ///
    /// A wrong passphrase against an existing store fails with
    /// `AuthenticationFailed` and leaves the phase unchanged.
    pub async fn set_passphrase(&mut self, passphrase: Zeroizing<String>) -> Result<()> {
        self.require_phase(Phase::CollectPassphrase, "CollectPassphrase")?;
        validate_strength(&passphrase)?;

        let key = self.derive(passphrase).await?;

        if self.is_migrated() {
            let store = EncryptedStore::open(&self.encrypted_path, &key)?;
            self.store = Some(store);
            self.key = Some(key);
            self.phase = Phase::Ready;
            info!("store unlocked");
        } else {
            self.key = Some(key);
            // A crash-interrupted setup that already configured recovery
            // does not get offered it again.
            self.phase = if self.recovery.is_configured() {
                Phase::CreateBackup
            } else {
                Phase::OfferRecoverySetup
            };
        }
        Ok(())
    }

    /// Feeds a user decision into the state machine.
    pub fn confirm(&mut self, phase: Phase, choice: Choice) -> Result<()> {
        if phase != self.phase {
            return Err(Error::PhaseViolation {
                required: "the current phase",
                actual: self.phase,
            });
        }
        match (phase, choice) {
            (Phase::OfferRecoverySetup, Choice::SkipRecovery) => {
                // Accepted, explicit risk: no fallback if the passphrase is lost.
                warn!("recovery setup skipped by user");
                self.phase = Phase::CreateBackup;
                Ok(())
            }
            (Phase::OfferRecoverySetup, Choice::SetupRecovery) => {
                // Stays in place; generate_recovery_key completes the choice.
                Ok(())
            }
            (Phase::AwaitUserDisposition, Choice::KeepLegacy) => {
                self.phase = Phase::Ready;
                Ok(())
            }
            (Phase::AwaitUserDisposition, Choice::DeleteLegacy) => {
                self.delete_legacy_file()?;
                self.phase = Phase::Ready;
                Ok(())
            }
            _ => Err(Error::PhaseViolation {
                required: "a phase accepting this choice",
                actual: self.phase,
            }),
        }
    }

    // ── Recovery setup ───────────────────────────────────────────

    /// Generates and persists a recovery key for the current session key.
    /// Returns the secret exactly once; it is never stored in plaintext.
    ///
    /// Allowed while the offer is open during setup, or any time at `Ready`.
    pub async fn generate_recovery_key(&mut self) -> Result<Zeroizing<String>> {
        if self.phase != Phase::OfferRecoverySetup && self.phase != Phase::Ready {
            return Err(Error::PhaseViolation {
                required: "OfferRecoverySetup or Ready",
                actual: self.phase,
            });
        }
        let key = self.current_key()?.clone();
        let service = self.recovery.clone();
        let secret = tokio::task::spawn_blocking(move || service.generate(&key))
            .await
            .map_err(|e| Error::Internal(format!("recovery task failed: {e}")))??;

        if self.phase == Phase::OfferRecoverySetup {
            self.phase = Phase::CreateBackup;
        }
        Ok(secret)
    }

    // ── Backup and migration ─────────────────────────────────────

    /// Exports the mandatory pre-migration backup and verifies it.
    ///
    /// A failure here is a hard stop: the phase does not advance and
    /// migration stays unreachable until a verified backup exists.
    pub fn create_backup(&mut self) -> Result<BackupSnapshot> {
        self.require_phase(Phase::CreateBackup, "CreateBackup")?;

        let legacy = LegacyStore::open(&self.legacy_path)?;
        let snapshot = create_backup(&legacy, &self.data_dir)?;
        // Close the legacy connection before migration attaches the file.
        drop(legacy);

        self.backup = Some(snapshot.clone());
        self.phase = Phase::RunMigration;
        Ok(snapshot)
    }

    /// Runs the atomic migration. Not cancellable once the copy transaction
    /// begins.
    ///
    /// A `CopyFailed` leaves the phase at `RunMigration` for a clean retry —
    /// no partial state survives. A `RowCountMismatch` also stays here but
    /// is *not* retryable by rerunning: the copy already committed, and the
    /// caller must direct the user to restore from the backup snapshot.
    pub fn run_migration(&mut self) -> Result<MigrationReport> {
        self.require_phase(Phase::RunMigration, "RunMigration")?;
        let backup = self
            .backup
            .clone()
            .ok_or_else(|| Error::Internal("no verified backup in session".to_string()))?;
        let key = self.current_key()?.clone();

        let mut engine =
            MigrationEngine::new(&self.legacy_path, &self.encrypted_path, &self.marker_path);
        let report = engine.run(&key, &backup)?;

        // Reopen normally; the engine closed its migration handle.
        self.store = Some(EncryptedStore::open(&self.encrypted_path, &key)?);
        self.phase = Phase::AwaitUserDisposition;
        Ok(report)
    }

    /// The verified per-table counts of the completed migration, if any.
    pub fn get_migration_verification(&self) -> Result<Option<MigrationMarker>> {
        Ok(MigrationMarker::load(&self.marker_path)?)
    }

    /// Explicitly deletes the renamed legacy store. Only ever user-initiated.
    pub fn delete_legacy_store(&mut self) -> Result<()> {
        if self.phase != Phase::AwaitUserDisposition && self.phase != Phase::Ready {
            return Err(Error::PhaseViolation {
                required: "AwaitUserDisposition or Ready",
                actual: self.phase,
            });
        }
        self.delete_legacy_file()?;
        if self.phase == Phase::AwaitUserDisposition {
            self.phase = Phase::Ready;
        }
        Ok(())
    }

    fn delete_legacy_file(&self) -> Result<()> {
        let path = self.legacy_artifact_path();
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!(path = %path.display(), "legacy store deleted on user request");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => Err(Error::Store(
                StoreError::PermissionDenied(format!("deleting legacy store: {e}")),
            )),
            Err(e) => Err(Error::Internal(format!("deleting legacy store: {e}"))),
        }
    }

    // ── Forgotten-passphrase branch ──────────────────────────────

    /// Enters the recovery branch. Fails with `NoRecoveryConfigured` if the
    /// user skipped recovery setup — there is no fallback in that case.
    pub fn forgot_passphrase(&mut self) -> Result<()> {
        self.require_phase(Phase::CollectPassphrase, "CollectPassphrase")?;
        if !self.recovery.is_configured() {
            return Err(RecoveryError::NoRecoveryConfigured.into());
        }
        self.phase = Phase::VerifyRecoveryKey;
        Ok(())
    }

    /// Verifies the recovery secret and, on success, holds an unlock token
    /// authorizing one `set_new_passphrase_after_recovery` call.
    ///
    /// An invalid secret leaves the phase unchanged for another attempt.
    pub async fn unlock_with_recovery_key(&mut self, candidate: Zeroizing<String>) -> Result<()> {
        self.require_phase(Phase::VerifyRecoveryKey, "VerifyRecoveryKey")?;

        let service = self.recovery.clone();
        let token = tokio::task::spawn_blocking(move || service.unlock(&candidate))
            .await
            .map_err(|e| Error::Internal(format!("recovery task failed: {e}")))??;

        self.recovery_token = Some(token);
        self.phase = Phase::SetNewPassphrase;
        Ok(())
    }

    /// Completes recovery: derives a key from the new passphrase (same
    /// write-once salt), re-keys the store away from the forgotten
    /// passphrase's key, and re-wraps the recovery record so the same
    /// recovery secret remains valid.
    pub async fn set_new_passphrase_after_recovery(
        &mut self,
        new_passphrase: Zeroizing<String>,
    ) -> Result<()> {
        self.require_phase(Phase::SetNewPassphrase, "SetNewPassphrase")?;
        validate_strength(&new_passphrase)?;
        let new_key = self.derive(new_passphrase).await?;

        // One-shot: the token is consumed whatever happens next; a failure
        // sends the user back through recovery verification.
        let token = self
            .recovery_token
            .take()
            .ok_or_else(|| Error::Internal("no recovery token in session".to_string()))?;

        if self.is_migrated() {
            let store = EncryptedStore::open(&self.encrypted_path, token.store_key())?;
            store.rekey(&new_key)?;
            self.recovery.rewrap(&token, &new_key)?;
            self.store = Some(store);
            self.key = Some(new_key);
            self.phase = Phase::Ready;
        } else {
            // Recovery before migration ever ran: nothing is encrypted yet,
            // so only the record needs re-wrapping.
            self.recovery.rewrap(&token, &new_key)?;
            self.key = Some(new_key);
            self.phase = Phase::CreateBackup;
        }
        info!("passphrase reset via recovery key");
        Ok(())
    }

    // ── Known-passphrase change ──────────────────────────────────

    /// Changes the passphrase while the current one is still known. Verifies
    /// the old passphrase, re-keys the store, and re-wraps the recovery
    /// record (if configured) so the existing recovery secret stays valid.
    pub async fn change_passphrase(
        &mut self,
        old_passphrase: Zeroizing<String>,
        new_passphrase: Zeroizing<String>,
    ) -> Result<()> {
        self.require_phase(Phase::Ready, "Ready")?;
        validate_strength(&new_passphrase)?;

        let old_key = self.derive(old_passphrase).await?;
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| Error::Internal("no open store in session".to_string()))?;
        // Checked against the store's verification token; key bytes are
        // never compared directly.
        if !store.verify_key(&old_key)? {
            return Err(StoreError::AuthenticationFailed.into());
        }

        let new_key = self.derive(new_passphrase).await?;
        store.rekey(&new_key)?;

        if self.recovery.is_configured() {
            self.recovery.rewrap_with_current_key(&old_key, &new_key)?;
        }
        self.key = Some(new_key);
        info!("passphrase changed");
        Ok(())
    }
}
