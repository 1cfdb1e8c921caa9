//! Recovery-key service.
//!
//! Persists the recovery record as JSON in `.recovery` inside the data
//! directory — its own file rather than store metadata, because recovery
//! setup is offered before the encrypted store exists and recovery must work
//! precisely when the store cannot be opened.
//!
//! What is persisted: the Argon2id verification hash of the secret, the
//! store key wrapped under the recovery-derived KEK, and the secret wrapped
//! under the current store key (so an unlocked session can re-wrap without
//! asking the user to re-enter the secret). The plaintext secret is shown to
//! the user exactly once and never stored.

use chrono::{DateTime, Utc};
use quillvault_crypto::recovery::{hash_recovery_secret_with, recovery_secret_to_kek_with};
use quillvault_crypto::{
    decrypt, encrypt, generate_recovery_secret, unwrap_store_key, verify_recovery_secret,
    wrap_store_key, DerivedKey, EncryptedData, KdfParams, Zeroizing,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name of the recovery record, relative to the data directory.
pub const RECOVERY_FILE: &str = ".recovery";

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("no recovery key configured")]
    NoRecoveryConfigured,

    #[error("invalid recovery key")]
    InvalidRecoveryKey,

    #[error("recovery crypto failure: {0}")]
    Crypto(String),

    #[error("recovery record I/O failure: {0}")]
    Io(String),
}

#[derive(Serialize, Deserialize)]
struct RecoveryRecord {
    verify_hash: String,
    wrapped_store_key: EncryptedData,
    wrapped_secret: EncryptedData,
    created_at: DateTime<Utc>,
}

/// Token proving a successful recovery-key verification.
///
/// Authorizes exactly one subsequent "set new passphrase" step. Holds the
/// unwrapped store key and the secret; both wipe themselves on drop.
pub struct UnlockToken {
    store_key: DerivedKey,
    secret: Zeroizing<String>,
}

impl UnlockToken {
    /// The store key recovered from the record — opens the store without the
    /// forgotten passphrase.
    pub fn store_key(&self) -> &DerivedKey {
        &self.store_key
    }
}

// Debug must never print the store key or the secret.
impl std::fmt::Debug for UnlockToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("UnlockToken(..)")
    }
}

/// Generates, verifies, and re-wraps recovery keys.
#[derive(Clone)]
pub struct RecoveryService {
    path: PathBuf,
    kdf: KdfParams,
}

impl RecoveryService {
    pub fn new(data_dir: &Path) -> Self {
        Self::with_kdf_params(data_dir, KdfParams::default())
    }

    /// As [`RecoveryService::new`] with explicit KDF cost parameters (tests
    /// use cheap ones).
    pub fn with_kdf_params(data_dir: &Path, kdf: KdfParams) -> Self {
        Self {
            path: data_dir.join(RECOVERY_FILE),
            kdf,
        }
    }

    /// Whether a recovery record exists.
    pub fn is_configured(&self) -> bool {
        self.path.exists()
    }

    fn load(&self) -> Result<RecoveryRecord, RecoveryError> {
        if !self.path.exists() {
            return Err(RecoveryError::NoRecoveryConfigured);
        }
        let bytes = fs::read(&self.path).map_err(|e| RecoveryError::Io(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| RecoveryError::Io(format!("parsing record: {e}")))
    }

    fn persist(&self, record: &RecoveryRecord) -> Result<(), RecoveryError> {
        let bytes = serde_json::to_vec_pretty(record).map_err(|e| RecoveryError::Io(e.to_string()))?;
        let tmp = self.path.with_file_name(".recovery.tmp");
        fs::write(&tmp, &bytes).map_err(|e| RecoveryError::Io(e.to_string()))?;
        fs::rename(&tmp, &self.path).map_err(|e| RecoveryError::Io(e.to_string()))
    }

    /// Generates a fresh recovery secret wrapped against `current_key` and
    /// persists the record. Returns the secret — show it to the user once,
    /// then let it drop.
    pub fn generate(&self, current_key: &DerivedKey) -> Result<Zeroizing<String>, RecoveryError> {
        let secret = generate_recovery_secret();

        let verify_hash = hash_recovery_secret_with(&secret, &self.kdf)
            .map_err(|e| RecoveryError::Crypto(e.to_string()))?;
        let kek = recovery_secret_to_kek_with(&secret, &self.kdf)
            .map_err(|e| RecoveryError::Crypto(e.to_string()))?;
        let wrapped_store_key =
            wrap_store_key(&kek, current_key).map_err(|e| RecoveryError::Crypto(e.to_string()))?;
        let wrapped_secret = encrypt(current_key, secret.as_bytes())
            .map_err(|e| RecoveryError::Crypto(e.to_string()))?;

        self.persist(&RecoveryRecord {
            verify_hash,
            wrapped_store_key,
            wrapped_secret,
            created_at: Utc::now(),
        })?;

        tracing::info!(path = %self.path.display(), "recovery key configured");
        Ok(secret)
    }

    /// Constant-time check of a candidate secret against the stored hash.
    pub fn verify(&self, candidate: &str) -> Result<bool, RecoveryError> {
        let record = self.load()?;
        Ok(verify_recovery_secret(candidate, &record.verify_hash))
    }

    /// Verifies the candidate and, on success, unwraps the store key.
    pub fn unlock(&self, candidate: &str) -> Result<UnlockToken, RecoveryError> {
        let record = self.load()?;
        if !verify_recovery_secret(candidate, &record.verify_hash) {
            return Err(RecoveryError::InvalidRecoveryKey);
        }

        let kek = recovery_secret_to_kek_with(candidate, &self.kdf)
            .map_err(|e| RecoveryError::Crypto(e.to_string()))?;
        let store_key = unwrap_store_key(&kek, &record.wrapped_store_key)
            .map_err(|_| RecoveryError::InvalidRecoveryKey)?;

        Ok(UnlockToken {
            store_key,
            secret: Zeroizing::new(candidate.to_string()),
        })
    }

    /// Re-wraps the record for a new store key after a recovery-based
    /// passphrase reset, so the same recovery secret remains valid. The
    /// verification hash is untouched — the secret did not change.
    pub fn rewrap(&self, token: &UnlockToken, new_key: &DerivedKey) -> Result<(), RecoveryError> {
        let mut record = self.load()?;

        let kek = recovery_secret_to_kek_with(&token.secret, &self.kdf)
            .map_err(|e| RecoveryError::Crypto(e.to_string()))?;
        record.wrapped_store_key =
            wrap_store_key(&kek, new_key).map_err(|e| RecoveryError::Crypto(e.to_string()))?;
        record.wrapped_secret = encrypt(new_key, token.secret.as_bytes())
            .map_err(|e| RecoveryError::Crypto(e.to_string()))?;

        self.persist(&record)
    }

    /// Re-wraps using the current store key instead of the secret — used for
    /// a known-passphrase change, where the session key can decrypt the
    /// stored `wrapped_secret`.
    pub fn rewrap_with_current_key(
        &self,
        current_key: &DerivedKey,
        new_key: &DerivedKey,
    ) -> Result<(), RecoveryError> {
        let record = self.load()?;
        let secret_bytes = decrypt(current_key, &record.wrapped_secret)
            .map_err(|e| RecoveryError::Crypto(e.to_string()))?;
        let secret = Zeroizing::new(
            String::from_utf8(secret_bytes).map_err(|e| RecoveryError::Crypto(e.to_string()))?,
        );

        let token = UnlockToken {
            store_key: current_key.clone(),
            secret,
        };
        self.rewrap(&token, new_key)
    }

    /// Removes the record entirely (user opted out after the fact).
    pub fn remove(&self) -> Result<(), RecoveryError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(RecoveryError::NoRecoveryConfigured)
            }
            Err(e) => Err(RecoveryError::Io(e.to_string())),
        }
    }
}
