//! The flattened error surface exposed to the host application.
//!
//! Every component failure arrives here as a typed variant; raw library
//! errors were already converted at the component boundaries. Nothing in
//! this subsystem panics across the host boundary.

use crate::orchestrator::Phase;
use crate::recovery::RecoveryError;
use quillvault_crypto::CryptoError;
use quillvault_migrate::{BackupError, MigrateError};
use quillvault_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error(transparent)]
    Migrate(#[from] MigrateError),

    #[error(transparent)]
    Recovery(#[from] RecoveryError),

    #[error("operation not allowed in phase {actual:?} (requires {required})")]
    PhaseViolation { required: &'static str, actual: Phase },

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
