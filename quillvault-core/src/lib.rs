//! Orchestration layer for QuillVault.
//!
//! [`Orchestrator`] drives the end-to-end encryption migration and exposes
//! the only entry points the surrounding application consumes:
//!
//! ```text
//! CollectPassphrase → OfferRecoverySetup → CreateBackup → RunMigration
//!                   → AwaitUserDisposition → Ready
//! ```
//!
//! with a parallel forgotten-passphrase branch:
//!
//! ```text
//! VerifyRecoveryKey → SetNewPassphrase → Ready
//! ```
//!
//! Every business rule lives here or below — presentation code only calls
//! phase transitions and renders the typed results. All session state (the
//! derived key, the verified backup, a pending recovery token) is owned by
//! the orchestrator; nothing is process-global.

mod error;
mod orchestrator;
mod recovery;

pub use error::{Error, Result};
pub use orchestrator::{Choice, Orchestrator, Phase};
pub use recovery::{RecoveryError, RecoveryService, UnlockToken, RECOVERY_FILE};
