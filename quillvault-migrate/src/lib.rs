//! Backup and migration layer for QuillVault.
//!
//! Converts the plaintext legacy store into the encrypted store without ever
//! losing data:
//!
//! 1. [`create_backup`] exports everything to an immutable, verified,
//!    timestamped snapshot — migration refuses to start without one.
//! 2. [`MigrationEngine`] copies every business table into a freshly created
//!    encrypted store inside one exclusive transaction, verifies row counts
//!    independently after commit, renames the legacy file to an inert suffix
//!    and writes a completion marker.
//!
//! If the process dies at any point before the marker exists, the legacy
//! store is still intact; any partial encrypted store is deleted by abort
//! handling or, after a crash, swept away at the start of the next attempt —
//! so "no marker + legacy present" always means "retry from the top".

mod backup;
mod engine;
mod error;
mod marker;

pub use backup::{
    create_backup, list_backups, load_backup, BackupDocument, BackupMetadata, BackupSnapshot,
    BACKUP_DIR, BACKUP_PREFIX,
};
pub use engine::{MigrationEngine, MigrationPhase, MigrationReport};
pub use error::{BackupError, MigrateError};
pub use marker::{MigrationMarker, MARKER_FILE};
