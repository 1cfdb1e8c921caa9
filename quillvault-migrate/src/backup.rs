//! Pre-encryption backup snapshots.
//!
//! A snapshot is a single JSON document holding every business row plus a
//! metadata header. It is written to a temp file, flushed to durable
//! storage, atomically renamed to its final timestamped name, and then
//! re-opened and re-parsed. A backup that cannot be read back counts as no
//! backup at all: the artifact is deleted and an error returned.

use crate::error::BackupError;
use chrono::Utc;
use quillvault_store::{LegacyStore, Record};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Directory holding snapshots, relative to the data directory.
pub const BACKUP_DIR: &str = "backups";

/// File name prefix of every snapshot.
pub const BACKUP_PREFIX: &str = "pre-encryption-backup-";

/// Metadata header written into every snapshot.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupMetadata {
    pub export_date: String,
    pub app_version: String,
    pub schema_version: u32,
    pub proposal_count: u64,
    pub settings_count: u64,
    pub job_posts_count: u64,
}

/// The full backup document as serialized to disk.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackupDocument {
    pub metadata: BackupMetadata,
    pub proposals: Vec<Record>,
    pub settings: Vec<Record>,
    pub job_posts: Vec<Record>,
}

/// Proof that a verified snapshot exists on disk. The migration engine
/// requires one before it will run.
#[derive(Clone, Debug)]
pub struct BackupSnapshot {
    pub path: PathBuf,
    pub metadata: BackupMetadata,
}

fn write_failed(context: &str, e: std::io::Error) -> BackupError {
    BackupError::BackupWriteFailed(format!("{context}: {e}"))
}

/// Exports all business data from the legacy store into a new verified
/// snapshot under `<data_dir>/backups/`.
///
/// Never overwrites an existing snapshot; each attempt gets its own
/// timestamped file. Two calls in quick succession yield two distinct,
/// independently valid files.
pub fn create_backup(legacy: &LegacyStore, data_dir: &Path) -> Result<BackupSnapshot, BackupError> {
    let proposals = legacy.fetch_all("proposals")?;
    let settings = legacy.fetch_all("settings")?;
    let job_posts = legacy.fetch_all("job_posts")?;

    let metadata = BackupMetadata {
        export_date: Utc::now().to_rfc3339(),
        app_version: env!("CARGO_PKG_VERSION").to_string(),
        schema_version: quillvault_store::SCHEMA_VERSION,
        proposal_count: proposals.len() as u64,
        settings_count: settings.len() as u64,
        job_posts_count: job_posts.len() as u64,
    };
    let document = BackupDocument {
        metadata: metadata.clone(),
        proposals,
        settings,
        job_posts,
    };

    let backup_dir = data_dir.join(BACKUP_DIR);
    fs::create_dir_all(&backup_dir).map_err(|e| write_failed("creating backup directory", e))?;
    let final_path = unique_backup_path(&backup_dir);
    let tmp_path = final_path.with_extension("json.tmp");

    let bytes = serde_json::to_vec_pretty(&document)
        .map_err(|e| BackupError::BackupWriteFailed(format!("serializing document: {e}")))?;

    // Temp write + fsync + atomic rename, so a crash mid-write never leaves
    // a half-document under the final name.
    let result = (|| {
        let mut file = File::create(&tmp_path).map_err(|e| write_failed("creating temp file", e))?;
        file.write_all(&bytes).map_err(|e| write_failed("writing snapshot", e))?;
        file.sync_all().map_err(|e| write_failed("flushing snapshot", e))?;
        drop(file);
        fs::rename(&tmp_path, &final_path).map_err(|e| write_failed("renaming snapshot", e))
    })();
    if let Err(e) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    // Round-trip check: re-open and re-parse the final file. A backup that
    // cannot be read back counts as no backup at all.
    match verify_backup(&final_path, &metadata) {
        Ok(()) => {
            tracing::info!(path = %final_path.display(), "backup created and verified");
            Ok(BackupSnapshot {
                path: final_path,
                metadata,
            })
        }
        Err(e) => {
            let _ = fs::remove_file(&final_path);
            Err(e)
        }
    }
}

fn unique_backup_path(backup_dir: &Path) -> PathBuf {
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3f").to_string().replace('.', "");
    let mut candidate = backup_dir.join(format!("{BACKUP_PREFIX}{stamp}.json"));
    let mut n = 1;
    while candidate.exists() {
        candidate = backup_dir.join(format!("{BACKUP_PREFIX}{stamp}-{n}.json"));
        n += 1;
    }
    candidate
}

fn verify_backup(path: &Path, expected: &BackupMetadata) -> Result<(), BackupError> {
    let reparsed = load_backup(path)?;
    let actual = (
        reparsed.proposals.len() as u64,
        reparsed.settings.len() as u64,
        reparsed.job_posts.len() as u64,
    );
    let claimed = (
        reparsed.metadata.proposal_count,
        reparsed.metadata.settings_count,
        reparsed.metadata.job_posts_count,
    );
    let original = (
        expected.proposal_count,
        expected.settings_count,
        expected.job_posts_count,
    );
    if actual != claimed || actual != original {
        return Err(BackupError::BackupVerificationFailed(format!(
            "row counts diverge: exported {original:?}, header {claimed:?}, parsed {actual:?}"
        )));
    }
    Ok(())
}

/// Reads and parses a snapshot file.
pub fn load_backup(path: &Path) -> Result<BackupDocument, BackupError> {
    let bytes = fs::read(path)
        .map_err(|e| BackupError::BackupVerificationFailed(format!("reading back snapshot: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| BackupError::BackupVerificationFailed(format!("re-parsing snapshot: {e}")))
}

/// Lists existing snapshots, newest first.
pub fn list_backups(data_dir: &Path) -> Vec<PathBuf> {
    let backup_dir = data_dir.join(BACKUP_DIR);
    let Ok(entries) = fs::read_dir(&backup_dir) else {
        return Vec::new();
    };
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(BACKUP_PREFIX) && n.ends_with(".json"))
        })
        .collect();
    paths.sort();
    paths.reverse();
    paths
}
