use quillvault_crypto::generate_random_key;
use quillvault_migrate::{
    create_backup, BackupMetadata, BackupSnapshot, MigrateError, MigrationEngine, MigrationMarker,
    MigrationPhase, MARKER_FILE,
};
use quillvault_store::{EncryptedStore, LegacyStore, Record, StoreError};
use serde_json::json;
use std::path::{Path, PathBuf};

struct Paths {
    legacy: PathBuf,
    encrypted: PathBuf,
    marker: PathBuf,
}

fn paths(dir: &Path) -> Paths {
    Paths {
        legacy: dir.join("app.db"),
        encrypted: dir.join("app.enc"),
        marker: dir.join(MARKER_FILE),
    }
}

fn seed(legacy: &LegacyStore, table: &str, prefix: &str, n: usize) {
    for i in 0..n {
        legacy
            .insert(
                table,
                &Record {
                    id: format!("{prefix}{i}"),
                    payload: json!({"title": format!("{table} {i}")}),
                    created_at: 100,
                    modified_at: 200,
                },
            )
            .unwrap();
    }
}

fn dummy_snapshot(dir: &Path) -> BackupSnapshot {
    BackupSnapshot {
        path: dir.join("pre-encryption-backup-test.json"),
        metadata: BackupMetadata {
            export_date: "2026-01-01T00:00:00Z".into(),
            app_version: "0.0.0".into(),
            schema_version: 1,
            proposal_count: 0,
            settings_count: 0,
            job_posts_count: 0,
        },
    }
}

// ── Scenario A: full happy path with exact counts ────────────────

#[test]
fn migrates_47_12_8_and_reports_exact_counts() {
    let dir = tempfile::tempdir().unwrap();
    let p = paths(dir.path());
    let key = generate_random_key();

    let legacy = LegacyStore::create(&p.legacy).unwrap();
    seed(&legacy, "proposals", "p", 47);
    seed(&legacy, "settings", "s", 12);
    seed(&legacy, "job_posts", "j", 8);
    let backup = create_backup(&legacy, dir.path()).unwrap();
    drop(legacy);

    let mut engine = MigrationEngine::new(&p.legacy, &p.encrypted, &p.marker);
    assert!(!engine.is_complete());
    let report = engine.run(&key, &backup).unwrap();

    assert_eq!(engine.phase(), MigrationPhase::Complete);
    assert_eq!(report.counts["proposals"], 47);
    assert_eq!(report.counts["settings"], 12);
    assert_eq!(report.counts["job_posts"], 8);

    // Legacy renamed to the inert suffix, never deleted.
    assert!(!p.legacy.exists());
    assert!(report.legacy_renamed_to.ends_with("app.enc.old"));
    assert!(report.legacy_renamed_to.exists());

    // Marker present with the verified counts.
    assert!(engine.is_complete());
    let marker = MigrationMarker::load(&p.marker).unwrap().unwrap();
    assert_eq!(marker.counts, report.counts);

    // The app reopens the store normally and finds everything.
    let store = EncryptedStore::open(&p.encrypted, &key).unwrap();
    assert_eq!(store.count("proposals").unwrap(), 47);
    assert_eq!(store.count("settings").unwrap(), 12);
    assert_eq!(store.count("job_posts").unwrap(), 8);
    assert_eq!(
        store.fetch_all("job_posts").unwrap()[0].payload["title"],
        "job_posts 0"
    );
}

// ── Scenario B: wrong key after migration, artifacts untouched ───

#[test]
fn wrong_key_after_migration_fails_and_touches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let p = paths(dir.path());
    let key = generate_random_key();

    let legacy = LegacyStore::create(&p.legacy).unwrap();
    seed(&legacy, "proposals", "p", 2);
    let backup = create_backup(&legacy, dir.path()).unwrap();
    drop(legacy);

    let report = MigrationEngine::new(&p.legacy, &p.encrypted, &p.marker)
        .run(&key, &backup)
        .unwrap();

    let err = EncryptedStore::open(&p.encrypted, &generate_random_key()).unwrap_err();
    assert!(matches!(err, StoreError::AuthenticationFailed));
    assert!(report.legacy_renamed_to.exists());
    assert!(backup.path.exists());
}

// ── Copy failure: abort, delete partial store, legacy untouched ──

#[test]
fn copy_failure_deletes_partial_store_and_allows_retry() {
    let dir = tempfile::tempdir().unwrap();
    let p = paths(dir.path());
    let key = generate_random_key();

    // Legacy file missing the job_posts table: copy fails on table three.
    {
        let conn = duckdb::Connection::open(&p.legacy).unwrap();
        conn.execute_batch(
            "CREATE TABLE proposals (id VARCHAR PRIMARY KEY, payload VARCHAR NOT NULL, created_at BIGINT NOT NULL, modified_at BIGINT NOT NULL);
             CREATE TABLE settings (id VARCHAR PRIMARY KEY, payload VARCHAR NOT NULL, created_at BIGINT NOT NULL, modified_at BIGINT NOT NULL);
             INSERT INTO proposals VALUES ('p1', '{\"title\":\"x\"}', 1, 1);",
        )
        .unwrap();
    }
    let legacy_bytes = std::fs::read(&p.legacy).unwrap();

    let mut engine = MigrationEngine::new(&p.legacy, &p.encrypted, &p.marker);
    let err = engine.run(&key, &dummy_snapshot(dir.path())).unwrap_err();
    assert!(matches!(err, MigrateError::CopyFailed(_)));
    assert!(err.to_string().contains("job_posts"));
    assert_eq!(engine.phase(), MigrationPhase::Failed);

    // No partial encrypted store, no marker, legacy byte-identical.
    assert!(!p.encrypted.exists());
    assert!(!p.marker.exists());
    assert_eq!(std::fs::read(&p.legacy).unwrap(), legacy_bytes);

    // Retry from the top after the legacy store is repaired.
    {
        let conn = duckdb::Connection::open(&p.legacy).unwrap();
        conn.execute_batch(
            "CREATE TABLE job_posts (id VARCHAR PRIMARY KEY, payload VARCHAR NOT NULL, created_at BIGINT NOT NULL, modified_at BIGINT NOT NULL);",
        )
        .unwrap();
    }
    let mut engine = MigrationEngine::new(&p.legacy, &p.encrypted, &p.marker);
    let report = engine.run(&key, &dummy_snapshot(dir.path())).unwrap();
    assert_eq!(report.counts["proposals"], 1);
    assert!(engine.is_complete());
}

// ── Preconditions ────────────────────────────────────────────────

#[test]
fn crash_leftover_store_is_swept_and_retry_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let p = paths(dir.path());
    let key = generate_random_key();

    let legacy = LegacyStore::create(&p.legacy).unwrap();
    seed(&legacy, "proposals", "p", 3);
    let backup = create_backup(&legacy, dir.path()).unwrap();
    drop(legacy);

    // A process killed mid-copy leaves a partial destination (and WAL)
    // behind with no marker and the legacy store untouched.
    std::fs::write(&p.encrypted, b"partial store from a dead process").unwrap();
    std::fs::write(format!("{}.wal", p.encrypted.to_string_lossy()), b"wal").unwrap();

    let mut engine = MigrationEngine::new(&p.legacy, &p.encrypted, &p.marker);
    let report = engine.run(&key, &backup).unwrap();
    assert_eq!(report.counts["proposals"], 3);
    assert!(engine.is_complete());

    let store = EncryptedStore::open(&p.encrypted, &key).unwrap();
    assert_eq!(store.count("proposals").unwrap(), 3);
}

#[test]
fn completed_migration_is_never_clobbered_by_a_rerun() {
    let dir = tempfile::tempdir().unwrap();
    let p = paths(dir.path());
    let key = generate_random_key();

    let legacy = LegacyStore::create(&p.legacy).unwrap();
    seed(&legacy, "proposals", "p", 2);
    let backup = create_backup(&legacy, dir.path()).unwrap();
    drop(legacy);
    MigrationEngine::new(&p.legacy, &p.encrypted, &p.marker)
        .run(&key, &backup)
        .unwrap();

    // Marker present: the destination is live data, not a stale leftover.
    let err = MigrationEngine::new(&p.legacy, &p.encrypted, &p.marker)
        .run(&key, &backup)
        .unwrap_err();
    assert!(matches!(
        err,
        MigrateError::Store(StoreError::StoreCreateFailed(_))
    ));
    let store = EncryptedStore::open(&p.encrypted, &key).unwrap();
    assert_eq!(store.count("proposals").unwrap(), 2);
}

#[test]
fn marker_write_failure_sets_failed_phase() {
    let dir = tempfile::tempdir().unwrap();
    let p = paths(dir.path());
    // Marker path inside a directory that does not exist.
    let marker = dir.path().join("nonexistent").join(MARKER_FILE);
    let key = generate_random_key();

    let legacy = LegacyStore::create(&p.legacy).unwrap();
    seed(&legacy, "proposals", "p", 1);
    let backup = create_backup(&legacy, dir.path()).unwrap();
    drop(legacy);

    let mut engine = MigrationEngine::new(&p.legacy, &p.encrypted, &marker);
    let err = engine.run(&key, &backup).unwrap_err();
    assert!(matches!(err, MigrateError::MarkerWriteFailed(_)));
    assert_eq!(engine.phase(), MigrationPhase::Failed);
}

#[test]
fn missing_legacy_store_fails_at_attach() {
    let dir = tempfile::tempdir().unwrap();
    let p = paths(dir.path());

    let mut engine = MigrationEngine::new(&p.legacy, &p.encrypted, &p.marker);
    let err = engine
        .run(&generate_random_key(), &dummy_snapshot(dir.path()))
        .unwrap_err();
    assert!(matches!(err, MigrateError::Store(StoreError::AttachFailed(_))));
    assert_eq!(engine.phase(), MigrationPhase::Failed);
    // Abort handling removed the just-created destination file.
    assert!(!p.encrypted.exists());
}
