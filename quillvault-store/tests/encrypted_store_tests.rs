use quillvault_crypto::generate_random_key;
use quillvault_store::{EncryptedStore, LegacyStore, Record, StoreError, BUSINESS_TABLES};
use serde_json::json;

fn record(id: &str, title: &str) -> Record {
    Record {
        id: id.into(),
        payload: json!({"title": title, "body": "lorem ipsum"}),
        created_at: 1_000,
        modified_at: 2_000,
    }
}

// ── Create / open / authenticate ─────────────────────────────────

#[test]
fn create_then_reopen_with_same_key() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.enc");
    let key = generate_random_key();

    let store = EncryptedStore::create(&path, &key).unwrap();
    store.insert("proposals", &record("p1", "First")).unwrap();
    drop(store);

    let reopened = EncryptedStore::open(&path, &key).unwrap();
    let rows = reopened.fetch_all("proposals").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].payload["title"], "First");
}

#[test]
fn open_with_wrong_key_fails_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.enc");
    let key = generate_random_key();

    let store = EncryptedStore::create(&path, &key).unwrap();
    store.insert("proposals", &record("p1", "First")).unwrap();
    drop(store);

    let err = EncryptedStore::open(&path, &generate_random_key()).unwrap_err();
    assert!(matches!(err, StoreError::AuthenticationFailed));

    // The right key still works afterwards — no corruption from the failed open.
    let store = EncryptedStore::open(&path, &key).unwrap();
    assert_eq!(store.count("proposals").unwrap(), 1);
}

#[test]
fn create_refuses_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.enc");
    std::fs::write(&path, b"something").unwrap();

    let err = EncryptedStore::create(&path, &generate_random_key()).unwrap_err();
    assert!(matches!(err, StoreError::StoreCreateFailed(_)));
}

#[test]
fn payload_is_ciphertext_at_rest() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.enc");
    let store = EncryptedStore::create(&path, &generate_random_key()).unwrap();
    store
        .insert("proposals", &record("p1", "visible-title-marker"))
        .unwrap();
    drop(store);

    // Read the raw column through a plain connection: it must not be JSON
    // and must not contain the plaintext marker.
    let conn = duckdb::Connection::open(&path).unwrap();
    let raw: String = conn
        .query_row("SELECT payload FROM proposals WHERE id = 'p1'", [], |row| {
            row.get(0)
        })
        .unwrap();
    assert!(serde_json::from_str::<serde_json::Value>(&raw).is_err());
    assert!(!raw.contains("visible-title-marker"));
}

#[test]
fn verify_key_checks_without_reopening() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.enc");
    let key = generate_random_key();

    let store = EncryptedStore::create(&path, &key).unwrap();
    assert!(store.verify_key(&key).unwrap());
    assert!(!store.verify_key(&generate_random_key()).unwrap());
}

#[test]
fn store_debug_shows_path_not_key() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.enc");
    let store = EncryptedStore::create(&path, &generate_random_key()).unwrap();
    let rendered = format!("{store:?}");
    assert!(rendered.contains("app.enc"));
    assert!(!rendered.contains("key"));
}

// ── Rekey ────────────────────────────────────────────────────────

#[test]
fn rekey_swaps_which_key_opens_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.enc");
    let old_key = generate_random_key();
    let new_key = generate_random_key();

    let store = EncryptedStore::create(&path, &old_key).unwrap();
    store.insert("proposals", &record("p1", "First")).unwrap();
    store.insert("settings", &record("theme", "dark")).unwrap();
    store.rekey(&new_key).unwrap();

    // Session continues to work on the new key.
    assert_eq!(store.fetch_all("proposals").unwrap()[0].payload["title"], "First");
    drop(store);

    assert!(matches!(
        EncryptedStore::open(&path, &old_key).unwrap_err(),
        StoreError::AuthenticationFailed
    ));
    let reopened = EncryptedStore::open(&path, &new_key).unwrap();
    assert_eq!(reopened.count("proposals").unwrap(), 1);
    assert_eq!(reopened.count("settings").unwrap(), 1);
}

// ── Attach + copy ────────────────────────────────────────────────

fn seeded_legacy(dir: &std::path::Path, proposals: usize, settings: usize, jobs: usize) -> LegacyStore {
    let legacy = LegacyStore::create(&dir.join("app.db")).unwrap();
    for i in 0..proposals {
        legacy.insert("proposals", &record(&format!("p{i}"), "prop")).unwrap();
    }
    for i in 0..settings {
        legacy.insert("settings", &record(&format!("s{i}"), "set")).unwrap();
    }
    for i in 0..jobs {
        legacy.insert("job_posts", &record(&format!("j{i}"), "job")).unwrap();
    }
    legacy
}

#[test]
fn copy_from_attached_legacy_moves_every_table() {
    let dir = tempfile::tempdir().unwrap();
    let legacy = seeded_legacy(dir.path(), 3, 2, 1);
    let legacy_path = legacy.path().to_path_buf();
    drop(legacy);

    let store = EncryptedStore::create(&dir.path().join("app.enc"), &generate_random_key()).unwrap();
    let attachment = store.attach_legacy(&legacy_path).unwrap();

    let counts = store.copy_tables_from_attached(&attachment).unwrap();
    assert_eq!(counts["proposals"], 3);
    assert_eq!(counts["settings"], 2);
    assert_eq!(counts["job_posts"], 1);

    assert_eq!(store.count_attached(&attachment, "proposals").unwrap(), 3);
    drop(attachment);

    for table in BUSINESS_TABLES {
        let expected = counts[table] as i64;
        assert_eq!(store.count(table).unwrap(), expected);
    }
    // Payloads decrypt to the original documents.
    assert_eq!(store.fetch_all("settings").unwrap()[0].payload["title"], "set");
}

#[test]
fn only_one_attachment_at_a_time() {
    let dir = tempfile::tempdir().unwrap();
    let legacy = seeded_legacy(dir.path(), 1, 0, 0);
    let legacy_path = legacy.path().to_path_buf();
    drop(legacy);

    let store = EncryptedStore::create(&dir.path().join("app.enc"), &generate_random_key()).unwrap();
    let first = store.attach_legacy(&legacy_path).unwrap();
    assert!(matches!(
        store.attach_legacy(&legacy_path).unwrap_err(),
        StoreError::AttachFailed(_)
    ));

    // Dropping the guard frees the slot.
    drop(first);
    let second = store.attach_legacy(&legacy_path).unwrap();
    drop(second);
}

#[test]
fn failed_copy_rolls_back_all_tables() {
    let dir = tempfile::tempdir().unwrap();

    // A "legacy" file missing the job_posts table: the copy fails on the
    // third table, after two tables were already written in the transaction.
    let broken_path = dir.path().join("broken.db");
    {
        let conn = duckdb::Connection::open(&broken_path).unwrap();
        conn.execute_batch(
            "CREATE TABLE proposals (id VARCHAR PRIMARY KEY, payload VARCHAR NOT NULL, created_at BIGINT NOT NULL, modified_at BIGINT NOT NULL);
             CREATE TABLE settings (id VARCHAR PRIMARY KEY, payload VARCHAR NOT NULL, created_at BIGINT NOT NULL, modified_at BIGINT NOT NULL);
             INSERT INTO proposals VALUES ('p1', '{}', 1, 1);
             INSERT INTO settings VALUES ('s1', '{}', 1, 1);",
        )
        .unwrap();
    }

    let store = EncryptedStore::create(&dir.path().join("app.enc"), &generate_random_key()).unwrap();
    let attachment = store.attach_legacy(&broken_path).unwrap();

    let err = store.copy_tables_from_attached(&attachment).unwrap_err();
    assert!(err.to_string().contains("job_posts"));
    drop(attachment);

    // No partial state: every destination table is empty after the rollback.
    for table in BUSINESS_TABLES {
        assert_eq!(store.count(table).unwrap(), 0, "table {table} not empty");
    }
}

#[test]
fn destroy_removes_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.enc");
    let store = EncryptedStore::create(&path, &generate_random_key()).unwrap();
    assert!(path.exists());
    store.destroy().unwrap();
    assert!(!path.exists());
}
