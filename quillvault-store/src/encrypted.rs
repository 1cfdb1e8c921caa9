//! The live encrypted store.
//!
//! Backed by DuckDB; business payloads are encrypted with the derived key
//! before insertion, so the file never contains plaintext business data. A
//! verification token in the meta table (a known plaintext encrypted under
//! the store key) makes a wrong-key `open` fail cleanly instead of returning
//! garbage.
//!
//! The store holds the derived key for the lifetime of the session — that is
//! the engine's unavoidable copy. Callers keep no key material of their own;
//! `DerivedKey` wipes itself on drop.

use crate::error::{io_error, StoreError, StoreResult};
use crate::schema::{check_table, create_business_tables, Record, BUSINESS_TABLES};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use duckdb::{params, Connection};
use quillvault_crypto::{decrypt, encrypt, DerivedKey, EncryptedData};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Verification token: a known plaintext encrypted with the store key.
/// On open we decrypt it and check it matches.
const VERIFICATION_PLAINTEXT: &[u8] = b"quillvault-key-verification-v1";

/// Schema alias the legacy database is attached under.
const LEGACY_ALIAS: &str = "legacy";

/// Encrypted business store keyed by a passphrase-derived key.
pub struct EncryptedStore {
    conn: Arc<Mutex<Connection>>,
    key: Arc<RwLock<DerivedKey>>,
    path: PathBuf,
    attached: Arc<AtomicBool>,
}

// Debug must never print key material.
impl std::fmt::Debug for EncryptedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Guard for an attached legacy database. Detaches on drop, releasing the
/// store's single attachment slot.
pub struct AttachedLegacy {
    conn: Arc<Mutex<Connection>>,
    attached: Arc<AtomicBool>,
}

impl std::fmt::Debug for AttachedLegacy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AttachedLegacy")
    }
}

impl Drop for AttachedLegacy {
    fn drop(&mut self) {
        if let Ok(conn) = self.conn.lock() {
            if let Err(e) = conn.execute_batch(&format!("DETACH {LEGACY_ALIAS};")) {
                tracing::warn!(error = %e, "failed to detach legacy database");
            }
        }
        self.attached.store(false, Ordering::SeqCst);
    }
}

fn read_verification(conn: &Connection) -> StoreResult<EncryptedData> {
    let bytes: Vec<u8> = conn
        .query_row(
            "SELECT value FROM vault_meta WHERE key = 'verification'",
            [],
            |row| row.get(0),
        )
        .map_err(|e| StoreError::Database(format!("reading verification token: {e}")))?;
    Ok(serde_json::from_slice(&bytes)?)
}

impl EncryptedStore {
    /// Initializes a new encrypted store at `path`, keyed by `key`.
    ///
    /// Fails with `StoreCreateFailed` if the file already exists or on any
    /// I/O error — a half-created store must never be mistaken for a live one.
    pub fn create(path: &Path, key: &DerivedKey) -> StoreResult<Self> {
        if path.exists() {
            return Err(StoreError::StoreCreateFailed(format!(
                "file already exists: {}",
                path.display()
            )));
        }

        let conn = crate::open_duckdb_with_wal_recovery(path, "128MB", 1)
            .map_err(|e| StoreError::StoreCreateFailed(e.to_string()))?;

        create_business_tables(&conn)
            .map_err(|e| StoreError::StoreCreateFailed(format!("applying schema: {e}")))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS vault_meta (
                key VARCHAR PRIMARY KEY,
                value BLOB NOT NULL
            );",
        )
        .map_err(|e| StoreError::StoreCreateFailed(format!("applying schema: {e}")))?;

        let verification = encrypt(key, VERIFICATION_PLAINTEXT)
            .map_err(|e| StoreError::Crypto(e.to_string()))?;
        let verification_bytes = serde_json::to_vec(&verification)?;
        conn.execute(
            "INSERT INTO vault_meta (key, value) VALUES ('verification', ?)",
            params![verification_bytes],
        )
        .map_err(|e| StoreError::StoreCreateFailed(format!("writing verification token: {e}")))?;

        tracing::info!(path = %path.display(), "created encrypted store");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            key: Arc::new(RwLock::new(key.clone())),
            path: path.to_path_buf(),
            attached: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Opens an existing encrypted store, verifying the key against the
    /// stored verification token.
    ///
    /// A wrong key fails with `AuthenticationFailed` — no partial open, no
    /// corruption, and no way to read garbage rows.
    pub fn open(path: &Path, key: &DerivedKey) -> StoreResult<Self> {
        if !path.exists() {
            return Err(StoreError::Database(format!(
                "encrypted store not found: {}",
                path.display()
            )));
        }

        let conn = crate::open_duckdb_with_wal_recovery(path, "128MB", 1)
            .map_err(|e| StoreError::Database(format!("opening encrypted store: {e}")))?;

        let verification = read_verification(&conn)?;
        let decrypted =
            decrypt(key, &verification).map_err(|_| StoreError::AuthenticationFailed)?;
        if decrypted != VERIFICATION_PLAINTEXT {
            return Err(StoreError::AuthenticationFailed);
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            key: Arc::new(RwLock::new(key.clone())),
            path: path.to_path_buf(),
            attached: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Checks a candidate key against the stored verification token.
    ///
    /// Key comparison happens inside the AEAD tag check, never on raw key
    /// bytes. Used to verify the old passphrase before a key change.
    pub fn verify_key(&self, candidate: &DerivedKey) -> StoreResult<bool> {
        let conn = self.conn.lock().map_err(|e| StoreError::Database(e.to_string()))?;
        let verification = read_verification(&conn)?;
        drop(conn);
        Ok(decrypt(candidate, &verification)
            .map(|plaintext| plaintext == VERIFICATION_PLAINTEXT)
            .unwrap_or(false))
    }

    fn current_key(&self) -> StoreResult<DerivedKey> {
        Ok(self
            .key
            .read()
            .map_err(|e| StoreError::Database(e.to_string()))?
            .clone())
    }

    fn encode_payload(&self, key: &DerivedKey, payload: &serde_json::Value) -> StoreResult<String> {
        let plaintext = serde_json::to_vec(payload)?;
        let enc = encrypt(key, &plaintext).map_err(|e| StoreError::Crypto(e.to_string()))?;
        Ok(BASE64.encode(serde_json::to_vec(&enc)?))
    }

    fn decode_payload(&self, key: &DerivedKey, raw: &str) -> StoreResult<serde_json::Value> {
        let enc_bytes = BASE64
            .decode(raw)
            .map_err(|e| StoreError::Crypto(format!("payload base64 decode: {e}")))?;
        let enc: EncryptedData = serde_json::from_slice(&enc_bytes)?;
        let plaintext = decrypt(key, &enc).map_err(|e| StoreError::Crypto(e.to_string()))?;
        Ok(serde_json::from_slice(&plaintext)?)
    }

    /// Inserts (or replaces) a row, encrypting its payload.
    pub fn insert(&self, table: &str, record: &Record) -> StoreResult<()> {
        check_table(table)?;
        let key = self.current_key()?;
        let payload = self.encode_payload(&key, &record.payload)?;

        let conn = self.conn.lock().map_err(|e| StoreError::Database(e.to_string()))?;
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {table} (id, payload, created_at, modified_at)
                 VALUES (?, ?, ?, ?)"
            ),
            params![record.id, payload, record.created_at, record.modified_at],
        )?;
        Ok(())
    }

    /// Reads and decrypts every row of a table.
    pub fn fetch_all(&self, table: &str) -> StoreResult<Vec<Record>> {
        check_table(table)?;
        let key = self.current_key()?;

        let conn = self.conn.lock().map_err(|e| StoreError::Database(e.to_string()))?;
        let mut stmt = conn.prepare(&format!(
            "SELECT id, payload, created_at, modified_at FROM {table} ORDER BY id"
        ))?;
        let rows: Vec<(String, String, i64, i64)> = stmt
            .query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .collect::<Result<_, _>>()?;
        drop(stmt);
        drop(conn);

        rows.into_iter()
            .map(|(id, raw, created_at, modified_at)| {
                Ok(Record {
                    id,
                    payload: self.decode_payload(&key, &raw)?,
                    created_at,
                    modified_at,
                })
            })
            .collect()
    }

    /// Row count of a table in this store.
    pub fn count(&self, table: &str) -> StoreResult<i64> {
        check_table(table)?;
        let conn = self.conn.lock().map_err(|e| StoreError::Database(e.to_string()))?;
        let n = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
            row.get(0)
        })?;
        Ok(n)
    }

    /// Atomically changes the store's encryption key.
    ///
    /// Decrypts and re-encrypts every business payload and the verification
    /// token inside one transaction; any failure rolls the whole thing back
    /// and the old key stays valid.
    pub fn rekey(&self, new_key: &DerivedKey) -> StoreResult<()> {
        let old_key = self.current_key()?;

        let conn = self.conn.lock().map_err(|e| StoreError::Database(e.to_string()))?;
        conn.execute_batch("BEGIN TRANSACTION;")
            .map_err(|e| StoreError::RekeyFailed(e.to_string()))?;

        let result = (|| -> StoreResult<()> {
            for table in BUSINESS_TABLES {
                let mut stmt = conn.prepare(&format!("SELECT id, payload FROM {table}"))?;
                let rows: Vec<(String, String)> = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<Result<_, _>>()?;
                drop(stmt);

                for (id, raw) in rows {
                    let enc_bytes = BASE64
                        .decode(&raw)
                        .map_err(|e| StoreError::Crypto(format!("{table}/{id}: {e}")))?;
                    let enc: EncryptedData = serde_json::from_slice(&enc_bytes)?;
                    let plaintext = decrypt(&old_key, &enc)
                        .map_err(|e| StoreError::Crypto(format!("{table}/{id}: {e}")))?;
                    let reenc = encrypt(new_key, &plaintext)
                        .map_err(|e| StoreError::Crypto(format!("{table}/{id}: {e}")))?;
                    let raw_new = BASE64.encode(serde_json::to_vec(&reenc)?);
                    conn.execute(
                        &format!("UPDATE {table} SET payload = ? WHERE id = ?"),
                        params![raw_new, id],
                    )?;
                }
            }

            let verification = encrypt(new_key, VERIFICATION_PLAINTEXT)
                .map_err(|e| StoreError::Crypto(e.to_string()))?;
            let verification_bytes = serde_json::to_vec(&verification)?;
            conn.execute(
                "UPDATE vault_meta SET value = ? WHERE key = 'verification'",
                params![verification_bytes],
            )?;
            Ok(())
        })();

        match result {
            Ok(()) => {
                conn.execute_batch("COMMIT;")
                    .map_err(|e| StoreError::RekeyFailed(format!("commit: {e}")))?;
                drop(conn);
                let mut guard = self
                    .key
                    .write()
                    .map_err(|e| StoreError::Database(e.to_string()))?;
                *guard = new_key.clone();
                tracing::info!(path = %self.path.display(), "store rekeyed");
                Ok(())
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK;");
                Err(StoreError::RekeyFailed(e.to_string()))
            }
        }
    }

    /// Attaches the legacy database read-only onto this store's connection
    /// so both schemas participate in one transaction.
    ///
    /// Only one attachment is supported at a time; the returned guard
    /// detaches on drop.
    pub fn attach_legacy(&self, legacy_path: &Path) -> StoreResult<AttachedLegacy> {
        if self.attached.swap(true, Ordering::SeqCst) {
            return Err(StoreError::AttachFailed(
                "a legacy database is already attached".to_string(),
            ));
        }

        let escaped = legacy_path.to_string_lossy().replace('\'', "''");
        let conn = match self.conn.lock() {
            Ok(c) => c,
            Err(e) => {
                self.attached.store(false, Ordering::SeqCst);
                return Err(StoreError::Database(e.to_string()));
            }
        };
        if let Err(e) =
            conn.execute_batch(&format!("ATTACH '{escaped}' AS {LEGACY_ALIAS} (READ_ONLY);"))
        {
            drop(conn);
            self.attached.store(false, Ordering::SeqCst);
            return Err(StoreError::AttachFailed(format!(
                "{}: {e}",
                legacy_path.display()
            )));
        }
        drop(conn);

        tracing::debug!(path = %legacy_path.display(), "attached legacy database");
        Ok(AttachedLegacy {
            conn: Arc::clone(&self.conn),
            attached: Arc::clone(&self.attached),
        })
    }

    /// Copies every business table from the attached legacy schema into this
    /// store, encrypting payloads, inside one exclusive transaction.
    ///
    /// Holds the connection guard for the whole copy — nothing else can read
    /// or write either schema until it finishes. All-or-nothing: any failure
    /// rolls back and the error names the table it happened in. Returns
    /// per-table copied row counts.
    pub fn copy_tables_from_attached(
        &self,
        _attachment: &AttachedLegacy,
    ) -> StoreResult<BTreeMap<String, u64>> {
        let key = self.current_key()?;

        let conn = self.conn.lock().map_err(|e| StoreError::Database(e.to_string()))?;
        conn.execute_batch("BEGIN TRANSACTION;")?;

        let result = (|| -> StoreResult<BTreeMap<String, u64>> {
            let mut counts = BTreeMap::new();
            for table in BUSINESS_TABLES {
                let context = |e: String| StoreError::Database(format!("table {table}: {e}"));

                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT id, payload, created_at, modified_at FROM {LEGACY_ALIAS}.{table}"
                    ))
                    .map_err(|e| context(e.to_string()))?;
                let rows: Vec<(String, String, i64, i64)> = stmt
                    .query_map([], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                    })
                    .map_err(|e| context(e.to_string()))?
                    .collect::<Result<_, _>>()
                    .map_err(|e| context(e.to_string()))?;
                drop(stmt);

                let mut copied = 0u64;
                for (id, plaintext_payload, created_at, modified_at) in rows {
                    let payload_value: serde_json::Value =
                        serde_json::from_str(&plaintext_payload)
                            .map_err(|e| context(format!("row {id}: {e}")))?;
                    let plaintext = serde_json::to_vec(&payload_value)
                        .map_err(|e| context(format!("row {id}: {e}")))?;
                    let enc = encrypt(&key, &plaintext)
                        .map_err(|e| context(format!("row {id}: {e}")))?;
                    let raw = BASE64.encode(
                        serde_json::to_vec(&enc).map_err(|e| context(format!("row {id}: {e}")))?,
                    );
                    conn.execute(
                        &format!(
                            "INSERT INTO {table} (id, payload, created_at, modified_at)
                             VALUES (?, ?, ?, ?)"
                        ),
                        params![id, raw, created_at, modified_at],
                    )
                    .map_err(|e| context(format!("row {id}: {e}")))?;
                    copied += 1;
                }
                counts.insert(table.to_string(), copied);
                tracing::debug!(table, rows = copied, "copied table");
            }
            Ok(counts)
        })();

        match result {
            Ok(counts) => {
                conn.execute_batch("COMMIT;")
                    .map_err(|e| StoreError::Database(format!("commit: {e}")))?;
                Ok(counts)
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK;");
                Err(e)
            }
        }
    }

    /// Independent row count of a table in the attached legacy schema.
    pub fn count_attached(&self, _attachment: &AttachedLegacy, table: &str) -> StoreResult<i64> {
        check_table(table)?;
        let conn = self.conn.lock().map_err(|e| StoreError::Database(e.to_string()))?;
        let n = conn.query_row(
            &format!("SELECT COUNT(*) FROM {LEGACY_ALIAS}.{table}"),
            [],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    /// Deletes the store file. Consumes the store; used by migration abort
    /// handling so a partial store never survives.
    pub fn destroy(self) -> StoreResult<()> {
        let path = self.path.clone();
        drop(self);
        // A WAL file may sit alongside an interrupted store.
        let _ = std::fs::remove_file(path.with_extension(format!(
            "{}.wal",
            path.extension().map(|e| e.to_string_lossy()).unwrap_or_default()
        )));
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("deleting partial encrypted store", e)),
        }
    }
}
