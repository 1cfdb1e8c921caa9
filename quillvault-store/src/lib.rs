//! DuckDB storage layer for QuillVault.
//!
//! Two stores share the same business schema (proposals, settings,
//! job_posts):
//!
//! - [`LegacyStore`] — the pre-encryption plaintext database. Read-only
//!   during migration; renamed (never deleted) afterwards.
//! - [`EncryptedStore`] — the live database. Row payloads are encrypted with
//!   the passphrase-derived key before they touch the file; a verification
//!   token in the meta table lets `open` fail cleanly on a wrong key.
//!
//! Each store owns a single connection behind a mutex. That mutex is the
//! exclusive-access lock the migration engine relies on: while it holds the
//! guard for its copy transaction, nothing else can touch either schema.

mod encrypted;
mod error;
mod legacy;
mod salt;
mod schema;

pub use encrypted::{AttachedLegacy, EncryptedStore};
pub use error::{StoreError, StoreResult};
pub use legacy::LegacyStore;
pub use salt::{load_or_create_salt, SALT_FILE};
pub use schema::{Record, BUSINESS_TABLES, SCHEMA_VERSION};

/// Open a DuckDB connection with stale WAL recovery and resource limits.
///
/// If the initial open fails and a `.wal` file exists alongside the database,
/// it is removed and the open is retried once. This handles the common case
/// where an unclean shutdown leaves a WAL file that prevents reopening.
///
/// `memory_limit` and `threads` cap per-database resource usage (DuckDB
/// defaults to ~80% of system RAM and all cores, far too aggressive when the
/// legacy and encrypted databases are open concurrently).
pub(crate) fn open_duckdb_with_wal_recovery(
    path: &std::path::Path,
    memory_limit: &str,
    threads: u32,
) -> Result<duckdb::Connection, duckdb::Error> {
    let conn = match duckdb::Connection::open(path) {
        Ok(c) => c,
        Err(first_err) => {
            let wal_path = path.with_extension(
                path.extension()
                    .map(|ext| format!("{}.wal", ext.to_string_lossy()))
                    .unwrap_or_else(|| "wal".to_string()),
            );
            if wal_path.exists() {
                tracing::warn!(
                    wal = %wal_path.display(),
                    "DuckDB open failed, removing stale WAL and retrying"
                );
                if std::fs::remove_file(&wal_path).is_ok() {
                    let c = duckdb::Connection::open(path)?;
                    apply_resource_limits(&c, memory_limit, threads)?;
                    return Ok(c);
                }
            }
            return Err(first_err);
        }
    };
    apply_resource_limits(&conn, memory_limit, threads)?;
    Ok(conn)
}

fn apply_resource_limits(
    conn: &duckdb::Connection,
    memory_limit: &str,
    threads: u32,
) -> Result<(), duckdb::Error> {
    conn.execute_batch(&format!(
        "PRAGMA memory_limit='{}'; PRAGMA threads={};",
        memory_limit, threads
    ))
}
