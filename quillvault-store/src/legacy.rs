//! The pre-encryption plaintext store.
//!
//! Holds the same business tables as the encrypted store, with payloads as
//! plain JSON text. During migration it is only ever read; afterwards the
//! file is renamed to an inert suffix and kept until the user explicitly
//! deletes it.

use crate::error::{StoreError, StoreResult};
use crate::schema::{check_table, create_business_tables, Record};
use duckdb::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Plaintext DuckDB store holding the business tables.
pub struct LegacyStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl LegacyStore {
    /// Creates (or opens) a legacy store at `path`, applying the schema.
    pub fn create(path: &Path) -> StoreResult<Self> {
        let conn = crate::open_duckdb_with_wal_recovery(path, "128MB", 1)
            .map_err(|e| StoreError::Database(format!("opening legacy store: {e}")))?;
        create_business_tables(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path.to_path_buf(),
        })
    }

    /// Opens an existing legacy store; fails if the file is missing.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if !path.exists() {
            return Err(StoreError::Database(format!(
                "legacy store not found: {}",
                path.display()
            )));
        }
        Self::create(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Inserts (or replaces) a row with its payload stored as plaintext JSON.
    pub fn insert(&self, table: &str, record: &Record) -> StoreResult<()> {
        check_table(table)?;
        let payload = serde_json::to_string(&record.payload)?;
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

    /// Reads every row of a table, payloads parsed back into JSON.
    pub fn fetch_all(&self, table: &str) -> StoreResult<Vec<Record>> {
        check_table(table)?;
        let conn = self.conn.lock().map_err(|e| StoreError::Database(e.to_string()))?;
        let mut stmt = conn.prepare(&format!(
            "SELECT id, payload, created_at, modified_at FROM {table} ORDER BY id"
        ))?;
        let rows: Vec<(String, String, i64, i64)> = stmt
            .query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .collect::<Result<_, _>>()?;

        rows.into_iter()
            .map(|(id, payload, created_at, modified_at)| {
                Ok(Record {
                    id,
                    payload: serde_json::from_str(&payload)?,
                    created_at,
                    modified_at,
                })
            })
            .collect()
    }

    /// Row count of a table.
    pub fn count(&self, table: &str) -> StoreResult<i64> {
        check_table(table)?;
        let conn = self.conn.lock().map_err(|e| StoreError::Database(e.to_string()))?;
        let n = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
            row.get(0)
        })?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str) -> Record {
        Record {
            id: id.into(),
            payload: json!({"title": format!("row {id}")}),
            created_at: 1_000,
            modified_at: 2_000,
        }
    }

    #[test]
    fn insert_fetch_count() {
        let dir = tempfile::tempdir().unwrap();
        let store = LegacyStore::create(&dir.path().join("app.db")).unwrap();

        store.insert("proposals", &record("a")).unwrap();
        store.insert("proposals", &record("b")).unwrap();

        assert_eq!(store.count("proposals").unwrap(), 2);
        let rows = store.fetch_all("proposals").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].payload["title"], "row a");
    }

    #[test]
    fn unknown_table_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = LegacyStore::create(&dir.path().join("app.db")).unwrap();
        let err = store.count("entities; DROP TABLE proposals").unwrap_err();
        assert!(matches!(err, StoreError::UnknownTable(_)));
    }

    #[test]
    fn open_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(LegacyStore::open(&dir.path().join("nope.db")).is_err());
    }
}
