//! Business schema shared by the legacy and encrypted stores.

use crate::error::{StoreError, StoreResult};
use duckdb::Connection;
use serde::{Deserialize, Serialize};

/// The business tables migrated from the legacy store, in copy order.
pub const BUSINESS_TABLES: [&str; 3] = ["proposals", "settings", "job_posts"];

/// Version of the business schema, recorded in backups and store metadata.
pub const SCHEMA_VERSION: u32 = 1;

/// A single business row. `payload` is the full document; in the encrypted
/// store it is stored as ciphertext, in the legacy store as plaintext JSON.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub id: String,
    pub payload: serde_json::Value,
    pub created_at: i64,
    pub modified_at: i64,
}

/// Rejects table names outside the business schema before they are ever
/// interpolated into SQL.
pub(crate) fn check_table(table: &str) -> StoreResult<()> {
    if BUSINESS_TABLES.contains(&table) {
        Ok(())
    } else {
        Err(StoreError::UnknownTable(table.to_string()))
    }
}

/// Creates all business tables if they do not exist.
pub(crate) fn create_business_tables(conn: &Connection) -> Result<(), duckdb::Error> {
    let mut ddl = String::new();
    for table in BUSINESS_TABLES {
        ddl.push_str(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id VARCHAR PRIMARY KEY,
                payload VARCHAR NOT NULL,
                created_at BIGINT NOT NULL,
                modified_at BIGINT NOT NULL
            );"
        ));
    }
    conn.execute_batch(&ddl)
}
