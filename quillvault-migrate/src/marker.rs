//! Migration completion marker.
//!
//! The marker file is written only after migration is fully verified; its
//! presence is the sole signal that migration need not be retried.

use crate::error::MigrateError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// File name of the marker, relative to the data directory.
pub const MARKER_FILE: &str = ".migration_complete";

/// Completion record: when migration finished and what it moved.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrationMarker {
    pub completed_at: DateTime<Utc>,
    /// Verified per-table row counts.
    pub counts: BTreeMap<String, u64>,
}

impl MigrationMarker {
    pub fn new(counts: BTreeMap<String, u64>) -> Self {
        Self {
            completed_at: Utc::now(),
            counts,
        }
    }

    /// Persists the marker. Called exactly once, after verification.
    pub fn write(&self, path: &Path) -> Result<(), MigrateError> {
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| MigrateError::MarkerWriteFailed(e.to_string()))?;
        fs::write(path, bytes).map_err(|e| MigrateError::MarkerWriteFailed(e.to_string()))
    }

    /// Loads the marker if present. A missing file means migration has not
    /// completed and must be (re)run.
    pub fn load(path: &Path) -> Result<Option<Self>, MigrateError> {
        if !path.exists() {
            return Ok(None);
        }
        let bytes =
            fs::read(path).map_err(|e| MigrateError::MarkerWriteFailed(format!("reading: {e}")))?;
        let marker = serde_json::from_slice(&bytes)
            .map_err(|e| MigrateError::MarkerWriteFailed(format!("parsing: {e}")))?;
        Ok(Some(marker))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MARKER_FILE);

        let mut counts = BTreeMap::new();
        counts.insert("proposals".to_string(), 47);
        counts.insert("settings".to_string(), 12);
        counts.insert("job_posts".to_string(), 8);

        let marker = MigrationMarker::new(counts);
        marker.write(&path).unwrap();

        let loaded = MigrationMarker::load(&path).unwrap().unwrap();
        assert_eq!(loaded, marker);
    }

    #[test]
    fn missing_marker_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(MigrationMarker::load(&dir.path().join(MARKER_FILE))
            .unwrap()
            .is_none());
    }
}
