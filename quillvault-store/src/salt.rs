//! Persistence of the KDF salt.
//!
//! The salt lives as raw bytes in a `.salt` file inside the application data
//! directory. It is written exactly once, at first setup, and only ever read
//! afterwards — regenerating it would silently invalidate every derived key.

use crate::error::{io_error, StoreError, StoreResult};
use quillvault_crypto::{Salt, SALT_SIZE};
use std::fs;
use std::path::Path;

/// File name of the persisted salt, relative to the data directory.
pub const SALT_FILE: &str = ".salt";

/// Reads the salt from `data_dir`, creating it on first call.
///
/// An existing salt file is never rewritten, even if a fresh one was just
/// about to be generated.
pub fn load_or_create_salt(data_dir: &Path) -> StoreResult<Salt> {
    let path = data_dir.join(SALT_FILE);

    if path.exists() {
        let bytes = fs::read(&path).map_err(|e| io_error("reading salt file", e))?;
        let arr: [u8; SALT_SIZE] = bytes.as_slice().try_into().map_err(|_| {
            StoreError::Database(format!(
                "salt file corrupt: expected {SALT_SIZE} bytes, found {}",
                bytes.len()
            ))
        })?;
        return Ok(Salt::from_bytes(arr));
    }

    let salt = Salt::random();
    fs::create_dir_all(data_dir).map_err(|e| io_error("creating data directory", e))?;
    fs::write(&path, salt.as_bytes()).map_err(|e| io_error("writing salt file", e))?;
    tracing::info!(path = %path.display(), "created new KDF salt");
    Ok(salt)
}
