//! Salt and derived-key types plus Argon2id key derivation.

use crate::error::{CryptoError, CryptoResult};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of the KDF salt in bytes.
pub const SALT_SIZE: usize = 16;

/// Length of a derived key in bytes (ChaCha20 key size).
pub const KEY_SIZE: usize = 32;

/// Random salt fed into Argon2id alongside the passphrase.
///
/// The salt is not secret; it only defeats precomputed-table attacks.
/// Once persisted it must never be regenerated — the same salt must produce
/// the same key for the same passphrase on every unlock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Salt([u8; SALT_SIZE]);

impl Salt {
    /// Generates a fresh random salt from the OS RNG.
    pub fn random() -> Self {
        let mut bytes = [0u8; SALT_SIZE];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; SALT_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.0
    }
}

/// A 32-byte symmetric key derived from a passphrase (or recovery secret).
///
/// Zeroed on drop. Cloning is allowed — each clone zeroes itself.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey([u8; KEY_SIZE]);

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

// Debug must never print key material.
impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DerivedKey(..)")
    }
}

/// Argon2id cost parameters.
///
/// Defaults target roughly 150-300 ms per derivation on commodity hardware:
/// 64 MiB memory, 3 passes, 4 lanes. Deliberately slow.
#[derive(Clone, Debug)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub m_cost_kib: u32,
    /// Number of passes.
    pub t_cost: u32,
    /// Degree of parallelism.
    pub p_cost: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            m_cost_kib: 64 * 1024,
            t_cost: 3,
            p_cost: 4,
        }
    }
}

impl KdfParams {
    /// Cheap parameters for tests — NOT safe for production use.
    pub fn insecure_fast() -> Self {
        Self {
            m_cost_kib: 64,
            t_cost: 1,
            p_cost: 1,
        }
    }
}

pub(crate) fn argon2_instance(params: &KdfParams) -> CryptoResult<Argon2<'static>> {
    let params = Params::new(params.m_cost_kib, params.t_cost, params.p_cost, Some(KEY_SIZE))
        .map_err(|e| CryptoError::DerivationFailed(format!("invalid KDF params: {e}")))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// Derives a 32-byte key from a passphrase and salt using Argon2id.
///
/// Deterministic: identical (passphrase, salt, params) always yields the
/// identical key. CPU- and memory-bound — callers must keep this off any
/// event-loop thread.
pub fn derive_key(passphrase: &str, salt: &Salt, params: &KdfParams) -> CryptoResult<DerivedKey> {
    let argon = argon2_instance(params)?;
    let mut out = [0u8; KEY_SIZE];
    argon
        .hash_password_into(passphrase.as_bytes(), salt.as_bytes(), &mut out)
        .map_err(|e| CryptoError::DerivationFailed(e.to_string()))?;
    Ok(DerivedKey::from_bytes(out))
}

/// Generates a random 32-byte key from the OS RNG.
pub fn generate_random_key() -> DerivedKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::rng().fill_bytes(&mut bytes);
    DerivedKey::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_is_deterministic() {
        let salt = Salt::random();
        let params = KdfParams::insecure_fast();
        let a = derive_key("correct horse battery", &salt, &params).unwrap();
        let b = derive_key("correct horse battery", &salt, &params).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn different_salt_different_key() {
        let params = KdfParams::insecure_fast();
        let a = derive_key("pass", &Salt::random(), &params).unwrap();
        let b = derive_key("pass", &Salt::random(), &params).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn invalid_params_fail_cleanly() {
        let bad = KdfParams {
            m_cost_kib: 0,
            t_cost: 0,
            p_cost: 0,
        };
        let err = derive_key("pass", &Salt::random(), &bad).unwrap_err();
        assert!(matches!(err, CryptoError::DerivationFailed(_)));
    }

    #[test]
    fn debug_does_not_leak_key() {
        let key = generate_random_key();
        assert_eq!(format!("{key:?}"), "DerivedKey(..)");
    }
}
