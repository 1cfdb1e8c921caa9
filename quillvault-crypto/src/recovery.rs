//! Recovery-secret primitives.
//!
//! A recovery secret is a 32-character random alphanumeric string shown to
//! the user exactly once. Three derived artifacts are persisted, never the
//! secret itself:
//!
//! - a memory-hard verification hash (Argon2id PHC string) used to check a
//!   candidate without raw byte comparison
//! - the store key wrapped under a KEK derived from the secret, so the
//!   secret alone can recover access to the store
//! - the secret wrapped under the current store key, so an unlocked session
//!   can re-wrap without the user re-entering the secret

use crate::cipher::{decrypt, encrypt, EncryptedData};
use crate::error::{CryptoError, CryptoResult};
use crate::key::{argon2_instance, derive_key, DerivedKey, KdfParams, Salt, KEY_SIZE};
use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand::distr::Alphanumeric;
use rand::Rng;
use zeroize::Zeroizing;

/// Length of a recovery secret in characters.
pub const RECOVERY_SECRET_LEN: usize = 32;

/// Domain-separated fixed salt for deriving the recovery KEK.
///
/// A fixed salt is safe here because the secret carries ~190 bits of entropy;
/// precomputation across users buys an attacker nothing.
const RECOVERY_KDF_SALT: [u8; 16] = *b"quillvault-rkdf\0";

/// Generates a fresh 32-character alphanumeric recovery secret from the OS RNG.
pub fn generate_recovery_secret() -> Zeroizing<String> {
    let secret: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(RECOVERY_SECRET_LEN)
        .map(char::from)
        .collect();
    Zeroizing::new(secret)
}

/// Derives the key-encryption key from a recovery secret.
pub fn recovery_secret_to_kek(secret: &str) -> CryptoResult<DerivedKey> {
    recovery_secret_to_kek_with(secret, &KdfParams::default())
}

/// As [`recovery_secret_to_kek`] with explicit cost parameters.
pub fn recovery_secret_to_kek_with(secret: &str, params: &KdfParams) -> CryptoResult<DerivedKey> {
    let salt = Salt::from_bytes(RECOVERY_KDF_SALT);
    derive_key(secret, &salt, params)
}

/// Hashes a recovery secret for later verification (Argon2id PHC string).
pub fn hash_recovery_secret(secret: &str) -> CryptoResult<String> {
    hash_recovery_secret_with(secret, &KdfParams::default())
}

/// As [`hash_recovery_secret`] with explicit cost parameters (tests use
/// cheap ones).
pub fn hash_recovery_secret_with(secret: &str, params: &KdfParams) -> CryptoResult<String> {
    let argon = argon2_instance(params)?;
    let salt = SaltString::generate(&mut OsRng);
    let hash = argon
        .hash_password(secret.as_bytes(), &salt)
        .map_err(|e| CryptoError::DerivationFailed(format!("recovery hash failed: {e}")))?;
    Ok(hash.to_string())
}

/// Verifies a candidate secret against a stored PHC hash.
///
/// Comparison happens inside the password-hash verifier, which is
/// constant-time; the raw candidate bytes are never compared directly.
/// Unparseable hashes verify as false rather than erroring — a corrupt
/// record must not let anyone in.
pub fn verify_recovery_secret(candidate: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(candidate.as_bytes(), &parsed)
        .is_ok()
}

/// Wraps (encrypts) the store key under a recovery-derived KEK.
pub fn wrap_store_key(kek: &DerivedKey, store_key: &DerivedKey) -> CryptoResult<EncryptedData> {
    encrypt(kek, store_key.as_bytes())
}

/// Unwraps the store key from a recovery wrap.
pub fn unwrap_store_key(kek: &DerivedKey, wrapped: &EncryptedData) -> CryptoResult<DerivedKey> {
    let plaintext = decrypt(kek, wrapped)?;
    if plaintext.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: plaintext.len(),
        });
    }
    let mut bytes = [0u8; KEY_SIZE];
    bytes.copy_from_slice(&plaintext);
    Ok(DerivedKey::from_bytes(bytes))
}
