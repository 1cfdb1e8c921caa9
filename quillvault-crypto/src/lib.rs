//! Key derivation and encryption layer for QuillVault.
//!
//! Provides the primitives the encrypted store and the recovery flow are
//! built from:
//! - Argon2id for deriving the store key from a passphrase + persisted salt
//! - XChaCha20-Poly1305 for authenticated payload encryption
//! - Passphrase strength validation
//! - Recovery-secret generation, hashing, and store-key wrapping
//!
//! # Key model
//!
//! The store key is derived from the user's passphrase and a write-once salt.
//! It is never persisted; it is re-derived on every unlock. The optional
//! recovery secret wraps the store key under an independently derived KEK so
//! a forgotten passphrase does not strand the data.
//!
//! All secret material (`DerivedKey`, passphrases and recovery secrets held
//! as `Zeroizing<String>`) is zeroed on drop, on every code path.

mod cipher;
mod error;
mod key;
mod passphrase;
pub mod recovery;

pub use cipher::{decrypt, encrypt, EncryptedData, NONCE_SIZE, TAG_SIZE};
pub use error::{CryptoError, CryptoResult};
pub use key::{derive_key, generate_random_key, DerivedKey, KdfParams, Salt, KEY_SIZE, SALT_SIZE};
pub use passphrase::{
    derive_passphrase_key, validate_strength, Strength, MIN_PASSPHRASE_LEN,
};
pub use recovery::{
    generate_recovery_secret, hash_recovery_secret, recovery_secret_to_kek,
    unwrap_store_key, verify_recovery_secret, wrap_store_key, RECOVERY_SECRET_LEN,
};

// Re-exported so downstream crates hold passphrases in self-wiping buffers
// without depending on zeroize directly.
pub use zeroize::Zeroizing;
