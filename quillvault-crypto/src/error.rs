//! Error types for the crypto layer.

use thiserror::Error;

/// All errors that can occur in crypto operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("passphrase too short (min {min} characters)")]
    PassphraseTooShort { min: usize },

    #[error("key derivation failed: {0}")]
    DerivationFailed(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
}

pub type CryptoResult<T> = Result<T, CryptoError>;
