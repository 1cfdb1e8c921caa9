//! Authenticated encryption with XChaCha20-Poly1305.
//!
//! The 24-byte extended nonce is generated randomly per encryption, which is
//! safe for random nonces at any realistic message volume (unlike the 12-byte
//! variant). The nonce travels with the ciphertext in [`EncryptedData`].

use crate::error::{CryptoError, CryptoResult};
use crate::key::DerivedKey;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// XChaCha20 nonce length in bytes.
pub const NONCE_SIZE: usize = 24;

/// Poly1305 authentication tag length in bytes (appended to the ciphertext).
pub const TAG_SIZE: usize = 16;

/// Ciphertext plus the nonce it was produced with.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptedData {
    pub nonce: [u8; NONCE_SIZE],
    pub ciphertext: Vec<u8>,
}

/// Encrypts `plaintext` under `key` with a fresh random nonce.
pub fn encrypt(key: &DerivedKey, plaintext: &[u8]) -> CryptoResult<EncryptedData> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

    let mut nonce = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    Ok(EncryptedData { nonce, ciphertext })
}

/// Decrypts and authenticates `data` under `key`.
///
/// Fails if the key is wrong or the ciphertext was tampered with — there is
/// no way to distinguish the two, by construction of the AEAD.
pub fn decrypt(key: &DerivedKey, data: &EncryptedData) -> CryptoResult<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

    cipher
        .decrypt(XNonce::from_slice(&data.nonce), data.ciphertext.as_ref())
        .map_err(|_| CryptoError::Decryption("wrong key or tampered data".to_string()))
}
