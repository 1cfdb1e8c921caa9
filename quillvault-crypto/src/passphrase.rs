//! Passphrase strength validation and passphrase-to-key derivation.

use crate::error::{CryptoError, CryptoResult};
use crate::key::{derive_key, DerivedKey, KdfParams, Salt};
use zeroize::Zeroizing;

/// Minimum accepted passphrase length in characters.
pub const MIN_PASSPHRASE_LEN: usize = 12;

/// Coarse passphrase strength rating shown during setup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strength {
    Weak,
    Medium,
    Strong,
}

/// Rates a passphrase that already meets the minimum length.
///
/// Rating counts the character classes present (uppercase, lowercase, digit,
/// symbol): all four rate Strong, three rate Medium, fewer rate Weak. A
/// passphrase missing any class is never Strong, regardless of length.
///
/// Returns `PassphraseTooShort` below [`MIN_PASSPHRASE_LEN`]; callers must
/// block derivation on that error.
pub fn validate_strength(passphrase: &str) -> CryptoResult<Strength> {
    if passphrase.chars().count() < MIN_PASSPHRASE_LEN {
        return Err(CryptoError::PassphraseTooShort {
            min: MIN_PASSPHRASE_LEN,
        });
    }

    let mut upper = false;
    let mut lower = false;
    let mut digit = false;
    let mut symbol = false;
    for c in passphrase.chars() {
        if c.is_uppercase() {
            upper = true;
        } else if c.is_lowercase() {
            lower = true;
        } else if c.is_ascii_digit() {
            digit = true;
        } else if !c.is_whitespace() {
            symbol = true;
        }
    }

    let classes = [upper, lower, digit, symbol].iter().filter(|b| **b).count();
    Ok(match classes {
        4 => Strength::Strong,
        3 => Strength::Medium,
        _ => Strength::Weak,
    })
}

/// Derives the store key from a passphrase, consuming (and zeroing) it.
///
/// The passphrase buffer is zeroed on every return path, success or failure,
/// because `Zeroizing` wipes it on drop.
pub fn derive_passphrase_key(
    passphrase: Zeroizing<String>,
    salt: &Salt,
    params: &KdfParams,
) -> CryptoResult<DerivedKey> {
    if passphrase.chars().count() < MIN_PASSPHRASE_LEN {
        return Err(CryptoError::PassphraseTooShort {
            min: MIN_PASSPHRASE_LEN,
        });
    }
    derive_key(&passphrase, salt, params)
}
