//! Entropy and mnemonic provider
//!
//! Generates wallet secrets from the OS random source and converts them to and
//! from BIP-39 English mnemonics.

use std::fmt;

use bip39::Language;
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{Error, Result};

pub use bip39::Mnemonic;

/// Length of a wallet secret in bytes (256 bits of entropy, 24 words)
pub const SECRET_LEN: usize = 32;

/// Root entropy of a wallet
///
/// Wiped from memory on drop. Never serialized.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Secret([u8; SECRET_LEN]);

impl Secret {
    /// Wrap raw secret bytes
    pub fn from_bytes(bytes: [u8; SECRET_LEN]) -> Self {
        Self(bytes)
    }

    /// Copy a secret out of a slice, `None` unless it is exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; SECRET_LEN] = bytes.try_into().ok()?;
        Some(Self(array))
    }

    /// Borrow the raw bytes
    pub fn as_bytes(&self) -> &[u8; SECRET_LEN] {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// Generate a fresh secret from the OS random source
///
/// A failing random source is an unsupported environment, so the error is fatal
/// to wallet creation.
pub fn generate_secret() -> Result<Secret> {
    generate_secret_with(&mut OsRng)
}

/// Generate a secret from `rng`, which must be cryptographically secure
pub fn generate_secret_with<R: RngCore + ?Sized>(rng: &mut R) -> Result<Secret> {
    let mut bytes = Zeroizing::new([0u8; SECRET_LEN]);
    rng.try_fill_bytes(bytes.as_mut())
        .map_err(|e| Error::EntropySourceUnavailable(e.to_string()))?;

    Ok(Secret::from_bytes(*bytes))
}

/// Encode a secret as a BIP-39 English mnemonic
pub fn secret_to_mnemonic(secret: &Secret) -> Result<Mnemonic> {
    Mnemonic::from_entropy_in(Language::English, secret.as_bytes())
        .map_err(|e| Error::Internal(format!("Mnemonic encoding failed: {}", e)))
}

/// Decode a BIP-39 English mnemonic back into its secret
///
/// Only 24-word phrases carry a full 32-byte secret; shorter phrases are rejected.
pub fn mnemonic_to_secret(phrase: &str) -> Result<Secret> {
    let mnemonic = Mnemonic::parse_in(Language::English, phrase)
        .map_err(|e| Error::InvalidMnemonic(e.to_string()))?;

    let (entropy, len) = mnemonic.to_entropy_array();
    let entropy = Zeroizing::new(entropy);

    if len != SECRET_LEN {
        return Err(Error::InvalidMnemonic(format!(
            "expected {} bytes of entropy, phrase encodes {}",
            SECRET_LEN, len
        )));
    }

    Secret::from_slice(&entropy[..len])
        .ok_or_else(|| Error::InvalidMnemonic("entropy length mismatch".to_string()))
}

/// Random source that always fails, for tests
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct UnavailableRng;

#[cfg(test)]
impl RngCore for UnavailableRng {
    fn next_u32(&mut self) -> u32 {
        0
    }

    fn next_u64(&mut self) -> u64 {
        0
    }

    fn fill_bytes(&mut self, _dest: &mut [u8]) {}

    fn try_fill_bytes(&mut self, _dest: &mut [u8]) -> std::result::Result<(), rand::Error> {
        Err(rand::Error::new(std::io::Error::new(
            std::io::ErrorKind::Other,
            "entropy source closed",
        )))
    }
}
