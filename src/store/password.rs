//! Password-backed secret store
//!
//! Seals a secret with AES-256-GCM under a key derived from the user's password
//! with PBKDF2-HMAC-SHA256. The blob layout is
//!
//! ```text
//! salt (16) || iv (12) || ciphertext + tag (32 + 16)
//! ```
//!
//! Decryption needs nothing but the blob and the password. Every failure mode on
//! the way back (truncated blob, wrong password, flipped bit) surfaces as the
//! same [`Error::DecryptionFailed`].

use std::fmt;
use std::str::FromStr;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::keys::Secret;

use super::{join_decimal, parse_decimal};

/// PBKDF2 salt length
pub const SALT_LEN: usize = 16;

/// AES-GCM nonce length (96 bits)
pub const IV_LEN: usize = 12;

/// AES-GCM tag length (128 bits)
pub const TAG_LEN: usize = 16;

/// Derived key length (AES-256)
pub const KEY_LEN: usize = 32;

/// Key derivation parameters baked into a blob format
///
/// Blobs carry no parameter tag of their own; the format is selected by the
/// protection tag of the wallet id. Changing these values requires a new
/// format and a new tag, never an edit in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// PBKDF2-HMAC-SHA256 iteration count
    pub iterations: u32,
}

impl KdfParams {
    /// Parameters for `pw` wallet ids. Must never be lowered.
    pub const V1: KdfParams = KdfParams {
        iterations: 310_000,
    };
}

/// Sealed secret: salt || iv || ciphertext+tag
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedBlob(Vec<u8>);

impl EncryptedBlob {
    /// Wrap raw blob bytes (no validation; bad blobs fail on decrypt)
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Raw blob bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Blob length in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the blob is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn split(&self) -> Option<(&[u8], &[u8], &[u8])> {
        if self.0.len() < SALT_LEN + IV_LEN + TAG_LEN {
            return None;
        }
        let (salt, rest) = self.0.split_at(SALT_LEN);
        let (iv, ciphertext) = rest.split_at(IV_LEN);
        Some((salt, iv, ciphertext))
    }
}

impl fmt::Display for EncryptedBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&join_decimal(&self.0))
    }
}

impl fmt::Debug for EncryptedBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptedBlob({} bytes)", self.0.len())
    }
}

impl FromStr for EncryptedBlob {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(Self(parse_decimal(s)?))
    }
}

fn derive_key(password: &str, salt: &[u8], params: KdfParams) -> Zeroizing<[u8; KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, params.iterations, &mut key[..]);
    key
}

/// Seal a secret under a password (blocking: runs the full KDF)
pub fn seal(secret: &Secret, password: &str, params: KdfParams) -> Result<EncryptedBlob> {
    let mut salt = [0u8; SALT_LEN];
    let mut iv = [0u8; IV_LEN];
    OsRng
        .try_fill_bytes(&mut salt)
        .and_then(|_| OsRng.try_fill_bytes(&mut iv))
        .map_err(|e| Error::EntropySourceUnavailable(e.to_string()))?;

    let key = derive_key(password, &salt, params);
    let cipher = Aes256Gcm::new_from_slice(&key[..])
        .map_err(|e| Error::Internal(format!("Invalid AES key length: {}", e)))?;

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), &secret.as_bytes()[..])
        .map_err(|_| Error::Internal("AES-GCM encryption failed".to_string()))?;

    let mut blob = Vec::with_capacity(SALT_LEN + IV_LEN + ciphertext.len());
    blob.extend_from_slice(&salt);
    blob.extend_from_slice(&iv);
    blob.extend_from_slice(&ciphertext);

    Ok(EncryptedBlob(blob))
}

/// Open a sealed secret (blocking: runs the full KDF)
pub fn open(blob: &EncryptedBlob, password: &str, params: KdfParams) -> Result<Secret> {
    let (salt, iv, ciphertext) = blob.split().ok_or(Error::DecryptionFailed)?;

    let key = derive_key(password, salt, params);
    let cipher = Aes256Gcm::new_from_slice(&key[..]).map_err(|_| Error::DecryptionFailed)?;

    let plaintext = match cipher.decrypt(Nonce::from_slice(iv), ciphertext) {
        Ok(plaintext) => Zeroizing::new(plaintext),
        Err(_) => {
            debug!("Password store decryption failed");
            return Err(Error::DecryptionFailed);
        }
    };

    Secret::from_slice(&plaintext).ok_or(Error::DecryptionFailed)
}

/// Async front-end for the password store
///
/// PBKDF2 at full strength takes a noticeable fraction of a second, so the work
/// runs on the blocking pool and the caller awaits a single result.
#[derive(Debug, Clone, Copy, Default)]
pub struct PasswordStore;

impl PasswordStore {
    /// Seal a secret with fresh salt and IV
    pub async fn encrypt(secret: &Secret, password: &str) -> Result<EncryptedBlob> {
        let secret = secret.clone();
        let password = Zeroizing::new(password.to_string());

        tokio::task::spawn_blocking(move || seal(&secret, &password, KdfParams::V1)).await?
    }

    /// Open a sealed secret
    pub async fn decrypt(blob: &EncryptedBlob, password: &str) -> Result<Secret> {
        let blob = blob.clone();
        let password = Zeroizing::new(password.to_string());

        tokio::task::spawn_blocking(move || open(&blob, &password, KdfParams::V1)).await?
    }
}
