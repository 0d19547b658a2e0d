//! Key material
//!
//! A wallet is rooted in a single 32-byte [`Secret`]. Everything else is
//! derived from it on demand:
//!
//! ```text
//! Secret --BIP-39--> Mnemonic --seed + BIP-32 m/44'/60'/a'/0/i--> Account
//! ```

pub mod account;
pub mod secret;

pub use account::{derivation_path, derive_account, Account, Address, Signature};
pub use secret::{
    generate_secret, generate_secret_with, mnemonic_to_secret, secret_to_mnemonic, Mnemonic,
    Secret, SECRET_LEN,
};

use sha3::{Digest, Keccak256};

/// Keccak-256 as used by Ethereum (not SHA3-256)
pub(crate) fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}
