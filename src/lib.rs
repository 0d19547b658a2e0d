//! Sigpass wallet library
//!
//! Local key custody for EVM wallets: 256-bit secrets protected by a passkey
//! or a password, BIP-39/BIP-44 account derivation, and a persisted registry
//! of created wallets.

pub mod cli;
pub mod config;
pub mod error;
pub mod keys;
pub mod store;
pub mod wallet;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
