//! Wallet management module
//!
//! Provides registry-backed wallets with:
//! - Onboarding (name, protection choice, creation as one unit)
//! - Registry persistence (registry.json)
//! - Unlock / lock of registered wallets
//! - A stand-alone single passkey wallet
//!
//! # Architecture
//!
//! ```text
//! OnboardingFlow → SecretStore (passkey | password) → derive_account → WalletRegistry
//!                                                                           ↑
//!                                    WalletManager (unlock / lock / status) ┘
//! ```

pub mod manager;
pub mod onboarding;
pub mod registry;
pub mod sigpass;
pub mod storage;
pub mod types;

pub use manager::{UnlockedWallet, WalletManager, WalletStatus};
pub use onboarding::{OnboardingFlow, OnboardingOutcome, OnboardingState};
pub use registry::WalletRegistry;
pub use sigpass::SigpassWallet;
pub use storage::{FileRegistryStorage, MemoryRegistryStorage, RegistryStorage};
pub use types::{RegistryState, WalletIdentifier};
