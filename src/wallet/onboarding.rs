//! Onboarding flow
//!
//! Drives wallet creation as an explicit state machine:
//!
//! ```text
//! Idle -> ChoosingProtection -> Naming -> CreatingViaAuthenticator -> Derived -> Registered
//!                                      \-> CreatingViaPassword ----/
//! ```
//!
//! Names are validated while `Naming`, before any secret exists. Creation
//! generates the secret, protects it with exactly one store, derives the
//! account and appends the registry as one unit. A ceremony cancellation or
//! [`OnboardingFlow::cancel`] returns the flow to `Idle` and drops all key
//! material held in memory.

use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::config::WalletConfig;
use crate::error::{Error, Result};
use crate::keys::{derive_account, generate_secret_with, secret_to_mnemonic};
use crate::store::{AuthenticatorStore, Ceremony, ProtectionKind, SecretStore, StoreReference};

use super::registry::WalletRegistry;
use super::types::{WalletIdentifier, WALLET_ID_DELIMITER};

/// Where the flow currently is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OnboardingState {
    Idle,
    ChoosingProtection,
    Naming { kind: ProtectionKind },
    CreatingViaAuthenticator { name: String },
    CreatingViaPassword { name: String },
    Derived { identifier: WalletIdentifier },
    Registered { identifier: WalletIdentifier },
}

impl OnboardingState {
    fn label(&self) -> &'static str {
        match self {
            OnboardingState::Idle => "idle",
            OnboardingState::ChoosingProtection => "choosing protection",
            OnboardingState::Naming { .. } => "naming",
            OnboardingState::CreatingViaAuthenticator { .. } => "creating via passkey",
            OnboardingState::CreatingViaPassword { .. } => "creating via password",
            OnboardingState::Derived { .. } => "derived",
            OnboardingState::Registered { .. } => "registered",
        }
    }
}

/// Result of a creation attempt
#[derive(Debug)]
pub enum OnboardingOutcome {
    /// Wallet registered; `mnemonic` is the backup phrase, shown once
    Registered {
        identifier: WalletIdentifier,
        mnemonic: Zeroizing<String>,
    },

    /// The user dismissed the ceremony; nothing was stored
    Cancelled,
}

/// Wallet creation state machine over a registry
pub struct OnboardingFlow<'a> {
    registry: &'a mut WalletRegistry,
    authenticator: &'a AuthenticatorStore,
    policy: &'a WalletConfig,
    rng: Box<dyn RngCore + Send>,
    state: OnboardingState,
}

impl<'a> OnboardingFlow<'a> {
    pub fn new(
        registry: &'a mut WalletRegistry,
        authenticator: &'a AuthenticatorStore,
        policy: &'a WalletConfig,
    ) -> Self {
        Self {
            registry,
            authenticator,
            policy,
            rng: Box::new(OsRng),
            state: OnboardingState::Idle,
        }
    }

    /// Draw wallet secrets from `rng` instead of the OS random source
    pub fn with_rng(mut self, rng: impl RngCore + Send + 'static) -> Self {
        self.rng = Box::new(rng);
        self
    }

    pub fn state(&self) -> &OnboardingState {
        &self.state
    }

    /// Whether the passkey option can be offered
    pub fn authenticator_available(&self) -> bool {
        self.authenticator.is_supported()
    }

    /// Open the flow
    pub fn begin(&mut self) -> Result<()> {
        match self.state {
            OnboardingState::Idle | OnboardingState::Registered { .. } => {
                self.state = OnboardingState::ChoosingProtection;
                Ok(())
            }
            _ => Err(self.out_of_order("begin")),
        }
    }

    /// Pick the protection kind
    pub fn choose(&mut self, kind: ProtectionKind) -> Result<()> {
        if self.state != OnboardingState::ChoosingProtection {
            return Err(self.out_of_order("choose protection"));
        }
        if kind == ProtectionKind::Authenticator && !self.authenticator.is_supported() {
            return Err(Error::AuthenticatorUnsupported);
        }

        self.state = OnboardingState::Naming { kind };
        Ok(())
    }

    /// Submit a display name; on rejection the flow stays in `Naming`
    pub fn set_name(&mut self, name: &str) -> Result<()> {
        let OnboardingState::Naming { kind } = self.state else {
            return Err(self.out_of_order("set name"));
        };

        let name = name.trim();
        validate_name(name, self.policy, self.registry)?;

        self.state = match kind {
            ProtectionKind::Authenticator => OnboardingState::CreatingViaAuthenticator {
                name: name.to_string(),
            },
            ProtectionKind::Password => OnboardingState::CreatingViaPassword {
                name: name.to_string(),
            },
        };
        Ok(())
    }

    /// Create the wallet behind a passkey
    pub async fn create_with_authenticator(&mut self) -> Result<OnboardingOutcome> {
        let OnboardingState::CreatingViaAuthenticator { name } = &self.state else {
            return Err(self.out_of_order("create with passkey"));
        };
        let name = name.clone();
        let authenticator = self.authenticator;

        self.complete(&name, SecretStore::Authenticator(authenticator))
            .await
    }

    /// Create the wallet behind a password; a too-short password keeps the state
    pub async fn create_with_password(&mut self, password: &str) -> Result<OnboardingOutcome> {
        let OnboardingState::CreatingViaPassword { name } = &self.state else {
            return Err(self.out_of_order("create with password"));
        };
        let name = name.clone();

        validate_password(password, self.policy)?;

        self.complete(&name, SecretStore::Password(password)).await
    }

    /// Abandon the flow from any state
    pub fn cancel(&mut self) {
        if self.state != OnboardingState::Idle {
            debug!("Onboarding cancelled while {}", self.state.label());
        }
        self.state = OnboardingState::Idle;
    }

    async fn complete(&mut self, name: &str, store: SecretStore<'_>) -> Result<OnboardingOutcome> {
        // Early returns leave the flow idle
        self.state = OnboardingState::Idle;

        let secret = generate_secret_with(self.rng.as_mut())?;

        let reference = match store.protect(name, &secret).await? {
            Ceremony::Completed(reference) => reference,
            Ceremony::Cancelled => {
                info!("Wallet creation for '{}' cancelled", name);
                return Ok(OnboardingOutcome::Cancelled);
            }
        };

        let derived = secret_to_mnemonic(&secret).and_then(|mnemonic| {
            let account = derive_account(&mnemonic, 0, 0)?;
            Ok((Zeroizing::new(mnemonic.to_string()), account.address()))
        });
        let (mnemonic, address) = match derived {
            Ok(derived) => derived,
            Err(e) => {
                rollback(&store, &reference).await;
                return Err(e);
            }
        };

        let identifier = WalletIdentifier::new(name, reference, address);
        self.state = OnboardingState::Derived {
            identifier: identifier.clone(),
        };

        if let Err(e) = self.registry.append(identifier.clone()) {
            self.state = OnboardingState::Idle;
            rollback(&store, &identifier.reference).await;
            return Err(e);
        }

        info!(
            "Registered {} wallet '{}' at {}",
            identifier.kind(),
            identifier.name,
            identifier.address
        );
        self.state = OnboardingState::Registered {
            identifier: identifier.clone(),
        };

        Ok(OnboardingOutcome::Registered {
            identifier,
            mnemonic,
        })
    }

    fn out_of_order(&self, step: &str) -> Error {
        Error::OnboardingState(format!("cannot {} while {}", step, self.state.label()))
    }
}

impl std::fmt::Debug for OnboardingFlow<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnboardingFlow")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Remove a protected secret that never made it into the registry
async fn rollback(store: &SecretStore<'_>, reference: &StoreReference) {
    match store.discard(reference).await {
        Ok(()) => debug!("Rolled back {} protection", reference.kind()),
        Err(e) => warn!(
            "Could not roll back {} protection, an orphaned credential remains: {}",
            reference.kind(),
            e
        ),
    }
}

/// Check a display name against the naming policy and the registry
pub fn validate_name(name: &str, policy: &WalletConfig, registry: &WalletRegistry) -> Result<()> {
    if name.chars().count() < policy.min_name_length {
        return Err(Error::InvalidWalletName(format!(
            "must be at least {} characters",
            policy.min_name_length
        )));
    }

    if name.contains(WALLET_ID_DELIMITER) {
        return Err(Error::InvalidWalletName(format!(
            "cannot contain '{}'",
            WALLET_ID_DELIMITER
        )));
    }

    let lowered = name.to_lowercase();
    if let Some(token) = policy
        .reserved_name_tokens
        .iter()
        .find(|token| lowered.contains(&token.to_lowercase()))
    {
        return Err(Error::InvalidWalletName(format!("cannot contain '{}'", token)));
    }

    if registry.contains_name(name) {
        return Err(Error::NameAlreadyInUse(name.to_string()));
    }

    Ok(())
}

/// Check a new password against the configured minimum length
pub fn validate_password(password: &str, policy: &WalletConfig) -> Result<()> {
    if password.chars().count() < policy.min_password_length {
        return Err(Error::InvalidPassword(format!(
            "must be at least {} characters",
            policy.min_password_length
        )));
    }
    Ok(())
}
