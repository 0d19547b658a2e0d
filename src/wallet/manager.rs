//! Wallet manager - core wallet operations
//!
//! Owns the registry and the authenticator store, and coordinates onboarding,
//! unlocking and locking of registered wallets.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::config::{Config, WalletConfig};
use crate::error::{Error, Result};
use crate::keys::{derive_account, secret_to_mnemonic, Account, Secret};
use crate::store::{
    AuthenticatorStore, Ceremony, KeyringVault, LocalAuthenticator, PresenceCheck, ProtectionKind,
    SecretStore,
};

use super::onboarding::OnboardingFlow;
use super::registry::WalletRegistry;
use super::storage::FileRegistryStorage;
use super::types::WalletIdentifier;

/// A wallet whose secret has been recovered for this session
pub struct UnlockedWallet {
    identifier: WalletIdentifier,
    secret: Secret,
    account: Account,
}

impl UnlockedWallet {
    pub fn identifier(&self) -> &WalletIdentifier {
        &self.identifier
    }

    /// Signing account at account 0, address 0
    pub fn account(&self) -> &Account {
        &self.account
    }

    /// Backup phrase, recomputed from the secret
    pub fn mnemonic(&self) -> Result<Zeroizing<String>> {
        Ok(Zeroizing::new(secret_to_mnemonic(&self.secret)?.to_string()))
    }

    /// Derive another account from the same secret
    pub fn derive(&self, account_index: u32, address_index: u32) -> Result<Account> {
        let mnemonic = secret_to_mnemonic(&self.secret)?;
        derive_account(&mnemonic, account_index, address_index)
    }
}

impl fmt::Debug for UnlockedWallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnlockedWallet")
            .field("name", &self.identifier.name)
            .field("address", &self.account.address())
            .finish_non_exhaustive()
    }
}

/// Registry snapshot for display
#[derive(Debug, Clone)]
pub struct WalletStatus {
    /// Number of registered wallets
    pub wallet_count: usize,

    /// Last-active wallet
    pub last_wallet: Option<WalletIdentifier>,

    /// Whether an unlock is currently valid
    pub unlocked: bool,

    /// When the current unlock happened
    pub unlocked_at: Option<DateTime<Utc>>,

    /// Whether passkey wallets can be created and opened
    pub authenticator_supported: bool,
}

/// Core wallet manager
#[derive(Debug)]
pub struct WalletManager {
    registry: WalletRegistry,
    authenticator: AuthenticatorStore,
    policy: WalletConfig,
}

impl WalletManager {
    /// Create a manager from its parts
    pub fn new(
        registry: WalletRegistry,
        authenticator: AuthenticatorStore,
        policy: WalletConfig,
    ) -> Self {
        Self {
            registry,
            authenticator,
            policy,
        }
    }

    /// Create a manager over the on-disk layout described by `config`
    pub fn from_config(config: &Config, presence: Arc<dyn PresenceCheck>) -> Result<Self> {
        let storage = FileRegistryStorage::new(config.storage.registry_path());
        let registry = WalletRegistry::load(Arc::new(storage))?;

        let local = LocalAuthenticator::new(
            config.storage.credentials_path(),
            Arc::new(KeyringVault::new()),
            presence,
        );
        let authenticator = AuthenticatorStore::new(Arc::new(local), &config.authenticator.rp_id)
            .with_enabled(config.authenticator.enabled);

        debug!(
            "Wallet manager over {} (passkeys {})",
            config.storage.data_dir.display(),
            if authenticator.is_supported() {
                "available"
            } else {
                "unavailable"
            }
        );

        Ok(Self::new(registry, authenticator, config.wallet.clone()))
    }

    pub fn registry(&self) -> &WalletRegistry {
        &self.registry
    }

    pub fn authenticator(&self) -> &AuthenticatorStore {
        &self.authenticator
    }

    /// Start a wallet creation flow
    pub fn onboarding(&mut self) -> OnboardingFlow<'_> {
        OnboardingFlow::new(&mut self.registry, &self.authenticator, &self.policy)
    }

    /// Registered wallets in creation order
    pub fn list(&self) -> &[WalletIdentifier] {
        self.registry.wallets()
    }

    /// Find a wallet by name, or the last-active one
    pub fn resolve(&self, name: Option<&str>) -> Result<&WalletIdentifier> {
        match name {
            Some(name) => self
                .registry
                .find_by_name(name)
                .ok_or_else(|| Error::WalletNotFound(name.to_string())),
            None => self
                .registry
                .last_wallet()
                .ok_or_else(|| Error::WalletNotFound("no wallets registered".to_string())),
        }
    }

    /// Recover a wallet's secret and mark the registry unlocked
    ///
    /// Password wallets need `password`; passkey wallets run an assertion and
    /// ignore it. The re-derived address must match the registered one.
    pub async fn unlock(
        &mut self,
        name: Option<&str>,
        password: Option<&str>,
    ) -> Result<Ceremony<UnlockedWallet>> {
        let identifier = self.resolve(name)?.clone();

        let store = match identifier.kind() {
            ProtectionKind::Authenticator => SecretStore::Authenticator(&self.authenticator),
            ProtectionKind::Password => SecretStore::Password(password.ok_or_else(|| {
                Error::InvalidPassword(format!("wallet '{}' needs its password", identifier.name))
            })?),
        };

        let secret = match store.retrieve(&identifier.reference).await? {
            Ceremony::Completed(secret) => secret,
            Ceremony::Cancelled => {
                info!("Unlock of '{}' cancelled", identifier.name);
                return Ok(Ceremony::Cancelled);
            }
        };

        let mnemonic = secret_to_mnemonic(&secret)?;
        let account = derive_account(&mnemonic, 0, 0)?;
        if account.address() != identifier.address {
            warn!("Wallet '{}' derived an unexpected address", identifier.name);
            return Err(Error::AccountMismatch {
                expected: identifier.address.to_string(),
                derived: account.address().to_string(),
            });
        }

        self.registry
            .select_unlocked(&identifier.name, Utc::now().timestamp_millis())?;
        info!("Unlocked '{}' ({})", identifier.name, identifier.address);

        Ok(Ceremony::Completed(UnlockedWallet {
            identifier,
            secret,
            account,
        }))
    }

    /// Clear the unlock marker
    pub fn lock(&mut self) -> Result<()> {
        if self.registry.state().is_none() {
            return Ok(());
        }
        self.registry.set_locked()?;
        info!("Wallets locked");
        Ok(())
    }

    /// Whether an unlock is currently valid under the configured TTL
    pub fn is_unlocked(&self) -> bool {
        self.registry
            .is_unlocked(Utc::now().timestamp_millis(), self.policy.unlock_ttl())
    }

    pub fn status(&self) -> WalletStatus {
        WalletStatus {
            wallet_count: self.registry.wallets().len(),
            last_wallet: self.registry.last_wallet().cloned(),
            unlocked: self.is_unlocked(),
            unlocked_at: self
                .registry
                .unlocked_at()
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
            authenticator_supported: self.authenticator.is_supported(),
        }
    }

    /// Forget every registered wallet
    ///
    /// Protected secrets are left in place; only a mnemonic backup can reach
    /// them afterwards.
    pub fn reset(&mut self) -> Result<()> {
        let count = self.registry.wallets().len();
        self.registry.clear()?;
        warn!("Registry reset, {} wallet ids forgotten", count);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::authenticator::{test_store, ScriptedPresence};
    use crate::store::{EncryptedBlob, StoreReference};
    use crate::wallet::onboarding::OnboardingOutcome;
    use crate::wallet::storage::MemoryRegistryStorage;
    use tempfile::tempdir;

    fn manager(dir: &std::path::Path, presence: Arc<ScriptedPresence>) -> WalletManager {
        let registry = WalletRegistry::load(Arc::new(MemoryRegistryStorage::new())).unwrap();
        WalletManager::new(
            registry,
            test_store(dir, presence),
            WalletConfig::default(),
        )
    }

    async fn create(
        manager: &mut WalletManager,
        name: &str,
        kind: ProtectionKind,
    ) -> (WalletIdentifier, Zeroizing<String>) {
        let mut flow = manager.onboarding();
        flow.begin().unwrap();
        flow.choose(kind).unwrap();
        flow.set_name(name).unwrap();
        let outcome = match kind {
            ProtectionKind::Authenticator => flow.create_with_authenticator().await,
            ProtectionKind::Password => flow.create_with_password("correct-horse").await,
        };
        match outcome.unwrap() {
            OnboardingOutcome::Registered {
                identifier,
                mnemonic,
            } => (identifier, mnemonic),
            OnboardingOutcome::Cancelled => panic!("unexpected cancellation"),
        }
    }

    #[tokio::test]
    async fn test_unlock_passkey_wallet() {
        let dir = tempdir().unwrap();
        let mut manager = manager(dir.path(), ScriptedPresence::approving());
        let (identifier, mnemonic) =
            create(&mut manager, "alpha", ProtectionKind::Authenticator).await;
        assert!(!manager.is_unlocked());

        let unlocked = manager.unlock(None, None).await.unwrap().into_result().unwrap();
        assert_eq!(unlocked.account().address(), identifier.address);
        assert_eq!(*unlocked.mnemonic().unwrap(), *mnemonic);
        assert!(manager.is_unlocked());

        manager.lock().unwrap();
        assert!(!manager.is_unlocked());
        assert_eq!(manager.list().len(), 1);
    }

    #[tokio::test]
    async fn test_unlock_password_wallet() {
        let dir = tempdir().unwrap();
        let mut manager = manager(dir.path(), ScriptedPresence::approving());
        let (identifier, _) = create(&mut manager, "alpha", ProtectionKind::Password).await;

        assert!(matches!(
            manager.unlock(Some("alpha"), None).await,
            Err(Error::InvalidPassword(_))
        ));
        assert!(matches!(
            manager.unlock(Some("alpha"), Some("wrong-horse")).await,
            Err(Error::DecryptionFailed)
        ));
        assert!(!manager.is_unlocked());

        let unlocked = manager
            .unlock(Some("alpha"), Some("correct-horse"))
            .await
            .unwrap()
            .into_result()
            .unwrap();
        assert_eq!(unlocked.identifier(), &identifier);
        assert!(manager.status().unlocked_at.is_some());
    }

    #[tokio::test]
    async fn test_cancelled_unlock_stays_locked() {
        let dir = tempdir().unwrap();
        let presence = ScriptedPresence::approving();
        let mut manager = manager(dir.path(), presence.clone());
        create(&mut manager, "alpha", ProtectionKind::Authenticator).await;

        presence.set_approve(false);
        let outcome = manager.unlock(Some("alpha"), None).await.unwrap();
        assert!(outcome.is_cancelled());
        assert!(!manager.is_unlocked());
    }

    #[tokio::test]
    async fn test_unlock_selects_wallet() {
        let dir = tempdir().unwrap();
        let mut manager = manager(dir.path(), ScriptedPresence::approving());
        create(&mut manager, "alpha", ProtectionKind::Authenticator).await;
        create(&mut manager, "beta", ProtectionKind::Authenticator).await;
        assert_eq!(manager.resolve(None).unwrap().name, "beta");

        manager.unlock(Some("alpha"), None).await.unwrap().into_result().unwrap();
        assert_eq!(manager.resolve(None).unwrap().name, "alpha");

        assert!(matches!(
            manager.resolve(Some("gamma")),
            Err(Error::WalletNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_address_mismatch_detected() {
        let dir = tempdir().unwrap();
        let mut manager = manager(dir.path(), ScriptedPresence::approving());
        let (identifier, _) = create(&mut manager, "alpha", ProtectionKind::Password).await;

        // Same blob registered under a different address
        let StoreReference::Blob(blob) = &identifier.reference else {
            panic!("expected a blob reference");
        };
        let forged = WalletIdentifier::new(
            "forged",
            StoreReference::Blob(EncryptedBlob::from_bytes(blob.as_bytes().to_vec())),
            "0x70997970C51812dc3A010C7d01b50e0d17dc79C8".parse().unwrap(),
        );
        manager.registry.append(forged).unwrap();

        let result = manager.unlock(Some("forged"), Some("correct-horse")).await;
        assert!(matches!(result, Err(Error::AccountMismatch { .. })));
        assert!(!manager.is_unlocked());
    }

    #[tokio::test]
    async fn test_reset_and_status() {
        let dir = tempdir().unwrap();
        let mut manager = manager(dir.path(), ScriptedPresence::approving());
        let empty = manager.status();
        assert_eq!(empty.wallet_count, 0);
        assert!(empty.last_wallet.is_none());
        assert!(empty.authenticator_supported);
        manager.lock().unwrap();

        create(&mut manager, "alpha", ProtectionKind::Authenticator).await;
        assert_eq!(manager.status().wallet_count, 1);

        manager.reset().unwrap();
        assert!(manager.list().is_empty());
        assert!(matches!(
            manager.unlock(None, None).await,
            Err(Error::WalletNotFound(_))
        ));
    }

    #[test]
    fn test_from_config() {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.storage.data_dir = dir.path().to_path_buf();
        config.authenticator.enabled = false;

        let manager = WalletManager::from_config(&config, ScriptedPresence::approving()).unwrap();
        assert!(manager.list().is_empty());
        assert!(!manager.authenticator().is_supported());
    }

    #[test]
    fn test_from_config_with_empty_record() {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.storage.data_dir = dir.path().to_path_buf();
        std::fs::write(
            config.storage.registry_path(),
            r#"{"walletIds":[],"lastWalletId":"","isUnlocked":0}"#,
        )
        .unwrap();

        let mut manager =
            WalletManager::from_config(&config, ScriptedPresence::approving()).unwrap();
        let status = manager.status();
        assert_eq!(status.wallet_count, 0);
        assert!(status.last_wallet.is_none());
        assert!(matches!(manager.resolve(None), Err(Error::WalletNotFound(_))));
        manager.lock().unwrap();
    }
}
