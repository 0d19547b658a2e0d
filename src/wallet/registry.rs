//! Wallet registry
//!
//! The only durable client-side record of which wallets exist. Every mutation
//! is persisted before it is applied in memory, so a failed write leaves the
//! registry exactly as it was.
//!
//! Losing the registry strands the secrets it points to; they can only be
//! recovered from a mnemonic backup.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Error, Result};

use super::storage::RegistryStorage;
use super::types::{RegistryState, WalletIdentifier};

/// Registered wallets plus the unlock marker
#[derive(Debug)]
pub struct WalletRegistry {
    storage: Arc<dyn RegistryStorage>,
    state: Option<RegistryState>,
}

impl WalletRegistry {
    /// Load the registry from storage
    ///
    /// A stored record without wallet ids counts as an empty registry.
    pub fn load(storage: Arc<dyn RegistryStorage>) -> Result<Self> {
        let state = storage.read()?.filter(|state| !state.wallet_ids.is_empty());
        match &state {
            Some(state) => info!("Loaded {} wallet ids", state.wallet_ids.len()),
            None => debug!("Registry is uninitialized"),
        }
        Ok(Self { storage, state })
    }

    /// Current record, `None` while no wallet was ever registered
    pub fn state(&self) -> Option<&RegistryState> {
        self.state.as_ref()
    }

    /// Registered wallets in creation order
    pub fn wallets(&self) -> &[WalletIdentifier] {
        self.state
            .as_ref()
            .map(|state| state.wallet_ids.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.wallets().is_empty()
    }

    /// Look up a wallet by display name
    pub fn find_by_name(&self, name: &str) -> Option<&WalletIdentifier> {
        self.wallets().iter().find(|id| id.name == name)
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.find_by_name(name).is_some()
    }

    /// Most recently created or selected wallet
    pub fn last_wallet(&self) -> Option<&WalletIdentifier> {
        self.state
            .as_ref()
            .and_then(|state| state.last_wallet_id.as_ref())
    }

    /// Register a new wallet: it becomes last-active and the registry is locked
    pub fn append(&mut self, identifier: WalletIdentifier) -> Result<&RegistryState> {
        if self.contains_name(&identifier.name) {
            return Err(Error::NameAlreadyInUse(identifier.name));
        }

        let next = match &self.state {
            Some(current) => {
                let mut next = current.clone();
                next.wallet_ids.push(identifier.clone());
                next.last_wallet_id = Some(identifier);
                next.is_unlocked = 0;
                next
            }
            None => RegistryState::first(identifier),
        };

        self.commit(next)
    }

    /// Make an existing wallet the last-active one
    pub fn select(&mut self, name: &str) -> Result<&RegistryState> {
        let next = self.selected(name)?;
        self.commit(next)
    }

    /// Select a wallet and record an unlock at `timestamp_ms` in one write
    pub fn select_unlocked(&mut self, name: &str, timestamp_ms: i64) -> Result<&RegistryState> {
        let mut next = self.selected(name)?;
        next.is_unlocked = timestamp_ms;
        self.commit(next)
    }

    /// Record an unlock at `timestamp_ms`
    pub fn set_unlocked(&mut self, timestamp_ms: i64) -> Result<()> {
        let mut next = self.require_state()?.clone();
        next.is_unlocked = timestamp_ms;
        self.commit(next)?;
        Ok(())
    }

    /// Clear the unlock marker
    pub fn set_locked(&mut self) -> Result<()> {
        let mut next = self.require_state()?.clone();
        next.is_unlocked = 0;
        self.commit(next)?;
        Ok(())
    }

    /// Forget every wallet and remove the stored record
    pub fn clear(&mut self) -> Result<()> {
        self.storage.write(None)?;
        self.state = None;
        info!("Registry cleared");
        Ok(())
    }

    /// Timestamp of the current unlock, if any
    pub fn unlocked_at(&self) -> Option<i64> {
        self.state
            .as_ref()
            .map(|state| state.is_unlocked)
            .filter(|ts| *ts != 0)
    }

    /// Whether the registry is unlocked at `now_ms`
    ///
    /// With a TTL, an unlock older than the TTL counts as locked.
    pub fn is_unlocked(&self, now_ms: i64, ttl: Option<Duration>) -> bool {
        let Some(unlocked_at) = self.unlocked_at() else {
            return false;
        };
        match ttl {
            Some(ttl) => {
                let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
                now_ms.saturating_sub(unlocked_at) <= ttl_ms
            }
            None => true,
        }
    }

    fn selected(&self, name: &str) -> Result<RegistryState> {
        let identifier = self
            .find_by_name(name)
            .cloned()
            .ok_or_else(|| Error::WalletNotFound(name.to_string()))?;

        let mut next = self.require_state()?.clone();
        next.last_wallet_id = Some(identifier);
        Ok(next)
    }

    fn require_state(&self) -> Result<&RegistryState> {
        self.state
            .as_ref()
            .ok_or_else(|| Error::WalletNotFound("no wallets registered".to_string()))
    }

    fn commit(&mut self, next: RegistryState) -> Result<&RegistryState> {
        self.storage.write(Some(&next))?;
        Ok(&*self.state.insert(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use crate::store::{Handle, StoreReference};
    use crate::wallet::storage::{FileRegistryStorage, MemoryRegistryStorage};
    use tempfile::tempdir;

    /// Memory storage that counts writes and can be told to fail them
    #[derive(Debug, Default)]
    struct CountingStorage {
        inner: MemoryRegistryStorage,
        writes: AtomicUsize,
        fail: AtomicBool,
    }

    impl RegistryStorage for CountingStorage {
        fn read(&self) -> Result<Option<RegistryState>> {
            self.inner.read()
        }

        fn write(&self, state: Option<&RegistryState>) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::Io("disk full".to_string()));
            }
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.write(state)
        }
    }

    fn id(name: &str, handle: u8) -> WalletIdentifier {
        WalletIdentifier::new(
            name,
            StoreReference::Handle(Handle::from_bytes(vec![handle; 16])),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".parse().unwrap(),
        )
    }

    fn empty() -> (Arc<MemoryRegistryStorage>, WalletRegistry) {
        let storage = Arc::new(MemoryRegistryStorage::new());
        let registry = WalletRegistry::load(storage.clone()).unwrap();
        (storage, registry)
    }

    #[test]
    fn test_append_persists_and_locks() {
        let (storage, mut registry) = empty();
        assert!(registry.state().is_none());

        registry.append(id("alpha", 1)).unwrap();
        registry.set_unlocked(1_700_000_000_000).unwrap();
        registry.append(id("beta", 2)).unwrap();

        let state = registry.state().unwrap();
        assert_eq!(state.wallet_ids.len(), 2);
        assert_eq!(state.wallet_ids[0].name, "alpha");
        assert_eq!(state.last_wallet_id.as_ref().unwrap().name, "beta");
        assert_eq!(state.is_unlocked, 0);

        let reloaded = WalletRegistry::load(storage).unwrap();
        assert_eq!(reloaded.state(), registry.state());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let (storage, mut registry) = empty();
        registry.append(id("alpha", 1)).unwrap();
        let before = storage.raw().unwrap();

        let result = registry.append(id("alpha", 9));
        assert!(matches!(result, Err(Error::NameAlreadyInUse(name)) if name == "alpha"));
        assert_eq!(registry.wallets().len(), 1);
        assert_eq!(storage.raw().unwrap(), before);
    }

    #[test]
    fn test_unlock_marker_leaves_wallets_alone() {
        let (_, mut registry) = empty();
        assert!(registry.set_unlocked(5).is_err());

        registry.append(id("alpha", 1)).unwrap();
        let wallets = registry.wallets().to_vec();

        registry.set_unlocked(1_000).unwrap();
        assert_eq!(registry.unlocked_at(), Some(1_000));
        assert_eq!(registry.wallets(), wallets.as_slice());

        registry.set_locked().unwrap();
        assert_eq!(registry.unlocked_at(), None);
        assert_eq!(registry.wallets(), wallets.as_slice());
    }

    #[test]
    fn test_unlock_ttl() {
        let (_, mut registry) = empty();
        registry.append(id("alpha", 1)).unwrap();
        assert!(!registry.is_unlocked(10_000, None));

        registry.set_unlocked(10_000).unwrap();
        assert!(registry.is_unlocked(10_000_000, None));

        let ttl = Some(Duration::from_secs(60));
        assert!(registry.is_unlocked(70_000, ttl));
        assert!(!registry.is_unlocked(70_001, ttl));
    }

    #[test]
    fn test_select_and_find() {
        let (_, mut registry) = empty();
        registry.append(id("alpha", 1)).unwrap();
        registry.append(id("beta", 2)).unwrap();

        registry.select("alpha").unwrap();
        assert_eq!(registry.last_wallet().unwrap().name, "alpha");
        assert!(matches!(
            registry.select("gamma"),
            Err(Error::WalletNotFound(_))
        ));
        assert_eq!(
            registry.find_by_name("beta").unwrap().reference,
            StoreReference::Handle(Handle::from_bytes(vec![2; 16]))
        );
    }

    #[test]
    fn test_load_empty_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(&path, r#"{"walletIds":[],"lastWalletId":"","isUnlocked":0}"#).unwrap();

        let mut registry = WalletRegistry::load(Arc::new(FileRegistryStorage::new(&path))).unwrap();
        assert!(registry.is_empty());
        assert!(registry.state().is_none());
        assert!(registry.last_wallet().is_none());
        assert!(!registry.is_unlocked(1_000, None));

        registry.append(id("alpha", 1)).unwrap();
        assert_eq!(registry.last_wallet().unwrap().name, "alpha");

        let reloaded = WalletRegistry::load(Arc::new(FileRegistryStorage::new(&path))).unwrap();
        assert_eq!(reloaded.wallets().len(), 1);
    }

    #[test]
    fn test_select_unlocked_single_write() {
        let storage = Arc::new(CountingStorage::default());
        let mut registry = WalletRegistry::load(storage.clone()).unwrap();
        registry.append(id("alpha", 1)).unwrap();
        registry.append(id("beta", 2)).unwrap();

        let before = storage.writes.load(Ordering::SeqCst);
        registry.select_unlocked("alpha", 42).unwrap();
        assert_eq!(storage.writes.load(Ordering::SeqCst), before + 1);
        assert_eq!(registry.last_wallet().unwrap().name, "alpha");
        assert_eq!(registry.unlocked_at(), Some(42));

        // A failed write changes neither the selection nor the unlock marker
        storage.fail.store(true, Ordering::SeqCst);
        assert!(registry.select_unlocked("beta", 99).is_err());
        assert_eq!(registry.last_wallet().unwrap().name, "alpha");
        assert_eq!(registry.unlocked_at(), Some(42));

        storage.fail.store(false, Ordering::SeqCst);
        let reloaded = WalletRegistry::load(storage).unwrap();
        assert_eq!(reloaded.state(), registry.state());
    }

    #[test]
    fn test_clear() {
        let (storage, mut registry) = empty();
        registry.append(id("alpha", 1)).unwrap();

        registry.clear().unwrap();
        assert!(registry.state().is_none());
        assert!(registry.is_empty());
        assert_eq!(storage.raw().unwrap(), None);

        // Usable again after a reset
        registry.append(id("alpha", 1)).unwrap();
        assert_eq!(registry.wallets().len(), 1);
    }
}
