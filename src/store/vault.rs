//! Device-bound storage for credential user handles
//!
//! Credential files only describe a credential. The user handle it guards
//! lives in the platform keyring (Keychain, Credential Manager, kernel
//! keyutils), one entry per credential under the service `sigpass:<rp id>`.

use std::fmt;

use dashmap::DashMap;
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::keys::Secret;

/// Keyring service prefix, followed by the relying party id
const SERVICE_PREFIX: &str = "sigpass";

/// Secret storage for credential user handles
pub trait CredentialVault: fmt::Debug + Send + Sync {
    /// Store the user handle of a credential, replacing any previous one
    fn store(&self, rp_id: &str, credential_id: &str, user_handle: &Secret) -> Result<()>;

    /// Load a user handle, `None` when the vault has no entry
    fn load(&self, rp_id: &str, credential_id: &str) -> Result<Option<Secret>>;

    /// Delete a user handle; a missing entry is not an error
    fn delete(&self, rp_id: &str, credential_id: &str) -> Result<()>;
}

/// OS keyring backend using the `keyring` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyringVault;

impl KeyringVault {
    pub const fn new() -> Self {
        Self
    }

    fn entry(rp_id: &str, credential_id: &str) -> Result<keyring::Entry> {
        let service = format!("{}:{}", SERVICE_PREFIX, rp_id);
        keyring::Entry::new(&service, credential_id)
            .map_err(|e| Error::Keyring(format!("failed to create keyring entry: {}", e)))
    }
}

impl CredentialVault for KeyringVault {
    fn store(&self, rp_id: &str, credential_id: &str, user_handle: &Secret) -> Result<()> {
        Self::entry(rp_id, credential_id)?
            .set_secret(user_handle.as_bytes())
            .map_err(|e| Error::Keyring(format!("failed to store user handle: {}", e)))
    }

    fn load(&self, rp_id: &str, credential_id: &str) -> Result<Option<Secret>> {
        match Self::entry(rp_id, credential_id)?.get_secret() {
            Ok(bytes) => {
                let bytes = Zeroizing::new(bytes);
                Secret::from_slice(&bytes)
                    .map(Some)
                    .ok_or_else(|| Error::Keyring("corrupt user handle in keyring".to_string()))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(Error::Keyring(format!("failed to read user handle: {}", e))),
        }
    }

    fn delete(&self, rp_id: &str, credential_id: &str) -> Result<()> {
        match Self::entry(rp_id, credential_id)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(Error::Keyring(format!("failed to delete user handle: {}", e))),
        }
    }
}

/// In-process vault; contents die with the process
#[derive(Debug, Default)]
pub struct MemoryCredentialVault {
    entries: DashMap<String, Secret>,
}

impl MemoryCredentialVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn key(rp_id: &str, credential_id: &str) -> String {
        format!("{}:{}/{}", SERVICE_PREFIX, rp_id, credential_id)
    }
}

impl CredentialVault for MemoryCredentialVault {
    fn store(&self, rp_id: &str, credential_id: &str, user_handle: &Secret) -> Result<()> {
        self.entries
            .insert(Self::key(rp_id, credential_id), user_handle.clone());
        Ok(())
    }

    fn load(&self, rp_id: &str, credential_id: &str) -> Result<Option<Secret>> {
        Ok(self
            .entries
            .get(&Self::key(rp_id, credential_id))
            .map(|entry| entry.value().clone()))
    }

    fn delete(&self, rp_id: &str, credential_id: &str) -> Result<()> {
        self.entries.remove(&Self::key(rp_id, credential_id));
        Ok(())
    }
}
