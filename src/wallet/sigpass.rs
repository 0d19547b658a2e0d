//! Single passkey wallet
//!
//! The minimal flow without a registry: one passkey-bound secret whose handle
//! is kept in the local cache under [`SIGPASS_CACHE_KEY`], plus a marker
//! recording that the wallet was created.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::keys::{derive_account, generate_secret, secret_to_mnemonic, Account};
use crate::store::{
    AuthenticatorStore, Ceremony, Handle, HandleCache, SIGPASS_CACHE_KEY, SIGPASS_STATUS_KEY,
};

const STATUS_CREATED: &[u8] = b"TRUE";

/// Passkey wallet backed by a handle cache
#[derive(Debug, Clone)]
pub struct SigpassWallet {
    authenticator: AuthenticatorStore,
    cache: Arc<dyn HandleCache>,
}

impl SigpassWallet {
    pub fn new(authenticator: AuthenticatorStore, cache: Arc<dyn HandleCache>) -> Self {
        Self {
            authenticator,
            cache,
        }
    }

    /// Create the wallet; a cancelled ceremony caches nothing
    ///
    /// If the handle cannot be cached the new credential is removed again.
    pub async fn create(&self, name: &str) -> Result<Ceremony<Handle>> {
        let secret = generate_secret()?;

        let handle = match self.authenticator.create(name, &secret).await? {
            Ceremony::Completed(handle) => handle,
            Ceremony::Cancelled => return Ok(Ceremony::Cancelled),
        };

        let cached = self
            .cache
            .put(SIGPASS_CACHE_KEY, handle.as_bytes())
            .and_then(|()| self.cache.put(SIGPASS_STATUS_KEY, STATUS_CREATED));
        if let Err(e) = cached {
            if let Err(cleanup) = self.authenticator.discard(&handle).await {
                warn!("Could not remove uncached passkey credential: {}", cleanup);
            }
            if let Err(cleanup) = self.cache.delete(SIGPASS_CACHE_KEY) {
                debug!("Could not clear cached handle: {}", cleanup);
            }
            return Err(e);
        }
        info!("Passkey wallet '{}' created", name);

        Ok(Ceremony::Completed(handle))
    }

    /// Whether a passkey wallet was created here
    pub fn check(&self) -> Result<bool> {
        self.cache.contains(SIGPASS_STATUS_KEY)
    }

    /// Cached credential handle, if any
    pub fn handle(&self) -> Result<Option<Handle>> {
        Ok(self
            .cache
            .get(SIGPASS_CACHE_KEY)?
            .filter(|bytes| !bytes.is_empty())
            .map(Handle::from_bytes))
    }

    /// Assert the passkey and derive account 0/0
    pub async fn get(&self) -> Result<Ceremony<Account>> {
        let handle = self.handle()?.ok_or(Error::HandleNotFound)?;
        debug!("Asserting cached handle {:?}", handle);

        let secret = match self.authenticator.retrieve(&handle).await? {
            Ceremony::Completed(secret) => secret,
            Ceremony::Cancelled => return Ok(Ceremony::Cancelled),
        };

        let mnemonic = secret_to_mnemonic(&secret)?;
        Ok(Ceremony::Completed(derive_account(&mnemonic, 0, 0)?))
    }

    /// Drop the cached handle and marker, and remove the credential
    pub async fn forget(&self) -> Result<()> {
        if let Some(handle) = self.handle()? {
            self.authenticator.discard(&handle).await?;
        }
        self.cache.delete(SIGPASS_CACHE_KEY)?;
        self.cache.delete(SIGPASS_STATUS_KEY)?;
        info!("Passkey wallet forgotten");
        Ok(())
    }
}
