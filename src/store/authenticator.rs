//! Authenticator-backed secret store
//!
//! Binds a secret to a platform credential the way a passkey binds its user
//! handle: the secret is handed to the authenticator at registration and only
//! comes back from an assertion that passed a fresh user-presence check.
//!
//! The [`Authenticator`] trait is the seam to the platform. [`LocalAuthenticator`]
//! keeps discoverable credential metadata as owner-only files, the user handle
//! in a [`CredentialVault`], and asks a [`PresenceCheck`] before every ceremony.

use std::fmt;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;
use crate::error::{Error, Result};
use crate::keys::Secret;

use super::vault::CredentialVault;
use super::{Ceremony, Handle};

/// Registration request handed to the platform authenticator
pub struct CredentialRequest {
    /// Relying party the credential is scoped to
    pub rp_id: String,

    /// User-facing credential name
    pub user_name: String,

    /// Opaque bytes stored as the credential's user handle
    pub user_handle: Secret,

    /// Credential must be discoverable without a server-side allow-list
    pub resident_key: bool,
}

impl fmt::Debug for CredentialRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRequest")
            .field("rp_id", &self.rp_id)
            .field("user_name", &self.user_name)
            .field("resident_key", &self.resident_key)
            .finish_non_exhaustive()
    }
}

/// Platform authenticator: credential creation and assertion ceremonies
#[async_trait]
pub trait Authenticator: fmt::Debug + Send + Sync {
    /// Capability check; must not touch any state
    fn is_supported(&self) -> bool;

    /// Create a credential holding `request.user_handle`
    async fn create_credential(&self, request: CredentialRequest) -> Result<Ceremony<Handle>>;

    /// Assert an existing credential and release its user handle
    async fn get_assertion(&self, rp_id: &str, handle: &Handle) -> Result<Ceremony<Secret>>;

    /// Delete a credential; deleting a missing credential is not an error
    async fn remove_credential(&self, rp_id: &str, handle: &Handle) -> Result<()>;
}

/// User-presence gate consulted by [`LocalAuthenticator`]
#[async_trait]
pub trait PresenceCheck: fmt::Debug + Send + Sync {
    /// Whether a user can be asked at all
    fn is_available(&self) -> bool;

    /// Ask the user; `false` means they declined
    async fn confirm(&self, prompt: &str) -> Result<bool>;
}

/// Presence check through an interactive terminal confirmation
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPresence;

#[async_trait]
impl PresenceCheck for TerminalPresence {
    fn is_available(&self) -> bool {
        std::io::stdin().is_terminal()
    }

    async fn confirm(&self, prompt: &str) -> Result<bool> {
        let prompt = prompt.to_string();
        tokio::task::spawn_blocking(move || {
            dialoguer::Confirm::new()
                .with_prompt(prompt)
                .default(false)
                .interact_opt()
                .map(|answer| answer.unwrap_or(false))
                .map_err(|e| Error::Io(format!("Presence prompt failed: {}", e)))
        })
        .await?
    }
}

/// Credential metadata as persisted by [`LocalAuthenticator`]
///
/// Holds no key material; the user handle is in the vault.
#[derive(Debug, Serialize, Deserialize)]
struct StoredCredential {
    id: String,
    rp_id: String,
    user_name: String,
    created_at: DateTime<Utc>,
}

/// Authenticator keeping discoverable credentials on this device
///
/// One `<credential id hex>.json` metadata file per credential, created
/// owner-only. A credential file readable by group or others is refused. User
/// handles go to the [`CredentialVault`] keyed by relying party and credential id.
#[derive(Debug)]
pub struct LocalAuthenticator {
    credentials_dir: PathBuf,
    vault: Arc<dyn CredentialVault>,
    presence: Arc<dyn PresenceCheck>,
}

impl LocalAuthenticator {
    /// Create an authenticator over a credentials directory and a vault
    pub fn new(
        credentials_dir: impl Into<PathBuf>,
        vault: Arc<dyn CredentialVault>,
        presence: Arc<dyn PresenceCheck>,
    ) -> Self {
        Self {
            credentials_dir: credentials_dir.into(),
            vault,
            presence,
        }
    }

    /// Directory holding credential files
    pub fn credentials_dir(&self) -> &Path {
        &self.credentials_dir
    }

    fn credential_path(&self, handle: &Handle) -> PathBuf {
        self.credentials_dir.join(format!("{}.json", handle.to_hex()))
    }

    async fn write_credential(&self, path: &Path, credential: &StoredCredential) -> Result<()> {
        tokio::fs::create_dir_all(&self.credentials_dir).await?;

        let json = serde_json::to_vec_pretty(credential)?;

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(path).await?;
        tokio::io::AsyncWriteExt::write_all(&mut file, &json).await?;
        tokio::io::AsyncWriteExt::flush(&mut file).await?;
        Ok(())
    }

    async fn read_credential(&self, path: &Path) -> Result<StoredCredential> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let metadata = tokio::fs::metadata(path).await?;
            let mode = metadata.permissions().mode();
            if mode & 0o077 != 0 {
                return Err(Error::InsecureCredential(format!(
                    "Credential {} has insecure permissions {:o}. Run 'chmod 600 {}'",
                    path.display(),
                    mode & 0o777,
                    path.display()
                )));
            }
        }

        let bytes = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Run a vault operation on the blocking pool
    async fn with_vault<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn CredentialVault) -> Result<T> + Send + 'static,
    {
        let vault = Arc::clone(&self.vault);
        tokio::task::spawn_blocking(move || op(vault.as_ref())).await?
    }
}

#[async_trait]
impl Authenticator for LocalAuthenticator {
    fn is_supported(&self) -> bool {
        self.presence.is_available()
    }

    async fn create_credential(&self, request: CredentialRequest) -> Result<Ceremony<Handle>> {
        if !request.resident_key {
            return Err(Error::Internal(
                "Local credentials are always discoverable".to_string(),
            ));
        }

        let prompt = format!(
            "Create passkey '{}' for {}?",
            request.user_name, request.rp_id
        );
        if !self.presence.confirm(&prompt).await? {
            return Ok(Ceremony::Cancelled);
        }

        let handle = Handle::from_bytes(Uuid::new_v4().as_bytes().to_vec());
        let credential = StoredCredential {
            id: handle.to_hex(),
            rp_id: request.rp_id.clone(),
            user_name: request.user_name.clone(),
            created_at: Utc::now(),
        };

        let (rp_id, id) = (credential.rp_id.clone(), credential.id.clone());
        let user_handle = request.user_handle.clone();
        self.with_vault(move |vault| vault.store(&rp_id, &id, &user_handle))
            .await?;

        let path = self.credential_path(&handle);
        if let Err(e) = self.write_credential(&path, &credential).await {
            let (rp_id, id) = (credential.rp_id.clone(), credential.id.clone());
            if let Err(cleanup) = self.with_vault(move |vault| vault.delete(&rp_id, &id)).await {
                warn!("Could not remove keyring entry for {:?}: {}", handle, cleanup);
            }
            return Err(e);
        }

        debug!("Created credential {:?} at {}", handle, path.display());
        Ok(Ceremony::Completed(handle))
    }

    async fn get_assertion(&self, rp_id: &str, handle: &Handle) -> Result<Ceremony<Secret>> {
        let path = self.credential_path(handle);
        if !tokio::fs::try_exists(&path).await? {
            return Err(Error::HandleNotFound);
        }

        let credential = self.read_credential(&path).await?;
        if credential.rp_id != rp_id {
            debug!("Credential {:?} belongs to another relying party", handle);
            return Err(Error::HandleNotFound);
        }

        let prompt = format!("Use passkey '{}' for {}?", credential.user_name, rp_id);
        if !self.presence.confirm(&prompt).await? {
            return Ok(Ceremony::Cancelled);
        }

        let (rp, id) = (credential.rp_id.clone(), credential.id.clone());
        match self.with_vault(move |vault| vault.load(&rp, &id)).await? {
            Some(secret) => Ok(Ceremony::Completed(secret)),
            None => {
                warn!("Credential {:?} has no keyring entry", handle);
                Err(Error::HandleNotFound)
            }
        }
    }

    async fn remove_credential(&self, rp_id: &str, handle: &Handle) -> Result<()> {
        let (rp_id, id) = (rp_id.to_string(), handle.to_hex());
        self.with_vault(move |vault| vault.delete(&rp_id, &id))
            .await?;

        match tokio::fs::remove_file(self.credential_path(handle)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Secret store on top of an [`Authenticator`]
///
/// Stateless between calls: every [`retrieve`](Self::retrieve) runs a new
/// assertion, nothing unlocked is cached.
#[derive(Debug, Clone)]
pub struct AuthenticatorStore {
    authenticator: Arc<dyn Authenticator>,
    rp_id: String,
    enabled: bool,
}

impl AuthenticatorStore {
    /// Create a store for a relying party
    pub fn new(authenticator: Arc<dyn Authenticator>, rp_id: impl Into<String>) -> Self {
        Self {
            authenticator,
            rp_id: rp_id.into(),
            enabled: true,
        }
    }

    /// Turn the store off regardless of platform support
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Relying party id credentials are scoped to
    pub fn rp_id(&self) -> &str {
        &self.rp_id
    }

    /// Whether the platform authenticator can be used
    pub fn is_supported(&self) -> bool {
        self.enabled && self.authenticator.is_supported()
    }

    /// Bind `secret` to a new discoverable credential
    pub async fn create(&self, name: &str, secret: &Secret) -> Result<Ceremony<Handle>> {
        if !self.is_supported() {
            return Err(Error::AuthenticatorUnsupported);
        }

        let request = CredentialRequest {
            rp_id: self.rp_id.clone(),
            user_name: name.to_string(),
            user_handle: secret.clone(),
            resident_key: true,
        };

        let outcome = self.authenticator.create_credential(request).await?;
        match &outcome {
            Ceremony::Completed(handle) => info!("Passkey '{}' created ({:?})", name, handle),
            Ceremony::Cancelled => info!("Passkey creation for '{}' cancelled", name),
        }
        Ok(outcome)
    }

    /// Release the secret bound to `handle` after a fresh assertion
    pub async fn retrieve(&self, handle: &Handle) -> Result<Ceremony<Secret>> {
        if !self.is_supported() {
            return Err(Error::AuthenticatorUnsupported);
        }

        let outcome = self.authenticator.get_assertion(&self.rp_id, handle).await?;
        if outcome.is_cancelled() {
            info!("Passkey assertion cancelled");
        }
        Ok(outcome)
    }

    /// Delete the credential behind `handle`
    pub async fn discard(&self, handle: &Handle) -> Result<()> {
        if let Err(e) = self.authenticator.remove_credential(&self.rp_id, handle).await {
            warn!("Failed to remove credential {:?}: {}", handle, e);
            return Err(e);
        }
        debug!("Removed credential {:?}", handle);
        Ok(())
    }
}

/// Presence check with a scripted answer, for tests
#[cfg(test)]
#[derive(Debug)]
pub(crate) struct ScriptedPresence {
    available: std::sync::atomic::AtomicBool,
    approve: std::sync::atomic::AtomicBool,
    prompts: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl ScriptedPresence {
    pub(crate) fn approving() -> Arc<Self> {
        Arc::new(Self {
            available: true.into(),
            approve: true.into(),
            prompts: 0.into(),
        })
    }

    pub(crate) fn set_approve(&self, approve: bool) {
        self.approve
            .store(approve, std::sync::atomic::Ordering::SeqCst);
    }

    pub(crate) fn set_available(&self, available: bool) {
        self.available
            .store(available, std::sync::atomic::Ordering::SeqCst);
    }

    pub(crate) fn prompts(&self) -> usize {
        self.prompts.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
#[async_trait]
impl PresenceCheck for ScriptedPresence {
    fn is_available(&self) -> bool {
        self.available.load(std::sync::atomic::Ordering::SeqCst)
    }

    async fn confirm(&self, _prompt: &str) -> Result<bool> {
        self.prompts
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(self.approve.load(std::sync::atomic::Ordering::SeqCst))
    }
}

#[cfg(test)]
pub(crate) fn test_store(dir: &Path, presence: Arc<ScriptedPresence>) -> AuthenticatorStore {
    let vault = Arc::new(super::vault::MemoryCredentialVault::new());
    let authenticator = LocalAuthenticator::new(dir.join("credentials"), vault, presence);
    AuthenticatorStore::new(Arc::new(authenticator), "localhost")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{generate_secret, SECRET_LEN};
    use crate::store::vault::MemoryCredentialVault;
    use tempfile::tempdir;

    fn store_with_vault(dir: &Path) -> (Arc<MemoryCredentialVault>, AuthenticatorStore) {
        let vault = Arc::new(MemoryCredentialVault::new());
        let local = LocalAuthenticator::new(
            dir.join("credentials"),
            vault.clone(),
            ScriptedPresence::approving(),
        );
        (vault, AuthenticatorStore::new(Arc::new(local), "localhost"))
    }

    #[tokio::test]
    async fn test_create_and_retrieve() {
        let dir = tempdir().unwrap();
        let presence = ScriptedPresence::approving();
        let store = test_store(dir.path(), presence.clone());

        let secret = generate_secret().unwrap();
        let handle = store.create("alpha", &secret).await.unwrap().into_result().unwrap();
        assert_eq!(handle.as_bytes().len(), 16);

        let retrieved = store.retrieve(&handle).await.unwrap().into_result().unwrap();
        assert_eq!(retrieved, secret);

        // Each retrieval asks again
        store.retrieve(&handle).await.unwrap().into_result().unwrap();
        assert_eq!(presence.prompts(), 3);
    }

    #[tokio::test]
    async fn test_cancelled_creation_leaves_nothing() {
        let dir = tempdir().unwrap();
        let presence = ScriptedPresence::approving();
        presence.set_approve(false);
        let store = test_store(dir.path(), presence);

        let secret = generate_secret().unwrap();
        let outcome = store.create("alpha", &secret).await.unwrap();
        assert!(outcome.is_cancelled());
        assert!(!dir.path().join("credentials").exists());
    }

    #[tokio::test]
    async fn test_cancelled_retrieval() {
        let dir = tempdir().unwrap();
        let presence = ScriptedPresence::approving();
        let store = test_store(dir.path(), presence.clone());

        let secret = generate_secret().unwrap();
        let handle = store.create("alpha", &secret).await.unwrap().into_result().unwrap();

        presence.set_approve(false);
        let outcome = store.retrieve(&handle).await.unwrap();
        assert!(matches!(
            outcome.into_result(),
            Err(Error::AuthenticatorCeremonyCancelled)
        ));
    }

    #[tokio::test]
    async fn test_unknown_handle() {
        let dir = tempdir().unwrap();
        let presence = ScriptedPresence::approving();
        let store = test_store(dir.path(), presence.clone());

        let handle = Handle::from_bytes(vec![1, 2, 3, 4]);
        assert!(matches!(
            store.retrieve(&handle).await,
            Err(Error::HandleNotFound)
        ));
        assert_eq!(presence.prompts(), 0);
    }

    #[tokio::test]
    async fn test_other_relying_party() {
        let dir = tempdir().unwrap();
        let presence = ScriptedPresence::approving();
        let authenticator: Arc<dyn Authenticator> = Arc::new(LocalAuthenticator::new(
            dir.path().join("credentials"),
            Arc::new(MemoryCredentialVault::new()),
            presence,
        ));

        let ours = AuthenticatorStore::new(authenticator.clone(), "localhost");
        let theirs = AuthenticatorStore::new(authenticator, "example.org");

        let secret = generate_secret().unwrap();
        let handle = ours.create("alpha", &secret).await.unwrap().into_result().unwrap();
        assert!(matches!(
            theirs.retrieve(&handle).await,
            Err(Error::HandleNotFound)
        ));
    }

    #[tokio::test]
    async fn test_unsupported() {
        let dir = tempdir().unwrap();
        let presence = ScriptedPresence::approving();
        presence.set_available(false);
        let store = test_store(dir.path(), presence.clone());

        assert!(!store.is_supported());
        let secret = generate_secret().unwrap();
        assert!(matches!(
            store.create("alpha", &secret).await,
            Err(Error::AuthenticatorUnsupported)
        ));
        assert_eq!(presence.prompts(), 0);
    }

    #[tokio::test]
    async fn test_disabled_by_configuration() {
        let dir = tempdir().unwrap();
        let store = test_store(dir.path(), ScriptedPresence::approving()).with_enabled(false);
        assert!(!store.is_supported());

        let handle = Handle::from_bytes(vec![1; 16]);
        assert!(matches!(
            store.retrieve(&handle).await,
            Err(Error::AuthenticatorUnsupported)
        ));
    }

    #[tokio::test]
    async fn test_credential_file_holds_no_secret() {
        let dir = tempdir().unwrap();
        let (vault, store) = store_with_vault(dir.path());

        let secret = generate_secret().unwrap();
        let handle = store.create("alpha", &secret).await.unwrap().into_result().unwrap();
        assert_eq!(vault.len(), 1);

        let path = dir
            .path()
            .join("credentials")
            .join(format!("{}.json", handle.to_hex()));
        let raw = std::fs::read(&path).unwrap();
        let text = String::from_utf8_lossy(&raw).to_lowercase();
        assert!(!text.contains(&hex::encode(secret.as_bytes())));
        assert!(!raw.windows(SECRET_LEN).any(|w| w == secret.as_bytes()));
        let decimal = secret
            .as_bytes()
            .iter()
            .map(|b| b.to_string())
            .collect::<Vec<_>>()
            .join(",");
        assert!(!text.contains(&decimal));

        // Metadata alone does not release anything
        vault.delete("localhost", &handle.to_hex()).unwrap();
        assert!(matches!(
            store.retrieve(&handle).await,
            Err(Error::HandleNotFound)
        ));
    }

    #[tokio::test]
    async fn test_discard() {
        let dir = tempdir().unwrap();
        let (vault, store) = store_with_vault(dir.path());

        let secret = generate_secret().unwrap();
        let handle = store.create("alpha", &secret).await.unwrap().into_result().unwrap();

        store.discard(&handle).await.unwrap();
        assert!(vault.is_empty());
        assert!(matches!(
            store.retrieve(&handle).await,
            Err(Error::HandleNotFound)
        ));
        // Idempotent
        store.discard(&handle).await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_insecure_permissions_refused() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let store = test_store(dir.path(), ScriptedPresence::approving());

        let secret = generate_secret().unwrap();
        let handle = store.create("alpha", &secret).await.unwrap().into_result().unwrap();

        let path = dir
            .path()
            .join("credentials")
            .join(format!("{}.json", handle.to_hex()));
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert!(matches!(
            store.retrieve(&handle).await,
            Err(Error::InsecureCredential(_))
        ));
    }
}
