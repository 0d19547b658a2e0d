//! Secret stores
//!
//! A wallet secret is protected by exactly one store, chosen at creation time:
//!
//! - [`AuthenticatorStore`]: secret bound to a platform credential, released only
//!   after a fresh user-presence check. Yields a [`Handle`]. The secret itself
//!   sits in a [`CredentialVault`] (the OS keyring outside tests).
//! - [`PasswordStore`]: secret sealed with a password-derived AES-256-GCM key.
//!   Yields a self-contained [`EncryptedBlob`].
//!
//! [`SecretStore`] is the tagged union the onboarding and unlock flows work with.
//! Interactive ceremonies report user cancellation as [`Ceremony::Cancelled`]
//! rather than as an error.

pub mod authenticator;
pub mod cache;
pub mod password;
pub mod vault;

use std::fmt;

use crate::error::{Error, Result};
use crate::keys::Secret;

pub use authenticator::{
    Authenticator, AuthenticatorStore, CredentialRequest, LocalAuthenticator, PresenceCheck,
    TerminalPresence,
};
pub use cache::{
    FileHandleCache, HandleCache, MemoryHandleCache, SIGPASS_CACHE_KEY, SIGPASS_STATUS_KEY,
};
pub use password::{EncryptedBlob, KdfParams, PasswordStore};
pub use vault::{CredentialVault, KeyringVault, MemoryCredentialVault};

/// Outcome of an interactive, user-mediated ceremony
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ceremony<T> {
    /// The user completed the ceremony
    Completed(T),

    /// The user dismissed the prompt; nothing was changed
    Cancelled,
}

impl<T> Ceremony<T> {
    /// Convert to a result, turning cancellation into an error
    pub fn into_result(self) -> Result<T> {
        match self {
            Ceremony::Completed(value) => Ok(value),
            Ceremony::Cancelled => Err(Error::AuthenticatorCeremonyCancelled),
        }
    }

    /// Map the completed value
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Ceremony<U> {
        match self {
            Ceremony::Completed(value) => Ceremony::Completed(f(value)),
            Ceremony::Cancelled => Ceremony::Cancelled,
        }
    }

    /// Check if the user cancelled
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Ceremony::Cancelled)
    }
}

/// Opaque credential identifier returned by the authenticator store
///
/// Not secret: it is safe to keep in unauthenticated storage.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Handle(Vec<u8>);

impl Handle {
    /// Wrap raw credential id bytes
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Raw credential id bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Lowercase hex, used as the credential file stem
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&join_decimal(&self.0))
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.to_hex())
    }
}

impl std::str::FromStr for Handle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = parse_decimal(s)?;
        if bytes.is_empty() {
            return Err(Error::InvalidWalletId("Empty credential handle".to_string()));
        }
        Ok(Self(bytes))
    }
}

/// Which kind of store protects a wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtectionKind {
    /// Platform authenticator (passkey)
    Authenticator,

    /// Password-derived key
    Password,
}

impl ProtectionKind {
    /// Tag used in the textual wallet id
    pub fn tag(&self) -> &'static str {
        match self {
            ProtectionKind::Authenticator => "pk",
            ProtectionKind::Password => "pw",
        }
    }

    /// Parse a wallet id tag
    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag {
            "pk" => Ok(ProtectionKind::Authenticator),
            "pw" => Ok(ProtectionKind::Password),
            other => Err(Error::InvalidWalletId(format!(
                "Unknown protection kind: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for ProtectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtectionKind::Authenticator => write!(f, "passkey"),
            ProtectionKind::Password => write!(f, "password"),
        }
    }
}

/// Store-specific pointer to a protected secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreReference {
    /// Authenticator credential handle
    Handle(Handle),

    /// Password-sealed blob
    Blob(EncryptedBlob),
}

impl StoreReference {
    /// Protection kind implied by this reference
    pub fn kind(&self) -> ProtectionKind {
        match self {
            StoreReference::Handle(_) => ProtectionKind::Authenticator,
            StoreReference::Blob(_) => ProtectionKind::Password,
        }
    }

    /// Parse the textual reference for a given kind
    pub fn parse(kind: ProtectionKind, s: &str) -> Result<Self> {
        match kind {
            ProtectionKind::Authenticator => Ok(StoreReference::Handle(s.parse()?)),
            ProtectionKind::Password => Ok(StoreReference::Blob(s.parse()?)),
        }
    }
}

impl fmt::Display for StoreReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreReference::Handle(handle) => fmt::Display::fmt(handle, f),
            StoreReference::Blob(blob) => fmt::Display::fmt(blob, f),
        }
    }
}

/// The secret store selected for one wallet
pub enum SecretStore<'a> {
    /// Platform authenticator
    Authenticator(&'a AuthenticatorStore),

    /// Password store keyed by the user's password
    Password(&'a str),
}

impl fmt::Debug for SecretStore<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretStore({})", self.kind())
    }
}

impl SecretStore<'_> {
    /// Protection kind of this store
    pub fn kind(&self) -> ProtectionKind {
        match self {
            SecretStore::Authenticator(_) => ProtectionKind::Authenticator,
            SecretStore::Password(_) => ProtectionKind::Password,
        }
    }

    /// Protect a freshly generated secret
    pub async fn protect(&self, name: &str, secret: &Secret) -> Result<Ceremony<StoreReference>> {
        match self {
            SecretStore::Authenticator(store) => {
                Ok(store.create(name, secret).await?.map(StoreReference::Handle))
            }
            SecretStore::Password(password) => {
                let blob = PasswordStore::encrypt(secret, password).await?;
                Ok(Ceremony::Completed(StoreReference::Blob(blob)))
            }
        }
    }

    /// Recover a protected secret
    pub async fn retrieve(&self, reference: &StoreReference) -> Result<Ceremony<Secret>> {
        match (self, reference) {
            (SecretStore::Authenticator(store), StoreReference::Handle(handle)) => {
                store.retrieve(handle).await
            }
            (SecretStore::Password(password), StoreReference::Blob(blob)) => {
                let secret = PasswordStore::decrypt(blob, password).await?;
                Ok(Ceremony::Completed(secret))
            }
            (store, reference) => Err(Error::Internal(format!(
                "{} store cannot open a {} reference",
                store.kind(),
                reference.kind()
            ))),
        }
    }

    /// Undo [`SecretStore::protect`] when the wallet could not be registered
    pub async fn discard(&self, reference: &StoreReference) -> Result<()> {
        match (self, reference) {
            (SecretStore::Authenticator(store), StoreReference::Handle(handle)) => {
                store.discard(handle).await
            }
            // Blobs live only inside the wallet id, nothing to remove
            _ => Ok(()),
        }
    }
}

/// Bytes as decimal numbers joined by commas: `[1, 2, 3]` -> `"1,2,3"`
pub(crate) fn join_decimal(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| b.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Inverse of [`join_decimal`]
pub(crate) fn parse_decimal(s: &str) -> Result<Vec<u8>> {
    if s.is_empty() {
        return Ok(Vec::new());
    }
    s.split(',')
        .map(|part| {
            part.trim()
                .parse::<u8>()
                .map_err(|e| Error::InvalidWalletId(format!("Invalid byte '{}': {}", part, e)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimal_bytes() {
        assert_eq!(join_decimal(&[0, 17, 255]), "0,17,255");
        assert_eq!(parse_decimal("0,17,255").unwrap(), vec![0, 17, 255]);
        assert!(parse_decimal("").unwrap().is_empty());
        assert!(parse_decimal("1,256").is_err());
        assert!(parse_decimal("1,,2").is_err());
    }

    #[test]
    fn test_handle_text_form() {
        let handle = Handle::from_bytes(vec![117, 61, 252]);
        assert_eq!(handle.to_string(), "117,61,252");
        assert_eq!("117,61,252".parse::<Handle>().unwrap(), handle);
        assert!("".parse::<Handle>().is_err());
    }

    #[test]
    fn test_protection_tags() {
        assert_eq!(ProtectionKind::Authenticator.tag(), "pk");
        assert_eq!(ProtectionKind::from_tag("pw").unwrap(), ProtectionKind::Password);
        assert!(ProtectionKind::from_tag("xx").is_err());
    }

    #[test]
    fn test_ceremony_into_result() {
        assert_eq!(Ceremony::Completed(3).into_result().unwrap(), 3);
        let cancelled: Ceremony<u8> = Ceremony::Cancelled;
        assert!(cancelled.is_cancelled());
        assert!(matches!(
            cancelled.into_result(),
            Err(Error::AuthenticatorCeremonyCancelled)
        ));
    }
}
