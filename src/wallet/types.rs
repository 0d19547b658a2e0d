//! Core types for wallet bookkeeping
//!
//! Defines wallet identifiers and the persisted registry record.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::keys::Address;
use crate::store::{ProtectionKind, StoreReference};

/// Delimiter between the fields of a textual wallet id
pub const WALLET_ID_DELIMITER: char = '/';

/// Durable pointer to one wallet
///
/// Textual form `kind/name/reference/address`, e.g.
/// `pw/alpha/12,201,...,7/0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WalletIdentifier {
    /// User-chosen display name
    pub name: String,

    /// Where the secret lives (handle or blob)
    pub reference: StoreReference,

    /// Address derived at account 0, address 0
    pub address: Address,
}

impl WalletIdentifier {
    /// Create a new identifier
    pub fn new(name: impl Into<String>, reference: StoreReference, address: Address) -> Self {
        Self {
            name: name.into(),
            reference,
            address,
        }
    }

    /// Protection kind, implied by the store reference
    pub fn kind(&self) -> ProtectionKind {
        self.reference.kind()
    }
}

impl fmt::Display for WalletIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{d}{}{d}{}{d}{}",
            self.kind().tag(),
            self.name,
            self.reference,
            self.address,
            d = WALLET_ID_DELIMITER
        )
    }
}

impl FromStr for WalletIdentifier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(WALLET_ID_DELIMITER).collect();
        let [tag, name, reference, address] = parts.as_slice() else {
            return Err(Error::InvalidWalletId(format!(
                "Expected 4 fields, found {}",
                parts.len()
            )));
        };

        if name.is_empty() {
            return Err(Error::InvalidWalletId("Empty wallet name".to_string()));
        }

        let kind = ProtectionKind::from_tag(tag)?;
        Ok(Self {
            name: name.to_string(),
            reference: StoreReference::parse(kind, reference)?,
            address: address.parse()?,
        })
    }
}

impl TryFrom<String> for WalletIdentifier {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<WalletIdentifier> for String {
    fn from(id: WalletIdentifier) -> Self {
        id.to_string()
    }
}

/// Persisted registry record
///
/// A record with no wallet ids (`"lastWalletId": ""`) is an empty registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryState {
    /// Registered wallets in creation order
    pub wallet_ids: Vec<WalletIdentifier>,

    /// Most recently created or selected wallet, stored as `""` when unset
    #[serde(default, with = "empty_as_none")]
    pub last_wallet_id: Option<WalletIdentifier>,

    /// Unlock timestamp in milliseconds since epoch, 0 when locked
    pub is_unlocked: i64,
}

impl RegistryState {
    /// Record holding a single, locked wallet
    pub fn first(identifier: WalletIdentifier) -> Self {
        Self {
            wallet_ids: vec![identifier.clone()],
            last_wallet_id: Some(identifier),
            is_unlocked: 0,
        }
    }
}

mod empty_as_none {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::WalletIdentifier;

    pub fn serialize<S: Serializer>(
        id: &Option<WalletIdentifier>,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        match id {
            Some(id) => serializer.serialize_str(&id.to_string()),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Option<WalletIdentifier>, D::Error> {
        let text = String::deserialize(deserializer)?;
        if text.is_empty() {
            return Ok(None);
        }
        text.parse().map(Some).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{EncryptedBlob, Handle};

    const ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

    fn address() -> Address {
        ADDRESS.parse().unwrap()
    }

    #[test]
    fn test_identifier_text_form() {
        let id = WalletIdentifier::new(
            "alpha",
            StoreReference::Handle(Handle::from_bytes(vec![117, 61, 252])),
            address(),
        );
        let text = id.to_string();
        assert_eq!(text, format!("pk/alpha/117,61,252/{}", ADDRESS));
        assert_eq!(text.parse::<WalletIdentifier>().unwrap(), id);

        let id = WalletIdentifier::new(
            "beta wallet",
            StoreReference::Blob(EncryptedBlob::from_bytes(vec![0, 1, 2])),
            address(),
        );
        assert_eq!(id.kind(), ProtectionKind::Password);
        assert_eq!(id.to_string().parse::<WalletIdentifier>().unwrap(), id);
    }

    #[test]
    fn test_identifier_rejects_malformed() {
        let bad = [
            "pk/alpha/1,2,3".to_string(),
            format!("pk/al/pha/1,2,3/{}", ADDRESS),
            format!("xx/alpha/1,2,3/{}", ADDRESS),
            format!("pk//1,2,3/{}", ADDRESS),
            format!("pk/alpha//{}", ADDRESS),
            "pk/alpha/1,2,3/0x1234".to_string(),
        ];
        for text in bad {
            assert!(
                matches!(
                    text.parse::<WalletIdentifier>(),
                    Err(Error::InvalidWalletId(_))
                ),
                "accepted {}",
                text
            );
        }
    }

    #[test]
    fn test_registry_state_json_shape() {
        let id = WalletIdentifier::new(
            "alpha",
            StoreReference::Handle(Handle::from_bytes(vec![1, 2])),
            address(),
        );
        let state = RegistryState::first(id.clone());

        let json = serde_json::to_value(&state).unwrap();
        let expected = format!("pk/alpha/1,2/{}", ADDRESS);
        assert_eq!(json["walletIds"][0], expected.as_str());
        assert_eq!(json["lastWalletId"], expected.as_str());
        assert_eq!(json["isUnlocked"], 0);

        let back: RegistryState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_registry_state_empty_record() {
        let state: RegistryState =
            serde_json::from_str(r#"{"walletIds":[],"lastWalletId":"","isUnlocked":0}"#).unwrap();
        assert!(state.wallet_ids.is_empty());
        assert_eq!(state.last_wallet_id, None);

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["lastWalletId"], "");

        assert!(serde_json::from_str::<RegistryState>(
            r#"{"walletIds":[],"lastWalletId":"pk/alpha","isUnlocked":0}"#
        )
        .is_err());
    }
}
