//! EVM account derivation and signing
//!
//! Derives secp256k1 keys from a BIP-39 mnemonic along the standard Ethereum
//! path `m/44'/60'/{account}'/0/{address}` and exposes the resulting address
//! and signing capability. Broadcasting is left to the caller's transport.

use std::fmt;
use std::str::FromStr;

use bip32::{DerivationPath, XPrv};
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use zeroize::Zeroizing;

use crate::error::{Error, Result};

use super::keccak256;
use super::secret::Mnemonic;

/// Build the BIP-44 Ethereum derivation path for an account/address pair
pub fn derivation_path(account_index: u32, address_index: u32) -> String {
    format!("m/44'/60'/{}'/0/{}", account_index, address_index)
}

/// Derive an account from a mnemonic
///
/// The BIP-39 seed uses an empty passphrase. Same inputs always give the same
/// account.
pub fn derive_account(
    mnemonic: &Mnemonic,
    account_index: u32,
    address_index: u32,
) -> Result<Account> {
    let path: DerivationPath = derivation_path(account_index, address_index)
        .parse()
        .map_err(|e: bip32::Error| Error::Derivation(format!("Invalid path: {}", e)))?;

    let seed = Zeroizing::new(mnemonic.to_seed(""));
    let xprv = XPrv::derive_from_path(&seed[..], &path)
        .map_err(|e| Error::Derivation(e.to_string()))?;

    Ok(Account::from_signing_key(xprv.private_key().clone()))
}

/// 20-byte EVM address
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address([u8; 20]);

impl Address {
    /// Address of a secp256k1 public key: last 20 bytes of keccak(x || y)
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        let point = key.to_encoded_point(false);
        let hash = keccak256(&point.as_bytes()[1..]);

        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&hash[12..]);
        Self(bytes)
    }

    /// Raw address bytes
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// EIP-55 mixed-case checksum encoding, with `0x` prefix
    pub fn to_checksum(&self) -> String {
        let lower = hex::encode(self.0);
        let hash = keccak256(lower.as_bytes());

        let mut out = String::with_capacity(42);
        out.push_str("0x");
        for (i, c) in lower.chars().enumerate() {
            let nibble = if i % 2 == 0 {
                hash[i / 2] >> 4
            } else {
                hash[i / 2] & 0x0f
            };
            if c.is_ascii_alphabetic() && nibble >= 8 {
                out.push(c.to_ascii_uppercase());
            } else {
                out.push(c);
            }
        }
        out
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_checksum())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_checksum())
    }
}

impl FromStr for Address {
    type Err = Error;

    /// Parse a hex address with or without `0x`; case is not validated
    fn from_str(s: &str) -> Result<Self> {
        let hex_part = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);

        if hex_part.len() != 40 {
            return Err(Error::InvalidWalletId(format!(
                "Address must be 40 hex characters: {}",
                s
            )));
        }

        let decoded = hex::decode(hex_part)
            .map_err(|e| Error::InvalidWalletId(format!("Invalid address hex {}: {}", s, e)))?;

        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&decoded);
        Ok(Self(bytes))
    }
}

/// Recoverable ECDSA signature: r || s || v with v in {27, 28}
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; 65]);

impl Signature {
    /// Raw 65 bytes
    pub fn as_bytes(&self) -> &[u8; 65] {
        &self.0
    }

    /// Recover the signing address for a 32-byte digest
    pub fn recover(&self, hash: &[u8; 32]) -> Result<Address> {
        let signature = EcdsaSignature::from_slice(&self.0[..64])
            .map_err(|e| Error::Derivation(format!("Malformed signature: {}", e)))?;
        let recovery_id = self.0[64]
            .checked_sub(27)
            .and_then(RecoveryId::from_byte)
            .ok_or_else(|| Error::Derivation("Invalid recovery id".to_string()))?;

        let key = VerifyingKey::recover_from_prehash(hash, &signature, recovery_id)
            .map_err(|e| Error::Derivation(format!("Recovery failed: {}", e)))?;
        Ok(Address::from_verifying_key(&key))
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", self)
    }
}

/// Externally-owned account: address plus signing key
pub struct Account {
    address: Address,
    signing_key: SigningKey,
}

impl Account {
    /// Wrap a signing key, computing its address
    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        let address = Address::from_verifying_key(signing_key.verifying_key());
        Self {
            address,
            signing_key,
        }
    }

    /// Account address
    pub fn address(&self) -> Address {
        self.address
    }

    /// Sign a 32-byte digest
    pub fn sign_hash(&self, hash: &[u8; 32]) -> Result<Signature> {
        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(hash)
            .map_err(|e| Error::Derivation(format!("Signing failed: {}", e)))?;

        let mut bytes = [0u8; 65];
        bytes[..64].copy_from_slice(&signature.to_bytes());
        bytes[64] = 27 + recovery_id.to_byte();
        Ok(Signature(bytes))
    }

    /// Sign an EIP-191 personal message
    pub fn sign_message(&self, message: &[u8]) -> Result<Signature> {
        self.sign_hash(&personal_message_hash(message))
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// EIP-191 digest: keccak("\x19Ethereum Signed Message:\n" || len || message)
pub fn personal_message_hash(message: &[u8]) -> [u8; 32] {
    let mut data = format!("\x19Ethereum Signed Message:\n{}", message.len()).into_bytes();
    data.extend_from_slice(message);
    keccak256(&data)
}
