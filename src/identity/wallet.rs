//! Ethereum signing key for agent identity.
//!
//! Wraps alloy's local signer. The private scalar is only reachable
//! through [`SigningKey::secret_bytes`], which hands out a zeroizing copy
//! for the keystore encryption path, and through [`SigningKey::sign_hash`].

use std::fmt;

use alloy::primitives::{Address, B256, Signature, hex};
use alloy::signers::SignerSync;
use alloy::signers::local::PrivateKeySigner;
use secrecy::zeroize::Zeroizing;

/// Length of a secp256k1 private scalar in bytes.
pub const PRIVATE_KEY_LEN: usize = 32;

/// A secp256k1 private key plus its derived address.
///
/// `Debug` never prints the key material.
#[derive(Clone)]
pub struct SigningKey {
    signer: PrivateKeySigner,
}

impl SigningKey {
    /// Generate a new key from the OS random number generator.
    pub fn random() -> Self {
        Self {
            signer: PrivateKeySigner::random(),
        }
    }

    /// Parse a hex-encoded private key, with or without the `0x` prefix.
    pub fn from_hex(private_key_hex: &str) -> Result<Self, WalletError> {
        let trimmed = private_key_hex.trim();
        let key_hex = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let key_bytes = Zeroizing::new(hex::decode(key_hex).map_err(|_| WalletError::InvalidPrivateKey)?);
        if key_bytes.len() != PRIVATE_KEY_LEN {
            return Err(WalletError::InvalidPrivateKey);
        }
        let mut raw = Zeroizing::new([0u8; PRIVATE_KEY_LEN]);
        raw.copy_from_slice(&key_bytes);
        Self::from_bytes(&raw)
    }

    /// Build a key from its raw 32-byte scalar.
    pub fn from_bytes(bytes: &[u8; PRIVATE_KEY_LEN]) -> Result<Self, WalletError> {
        let signer = PrivateKeySigner::from_bytes(&B256::from(*bytes))
            .map_err(|e| WalletError::SignerCreation(e.to_string()))?;
        Ok(Self { signer })
    }

    /// The Ethereum address derived from the public key.
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Copy of the private scalar, zeroed when dropped.
    pub(crate) fn secret_bytes(&self) -> Zeroizing<[u8; PRIVATE_KEY_LEN]> {
        let mut out = Zeroizing::new([0u8; PRIVATE_KEY_LEN]);
        out.copy_from_slice(self.signer.credential().to_bytes().as_slice());
        out
    }

    /// Sign a 32-byte prehash (e.g. a transaction signature hash).
    pub fn sign_hash(&self, hash: &B256) -> Result<Signature, WalletError> {
        self.signer
            .sign_hash_sync(hash)
            .map_err(|e| WalletError::SigningFailed(e.to_string()))
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("address", &format_args!("{:#x}", self.address()))
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Format an address as lowercase `0x`-prefixed hex.
pub fn address_hex(address: &Address) -> String {
    format!("{address:#x}")
}

/// Wallet management errors.
#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("invalid private key format")]
    InvalidPrivateKey,
    #[error("failed to create signer: {0}")]
    SignerCreation(String),
    #[error("signing failed: {0}")]
    SigningFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    // Well-known development key (first account of the default hardhat/anvil mnemonic).
    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const DEV_ADDRESS: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";

    #[test]
    fn random_key_has_valid_address() {
        let key = SigningKey::random();
        let addr = address_hex(&key.address());
        assert!(addr.starts_with("0x"), "address should be 0x-prefixed");
        assert_eq!(addr.len(), 42, "address should be 42 chars (0x + 40 hex)");
    }

    #[test]
    fn from_hex_derives_known_address() {
        let key = SigningKey::from_hex(DEV_KEY).unwrap();
        assert_eq!(address_hex(&key.address()), DEV_ADDRESS);

        let unprefixed = SigningKey::from_hex(DEV_KEY.trim_start_matches("0x")).unwrap();
        assert_eq!(unprefixed.address(), key.address());
    }

    #[test]
    fn from_hex_rejects_garbage() {
        assert!(matches!(
            SigningKey::from_hex("0x1234"),
            Err(WalletError::InvalidPrivateKey)
        ));
        assert!(matches!(
            SigningKey::from_hex("not hex at all"),
            Err(WalletError::InvalidPrivateKey)
        ));
    }

    #[test]
    fn secret_bytes_round_trip() {
        let key = SigningKey::random();
        let bytes = key.secret_bytes();
        let restored = SigningKey::from_bytes(&bytes).unwrap();
        assert_eq!(restored.address(), key.address());
    }

    #[test]
    fn debug_is_redacted() {
        let key = SigningKey::from_hex(DEV_KEY).unwrap();
        let printed = format!("{key:?}");
        assert!(printed.contains("<redacted>"));
        assert!(!printed.contains(DEV_KEY.trim_start_matches("0x")));
    }

    #[test]
    fn signature_recovers_to_address() {
        let key = SigningKey::random();
        let hash = alloy::primitives::keccak256(b"hello registrar");
        let sig = key.sign_hash(&hash).unwrap();
        let recovered = sig.recover_address_from_prehash(&hash).unwrap();
        assert_eq!(recovered, key.address());
    }
}
