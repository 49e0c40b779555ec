//! Transaction signer holding the sender's private key

use crate::error::{Error, Result};
use alloy::primitives::{Address, Signature, B256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;

/// Holds the sender's private key and address
///
/// The key is only ever used inside [`Signer::sign_hash`]; it is never
/// returned, logged or serialized. The address doubles as the nonce namespace
/// of the [`crate::nonce::NonceSequencer`].
pub struct Signer {
    inner: PrivateKeySigner,
}

impl Signer {
    /// Create a signer from a hex-encoded private key (with or without `0x`)
    pub fn from_secret(key: &SecretString) -> Result<Self> {
        let inner = key
            .expose_secret()
            .trim()
            .parse::<PrivateKeySigner>()
            .map_err(|_| Error::Signing("Invalid private key".to_string()))?;
        Ok(Self { inner })
    }

    /// Create a signer with a freshly generated key
    pub fn random() -> Self {
        Self {
            inner: PrivateKeySigner::random(),
        }
    }

    /// Address controlled by this signer
    pub fn address(&self) -> Address {
        self.inner.address()
    }

    /// Sign a 32-byte digest
    ///
    /// ECDSA nonces are derived per RFC 6979, so the same digest always yields
    /// the same signature.
    pub(crate) fn sign_hash(&self, hash: &B256) -> Result<Signature> {
        Ok(self.inner.sign_hash_sync(hash)?)
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Well-known development key (anvil account #0)
    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[test]
    fn test_signer_address() {
        let signer = Signer::from_secret(&SecretString::new(DEV_KEY.to_string())).unwrap();
        assert_eq!(
            signer.address().to_checksum(None),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
        );
    }

    #[test]
    fn test_invalid_key() {
        assert!(Signer::from_secret(&SecretString::new("not-a-key".to_string())).is_err());
    }

    #[test]
    fn test_debug_hides_key() {
        let signer = Signer::from_secret(&SecretString::new(DEV_KEY.to_string())).unwrap();
        let debug = format!("{signer:?}");
        assert!(!debug.contains(&DEV_KEY[2..]));
        assert!(debug.contains("address"));
    }

    #[test]
    fn test_signing_is_deterministic() {
        let signer = Signer::random();
        let digest = B256::repeat_byte(0x11);
        assert_eq!(signer.sign_hash(&digest).unwrap(), signer.sign_hash(&digest).unwrap());
    }
}
