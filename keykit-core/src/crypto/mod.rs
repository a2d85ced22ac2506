//! Elliptic-curve provider interface.
//!
//! The key store never performs curve arithmetic itself. Everything it needs
//! (random keys, deterministic child keys, WIF and public key encodings,
//! signing and shared secrets) goes through an [`EccProvider`]. The
//! [`K1Provider`] implementation covers secp256k1 with legacy `EOS` public key
//! encoding.

use std::fmt;

use thiserror::Error;
use zeroize::Zeroizing;

mod k1;

pub use k1::K1Provider;

/// Errors raised by an elliptic-curve provider.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// A WIF string failed to decode or its checksum did not match.
    #[error("invalid wif: {0}")]
    InvalidWif(String),
    /// A public key string failed to decode.
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),
    /// A signature failed to decode or recover.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    /// Key bytes are outside the curve order.
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),
    /// Signing failed.
    #[error("signing failed: {0}")]
    Signing(String),
}

/// Result type for provider operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// A 32-byte private scalar. Zeroized on drop and redacted in debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey(Zeroizing<[u8; 32]>);

impl PrivateKey {
    /// Wraps raw key bytes. Range checks are the provider's responsibility.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Returns the raw key bytes. Treat this as sensitive material.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}

/// Elliptic-curve primitives consumed by the key store.
///
/// Implementations must be deterministic for [`child_key`](Self::child_key)
/// and the encodings: the same inputs always give the same outputs, so keys
/// can be re-derived instead of stored.
pub trait EccProvider: Send + Sync {
    /// Generates a fresh random private key.
    ///
    /// # Errors
    ///
    /// Returns an error if the random source fails.
    fn random_key(&self) -> CryptoResult<PrivateKey>;

    /// Deterministically derives the child key named `label`.
    ///
    /// # Errors
    ///
    /// Returns an error if the derived scalar is not a valid key.
    fn child_key(&self, parent: &PrivateKey, label: &str) -> CryptoResult<PrivateKey>;

    /// Encodes a private key as WIF.
    fn to_wif(&self, key: &PrivateKey) -> String;

    /// Decodes a WIF string.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidWif`] on malformed input.
    fn from_wif(&self, wif: &str) -> CryptoResult<PrivateKey>;

    /// Computes the encoded public key of a private key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is outside the curve order.
    fn to_public(&self, key: &PrivateKey) -> CryptoResult<String>;

    /// Computes the encoded public key of a WIF string.
    ///
    /// # Errors
    ///
    /// Returns an error if the WIF does not decode.
    fn public_from_wif(&self, wif: &str) -> CryptoResult<String> {
        self.to_public(&self.from_wif(wif)?)
    }

    /// Signs `message` (hashed by the provider) and returns the encoded
    /// signature.
    ///
    /// # Errors
    ///
    /// Returns an error if signing fails.
    fn sign(&self, message: &[u8], key: &PrivateKey) -> CryptoResult<String>;

    /// Recovers the encoded public key that produced `signature` over
    /// `message`.
    ///
    /// # Errors
    ///
    /// Returns an error if the signature is malformed or does not recover.
    fn recover(&self, signature: &str, message: &[u8]) -> CryptoResult<String>;

    /// Computes the shared secret between `key` and `pubkey`.
    ///
    /// # Errors
    ///
    /// Returns an error if `pubkey` does not decode.
    fn shared_secret(&self, key: &PrivateKey, pubkey: &str) -> CryptoResult<Vec<u8>>;

    /// Returns `true` if `wif` decodes to a private key.
    fn is_valid_wif(&self, wif: &str) -> bool {
        self.from_wif(wif).is_ok()
    }

    /// Returns `true` if `pubkey` decodes to a curve point.
    fn is_valid_pubkey(&self, pubkey: &str) -> bool;
}
