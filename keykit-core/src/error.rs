use thiserror::Error;

use crate::crypto::CryptoError;
use crate::path::PathError;
use crate::storage::StorageError;

/// Result type for key store operations.
pub type KeystoreResult<T, E = KeystoreError> = std::result::Result<T, E>;

/// Error outputs from the key store and its derivation and rule engines.
#[derive(Debug, Error)]
#[cfg_attr(feature = "ffi", derive(uniffi::Error))]
#[cfg_attr(feature = "ffi", uniffi(flat_error))]
pub enum KeystoreError {
    /// A key path is malformed.
    #[error(transparent)]
    Path(#[from] PathError),

    /// The permission tree is not a tree (cycle or duplicate names).
    #[error("permission tree shape: {0}")]
    Shape(String),

    /// The supplied secret is not a master secret.
    #[error("invalid secret: {0}")]
    InvalidSecret(String),

    /// The supplied login material is not usable or matches no authority.
    #[error("invalid login")]
    InvalidLogin,

    /// A high-value key would have been written to persistent storage.
    #[error("{path} key should not be stored on disk")]
    DiskSecurity {
        /// Path or save pattern that violated the invariant.
        path: String,
    },

    /// The same public key appears in two distinct authorities.
    #[error("{role} key reused in authority: {other}")]
    KeyReuse {
        /// Role whose key was found elsewhere.
        role: String,
        /// Path of the authority that reuses it.
        other: String,
    },

    /// Every key implied by the login was denied at the current location.
    #[error("invalid login for page")]
    PageScope,

    /// A requested signing key is known but its private key is unavailable.
    #[error("login with your '{path}' key")]
    MissingKey {
        /// Path holding the public key.
        path: String,
    },

    /// A requested public key is not known to this key store.
    #[error("missing public key {pubkey}")]
    UnknownKey {
        /// The unrecognized public key.
        pubkey: String,
    },

    /// A public key argument could not be parsed.
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// A path matcher or location pattern failed to compile.
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Compiler message.
        reason: String,
    },

    /// Errors coming from the prefix-keyed storage layer.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Errors coming from the elliptic-curve provider.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// The key store state lock was poisoned.
    #[error("keystore lock error: {0}")]
    Lock(String),
}

impl KeystoreError {
    pub(crate) fn pattern(pattern: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = KeystoreError::KeyReuse {
            role: "active".to_string(),
            other: "owner".to_string(),
        };
        assert_eq!(err.to_string(), "active key reused in authority: owner");

        let err = KeystoreError::MissingKey {
            path: "active/mypermission".to_string(),
        };
        assert!(err.to_string().contains("login with your 'active/mypermission' key"));

        let err: KeystoreError = StorageError::Immutable {
            key: "k".to_string(),
        }
        .into();
        assert!(err.to_string().contains("immutable"));
    }
}
