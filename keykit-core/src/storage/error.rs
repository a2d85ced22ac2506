//! Error types for the prefix-keyed storage layer.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by storage substrates and the namespace layer.
#[derive(Debug, Error)]
#[cfg_attr(feature = "ffi", derive(uniffi::Error))]
#[cfg_attr(feature = "ffi", uniffi(flat_error))]
pub enum StorageError {
    /// An existing value would have been replaced by a different one.
    #[error("immutable: refusing to overwrite {key}")]
    Immutable {
        /// Encoded key of the protected entry.
        key: String,
    },

    /// Errors coming from the substrate itself.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Serialization/deserialization failures.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A substrate lock was poisoned.
    #[error("storage lock error: {0}")]
    Lock(String),
}
