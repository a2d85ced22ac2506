//! Prefix-keyed storage over flat key-value substrates.

mod error;
mod namespace;

pub use error::{StorageError, StorageResult};
pub use namespace::{Namespace, SaveOptions};
