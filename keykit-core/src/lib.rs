//! Key management for accounts whose authority is a tree of named
//! permissions (`owner` → `active` → `active/...`).
//!
//! - [`keygen`] maps a permission tree to key paths and re-derives any
//!   descendant key from a cached ancestor.
//! - [`rules`] decides which key paths may be resident at which application
//!   location.
//! - [`Keystore`] ties both to two storage substrates, revoking keys on
//!   navigation, on an idle timeout and on re-login with different material.
//!
//! ```rust
//! use std::sync::Arc;
//! use keykit_core::platform::{MemoryHistory, Platform};
//! use keykit_core::{Keystore, KeystoreConfig, LoginRequest};
//!
//! let history = Arc::new(MemoryHistory::new("/"));
//! let platform = Platform::in_memory(history).with_ticker(None);
//! let keystore = Keystore::new("myaccount", KeystoreConfig::default(), platform)?;
//!
//! keystore.derive_keys(LoginRequest::new(
//!     "PW5JMx76CTUTXxpAbwAqGMMVzSeJaP5UVTT5c2uobcpaMUdLAphSp",
//! ))?;
//! assert!(keystore.get_private_key("active")?.is_some());
//! # Ok::<(), keykit_core::KeystoreError>(())
//! ```
#![deny(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod crypto;

mod error;
pub use error::*;

pub mod keygen;

mod keystore;
pub use keystore::*;

pub mod logger;

pub mod matcher;

pub mod path;
pub use path::{KeyPath, PathError};

pub mod platform;
pub use platform::Platform;

pub mod rules;

pub mod secret;
pub use secret::KeyInput;

pub mod storage;

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!("keykit_core");
