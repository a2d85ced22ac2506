//! Host capabilities the key store depends on.
//!
//! The key store owns no global state. Everything that differs between hosts
//! is injected through these traits:
//!
//! - [`KeyValueStore`]: flat string-keyed substrate (volatile and persistent)
//! - [`Navigation`]: current location and location-change notification
//! - [`Clock`]: wall clock used for the expiration deadline
//! - [`Ticker`]: periodic callback used to poll the deadline
//!
//! [`Platform`] bundles one of each together with the elliptic-curve
//! provider. [`memory`] holds in-process implementations used by tests and
//! by hosts without a browser. [`FileStore`] is a persistent substrate backed
//! by a JSON file, and [`SystemClock`] and [`ThreadTicker`] use the operating
//! system.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::crypto::{EccProvider, K1Provider};
use crate::storage::StorageResult;

mod file;
pub mod memory;
mod system;

pub use file::FileStore;
pub use memory::{ManualClock, ManualTicker, MemoryHistory, MemoryStore};
pub use system::{SystemClock, ThreadTicker};

/// Flat string-keyed mapping, in the shape of browser `localStorage`.
///
/// Implementations are plain maps with no transactional grouping. The
/// persistent instance must outlive process restarts.
pub trait KeyValueStore: Send + Sync {
    /// Reads the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the substrate cannot be read.
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Deletes `key`. Deleting a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    fn remove(&self, key: &str) -> StorageResult<()>;

    /// Lists every key currently stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the substrate cannot be enumerated.
    fn keys(&self) -> StorageResult<Vec<String>>;
}

/// Callback invoked with the new location after a navigation.
pub type LocationListener = Arc<dyn Fn(&str) + Send + Sync>;

/// Callback invoked on every timer tick.
pub type TickCallback = Arc<dyn Fn() + Send + Sync>;

/// Source of the application location (`path + query + fragment`, no scheme
/// or host).
pub trait Navigation: Send + Sync {
    /// Returns the current location.
    fn current_location(&self) -> String;

    /// Registers `listener` for location changes until the returned
    /// subscription is cancelled.
    fn listen(&self, listener: LocationListener) -> Subscription;
}

/// Wall clock.
pub trait Clock: Send + Sync {
    /// Time elapsed since the Unix epoch.
    fn now(&self) -> Duration;
}

/// Periodic scheduler.
pub trait Ticker: Send + Sync {
    /// Invokes `tick` every `period` until the returned subscription is
    /// cancelled.
    fn every(&self, period: Duration, tick: TickCallback) -> Subscription;
}

/// Handle returned by [`Navigation::listen`] and [`Ticker::every`].
///
/// Dropping the handle does not cancel; call [`Subscription::cancel`].
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Wraps the host's unsubscribe action.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription with nothing to cancel.
    #[must_use]
    pub const fn noop() -> Self {
        Self { cancel: None }
    }

    /// Runs the unsubscribe action.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Host collaborators of a key store.
#[derive(Clone)]
pub struct Platform {
    /// Substrate cleared when the process exits.
    pub volatile: Arc<dyn KeyValueStore>,
    /// Substrate that outlives the process.
    pub persistent: Arc<dyn KeyValueStore>,
    /// Location source.
    pub navigation: Arc<dyn Navigation>,
    /// Time source for the expiration deadline.
    pub clock: Arc<dyn Clock>,
    /// Scheduler for the expiration poller. `None` disables polling; the
    /// deadline is still tracked.
    pub ticker: Option<Arc<dyn Ticker>>,
    /// Elliptic-curve provider.
    pub ecc: Arc<dyn EccProvider>,
}

impl Platform {
    /// Wires the given substrates and navigation with the system clock, a
    /// thread ticker and the secp256k1 provider.
    #[must_use]
    pub fn new(
        volatile: Arc<dyn KeyValueStore>,
        persistent: Arc<dyn KeyValueStore>,
        navigation: Arc<dyn Navigation>,
    ) -> Self {
        Self {
            volatile,
            persistent,
            navigation,
            clock: Arc::new(SystemClock),
            ticker: Some(Arc::new(ThreadTicker)),
            ecc: Arc::new(K1Provider::new()),
        }
    }

    /// Both substrates in memory.
    #[must_use]
    pub fn in_memory(navigation: Arc<dyn Navigation>) -> Self {
        Self::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryStore::new()),
            navigation,
        )
    }

    /// Replaces the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces (or removes) the ticker.
    #[must_use]
    pub fn with_ticker(mut self, ticker: Option<Arc<dyn Ticker>>) -> Self {
        self.ticker = ticker;
        self
    }

    /// Replaces the elliptic-curve provider.
    #[must_use]
    pub fn with_ecc(mut self, ecc: Arc<dyn EccProvider>) -> Self {
        self.ecc = ecc;
        self
    }
}

impl fmt::Debug for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Platform")
            .field("ticker", &self.ticker.is_some())
            .finish_non_exhaustive()
    }
}
