//! In-memory implementations of the platform traits.
//!
//! [`MemoryStore`] is the volatile substrate of every key store. The
//! remaining types stand in for a browser history, a wall clock and a timer in
//! tests, so scenarios run without real time passing.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use crate::storage::{StorageError, StorageResult};

use super::{Clock, KeyValueStore, LocationListener, Navigation, Subscription, TickCallback, Ticker};

// =============================================================================
// Memory Store
// =============================================================================

/// In-memory key-value substrate backed by a `BTreeMap`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

fn poisoned<T>(_: PoisonError<T>) -> StorageError {
    StorageError::Lock("mutex poisoned".to_string())
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.entries.read().map_err(poisoned)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.entries
            .write()
            .map_err(poisoned)?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.entries.write().map_err(poisoned)?.remove(key);
        Ok(())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.entries.read().map_err(poisoned)?.keys().cloned().collect())
    }
}

// =============================================================================
// Memory History
// =============================================================================

type Listeners = Arc<Mutex<BTreeMap<u64, LocationListener>>>;

/// In-memory navigation history.
///
/// [`push`](Self::push) changes the location and notifies listeners
/// synchronously, outside of any internal lock.
#[derive(Default)]
pub struct MemoryHistory {
    location: RwLock<String>,
    listeners: Listeners,
    next_id: AtomicU64,
}

impl MemoryHistory {
    /// Creates a history positioned at `location`.
    #[must_use]
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: RwLock::new(location.into()),
            ..Self::default()
        }
    }

    /// Navigates to `location` and notifies listeners.
    pub fn push(&self, location: impl Into<String>) {
        let location = location.into();
        *self
            .location
            .write()
            .unwrap_or_else(PoisonError::into_inner) = location.clone();

        let listeners: Vec<LocationListener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for listener in listeners {
            listener(&location);
        }
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Navigation for MemoryHistory {
    fn current_location(&self) -> String {
        self.location
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn listen(&self, listener: LocationListener) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, listener);

        let listeners = Arc::clone(&self.listeners);
        Subscription::new(move || {
            listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
        })
    }
}

// =============================================================================
// Manual Clock
// =============================================================================

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    /// Creates a clock reading `now`.
    #[must_use]
    pub fn new(now: Duration) -> Self {
        Self { now: Mutex::new(now) }
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// =============================================================================
// Manual Ticker
// =============================================================================

type Tasks = Arc<Mutex<BTreeMap<u64, (Duration, TickCallback)>>>;

/// Ticker whose callbacks run only when [`tick`](Self::tick) is called.
#[derive(Default)]
pub struct ManualTicker {
    tasks: Tasks,
    next_id: AtomicU64,
}

impl ManualTicker {
    /// Creates a ticker with no scheduled tasks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs every scheduled callback once. Callbacks may cancel their own
    /// subscription while running.
    pub fn tick(&self) {
        let tasks: Vec<TickCallback> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|(_, tick)| Arc::clone(tick))
            .collect();
        for tick in tasks {
            tick();
        }
    }

    /// Periods of the currently scheduled tasks.
    #[must_use]
    pub fn scheduled(&self) -> Vec<Duration> {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|(period, _)| *period)
            .collect()
    }
}

impl Ticker for ManualTicker {
    fn every(&self, period: Duration, tick: TickCallback) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, (period, tick));

        let tasks = Arc::clone(&self.tasks);
        Subscription::new(move || {
            tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
        })
    }
}
