//! Per-account credential store.
//!
//! A [`Keystore`] holds the keys of one account in two substrates: a volatile
//! one (lost on exit) and a persistent one (only for keys the caller asked to
//! save, never `owner`). Keys are stored under
//! `(account, "kpath", path, pubkey)` with the WIF as value, or `null` when
//! only the public key is kept.
//!
//! Three things remove keys besides explicit calls:
//! - navigating to a location where a resident key is denied,
//! - the idle deadline lapsing (only `timeout_key_paths`),
//! - a re-login that changes a key (its derived children are dropped).
//!
//! Navigation and the expiry poller call back into the key store from
//! outside. Both callbacks hold a weak reference and take the state lock, so
//! they never race a public operation and stop on their own once the key
//! store is dropped.

use std::fmt;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use crate::error::{KeystoreError, KeystoreResult};
use crate::matcher::{KeySelector, PathMatcher};
use crate::path::KeyPath;
use crate::platform::{KeyValueStore, LocationListener, Platform, Subscription, TickCallback};
use crate::rules::UriRules;
use crate::secret::{self, KeyInput};
use crate::storage::{Namespace, SaveOptions};

mod config;
mod expiry;
mod keys;
mod login;

pub use config::KeystoreConfig;
pub use keys::{AddedKey, KeyPaths, KeyRecord, SharedSecretSignatures};
pub use login::LoginRequest;

use expiry::{Expiration, Tick};

/// Storage namespace shared by every account.
pub const NAMESPACE: &str = "kstor";

const KPATH: &str = "kpath";
const PERMISSIONS: &str = "permissions";

/// Overwrites nulls and secrets alike.
const MUTABLE: SaveOptions = SaveOptions {
    immutable: false,
    clobber: true,
};

/// Key store for one account.
///
/// Cloning is cheap and every clone shares the same state.
#[derive(Clone)]
pub struct Keystore {
    inner: Arc<Mutex<KeystoreInner>>,
}

struct KeystoreInner {
    account: String,
    config: KeystoreConfig,
    rules: UriRules,
    timeout_paths: Vec<PathMatcher>,
    platform: Platform,
    ns: Namespace,
    expiration: Expiration,
    history: Option<Subscription>,
    poller: Option<Subscription>,
}

impl Keystore {
    /// Opens the key store of `account`.
    ///
    /// Keys saved to the persistent substrate by an earlier session are
    /// copied back into the volatile substrate.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoreError::InvalidPattern`] if a configured rule or
    /// timeout glob does not compile, or a storage error if the persistent
    /// substrate cannot be read.
    pub fn new(
        account: impl Into<String>,
        config: KeystoreConfig,
        platform: Platform,
    ) -> KeystoreResult<Self> {
        let rules = UriRules::new(&config.uri_rules)?;
        let timeout_paths = PathMatcher::all(&config.timeout_key_paths)?;
        let inner = KeystoreInner {
            account: account.into(),
            expiration: Expiration::new(config.timeout()),
            config,
            rules,
            timeout_paths,
            platform,
            ns: Namespace::new(NAMESPACE),
            history: None,
            poller: None,
        };
        inner.restore()?;

        Ok(Self {
            inner: Arc::new(Mutex::new(inner)),
        })
    }

    fn lock(&self) -> KeystoreResult<MutexGuard<'_, KeystoreInner>> {
        self.inner
            .lock()
            .map_err(|_| KeystoreError::Lock("keystore state poisoned".to_string()))
    }

    /// Logs in with a master secret or a private key and derives every key
    /// the permission tree allows.
    ///
    /// The first successful call starts watching navigation and, when a
    /// timeout is configured, the expiry poller.
    ///
    /// # Errors
    ///
    /// - [`KeystoreError::InvalidLogin`] if the secret is not usable or
    ///   matches no authority.
    /// - [`KeystoreError::DiskSecurity`] if a save pattern covers `owner`.
    /// - [`KeystoreError::KeyReuse`] if `owner` or `active` share a key with
    ///   another permission.
    /// - [`KeystoreError::PageScope`] if the current location denies every
    ///   key the secret implies and every key derived from them. Nothing is
    ///   stored in that case.
    pub fn derive_keys(&self, request: LoginRequest) -> KeystoreResult<()> {
        let mut inner = self.lock()?;
        inner.derive_keys(request)?;
        inner.attach(&Arc::downgrade(&self.inner));
        Ok(())
    }

    /// Stores one key under `path`. `key` may be a WIF, a public key or a
    /// decoded private key.
    ///
    /// Returns `None` when the current location denies `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if `path` is invalid, `key` is not a key, or `to_disk`
    /// is set for an `owner` path.
    pub fn add_key(
        &self,
        path: &str,
        key: impl Into<KeyInput>,
        to_disk: bool,
    ) -> KeystoreResult<Option<AddedKey>> {
        let path = KeyPath::parse(path)?;
        let mut inner = self.lock()?;
        inner.keep_alive();
        let key = secret::classify(&*inner.platform.ecc, &key.into());
        inner.add_key(&path, &key, to_disk)
    }

    /// Records matching a path or glob. An exact path with no resident
    /// record is derived on demand from resident ancestors, without caching.
    ///
    /// # Errors
    ///
    /// Returns an error if `matcher` is neither a path nor a glob.
    pub fn get_keys(&self, matcher: &str) -> KeystoreResult<Vec<KeyRecord>> {
        let selector = KeySelector::parse(matcher)?;
        let mut inner = self.lock()?;
        inner.keep_alive();
        inner.get_keys(&selector)
    }

    /// Paths holding public keys and paths holding private keys.
    ///
    /// # Errors
    ///
    /// Returns an error if a substrate cannot be read.
    pub fn get_key_paths(&self) -> KeystoreResult<KeyPaths> {
        let mut inner = self.lock()?;
        inner.keep_alive();
        inner.get_key_paths()
    }

    /// Public key at `path`, resident or derived.
    ///
    /// # Errors
    ///
    /// Returns an error if `path` is invalid.
    pub fn get_public_key(&self, path: &str) -> KeystoreResult<Option<String>> {
        let selector = KeySelector::Exact(KeyPath::parse(path)?);
        let mut inner = self.lock()?;
        inner.keep_alive();
        Ok(inner
            .get_keys(&selector)?
            .into_iter()
            .next()
            .map(|record| record.pubkey))
    }

    /// Public keys matching a path or glob, including keys whose private key
    /// is unavailable.
    ///
    /// # Errors
    ///
    /// Returns an error if `matcher` is neither a path nor a glob.
    pub fn get_public_keys(&self, matcher: &str) -> KeystoreResult<Vec<String>> {
        let selector = KeySelector::parse(matcher)?;
        let mut inner = self.lock()?;
        inner.keep_alive();
        inner.get_public_keys(&selector)
    }

    /// Private key (WIF) at `path`, resident or derived. `None` when missing
    /// or denied at the current location.
    ///
    /// # Errors
    ///
    /// Returns an error if `path` is invalid.
    pub fn get_private_key(&self, path: &str) -> KeystoreResult<Option<String>> {
        let selector = KeySelector::Exact(KeyPath::parse(path)?);
        let mut inner = self.lock()?;
        inner.keep_alive();
        Ok(inner
            .get_keys(&selector)?
            .into_iter()
            .find_map(|record| record.wif))
    }

    /// Private keys matching `matcher`. With `pubkeys`, returns exactly the
    /// private keys of those public keys, in order.
    ///
    /// # Errors
    ///
    /// - [`KeystoreError::MissingKey`] if a requested key is known but its
    ///   private key is unavailable here.
    /// - [`KeystoreError::UnknownKey`] if a requested key is not known.
    pub fn get_private_keys(
        &self,
        matcher: &str,
        pubkeys: Option<&[String]>,
    ) -> KeystoreResult<Vec<String>> {
        let selector = KeySelector::parse(matcher)?;
        let mut inner = self.lock()?;
        inner.keep_alive();
        inner.get_private_keys(&selector, pubkeys)
    }

    /// Removes `paths` and everything derived below them from both
    /// substrates. With `keep_public_keys` the records stay with a null
    /// private key.
    ///
    /// # Errors
    ///
    /// Returns an error if a path is invalid or a substrate write fails.
    pub fn remove_keys(&self, paths: &[&str], keep_public_keys: bool) -> KeystoreResult<()> {
        let paths = paths
            .iter()
            .map(|path| KeyPath::parse(path))
            .collect::<Result<Vec<_>, _>>()?;
        let inner = self.lock()?;
        inner.remove_keys(&paths, keep_public_keys)?;
        Ok(())
    }

    /// Signs a fresh shared secret with every private key matching
    /// `matcher`, proving control of those keys to the holder of
    /// `other_pubkey`.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoreError::InvalidPublicKey`] if `other_pubkey` does not
    /// decode.
    pub fn sign_shared_secret(
        &self,
        other_pubkey: &str,
        matcher: &str,
    ) -> KeystoreResult<SharedSecretSignatures> {
        let selector = KeySelector::parse(matcher)?;
        let mut inner = self.lock()?;
        inner.keep_alive();
        inner.sign_shared_secret(other_pubkey, &selector)
    }

    /// Two-pass signing integration: without `pubkeys` returns the available
    /// public keys matching `matcher` (default all); with `pubkeys` returns
    /// their private keys.
    ///
    /// # Errors
    ///
    /// See [`get_private_keys`](Self::get_private_keys).
    pub fn key_provider(
        &self,
        matcher: Option<&str>,
        pubkeys: Option<&[String]>,
    ) -> KeystoreResult<Vec<String>> {
        let selector = matcher.map_or_else(|| Ok(KeySelector::any()), KeySelector::parse)?;
        let mut inner = self.lock()?;
        inner.keep_alive();
        match pubkeys {
            Some(pubkeys) => inner.get_private_keys(&selector, Some(pubkeys)),
            None => inner.get_public_keys(&selector),
        }
    }

    /// Wipes every key and the cached permission tree of this account from
    /// both substrates and stops watching navigation and the deadline. Safe
    /// to call repeatedly.
    ///
    /// # Errors
    ///
    /// Returns an error if a substrate write fails.
    pub fn logout(&self) -> KeystoreResult<()> {
        self.lock()?.logout()
    }

    /// Pushes the idle deadline out by the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoreError::Lock`] if the state lock is poisoned.
    pub fn keep_alive(&self) -> KeystoreResult<()> {
        self.lock()?.keep_alive();
        Ok(())
    }

    /// Time left before expiry; zero when expired or never armed.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoreError::Lock`] if the state lock is poisoned.
    pub fn time_until_expire(&self) -> KeystoreResult<Duration> {
        let inner = self.lock()?;
        Ok(inner
            .expiration
            .time_until_expire(inner.platform.clock.now()))
    }

    /// Erases every account's entries under [`NAMESPACE`] from `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if the substrate fails.
    pub fn wipe_all(store: &dyn KeyValueStore) -> KeystoreResult<()> {
        let removed = Namespace::new(NAMESPACE).remove_prefix::<&str>(store, &[])?;
        log::info!("wiped {removed} key store entries");
        Ok(())
    }
}

impl fmt::Debug for Keystore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keystore").finish_non_exhaustive()
    }
}

impl KeystoreInner {
    fn stores(&self) -> [&dyn KeyValueStore; 2] {
        [&*self.platform.volatile, &*self.platform.persistent]
    }

    fn kpath_prefix(&self) -> [&str; 2] {
        [self.account.as_str(), KPATH]
    }

    fn record_key(&self, path: &KeyPath, pubkey: &str) -> String {
        self.ns
            .encode_key(&[self.account.as_str(), KPATH, path.as_str(), pubkey])
    }

    fn permissions_key(&self) -> String {
        self.ns.encode_key(&[self.account.as_str(), PERMISSIONS])
    }

    fn location(&self) -> String {
        self.platform.navigation.current_location()
    }

    fn keep_alive(&mut self) {
        self.expiration.keep_alive(self.platform.clock.now());
    }

    /// Copies persisted records into the volatile substrate.
    fn restore(&self) -> KeystoreResult<()> {
        let persistent = &*self.platform.persistent;
        let volatile = &*self.platform.volatile;
        let mut restored = 0usize;
        for (key, _) in self.ns.scan(persistent, &self.kpath_prefix())? {
            if volatile.get(&key)?.is_some() {
                continue;
            }
            if let Some(raw) = persistent.get(&key)? {
                volatile.set(&key, &raw)?;
                restored += 1;
            }
        }
        if restored > 0 {
            log::debug!("restored {restored} persisted keys for {}", self.account);
        }
        Ok(())
    }

    /// Visits every record in both substrates as `(path, pubkey, wif)`.
    fn for_each_record(
        &self,
        mut visit: impl FnMut(KeyPath, String, Option<String>),
    ) -> KeystoreResult<()> {
        for store in self.stores() {
            self.ns.query(store, &self.kpath_prefix(), |suffix, wif| {
                if let [path, pubkey] = suffix {
                    match KeyPath::parse(path) {
                        Ok(path) => visit(path, pubkey.clone(), wif),
                        Err(err) => log::warn!("skipping stored record: {err}"),
                    }
                }
                ControlFlow::Continue(())
            })?;
        }
        Ok(())
    }

    /// Removes (or nulls, with `keep_public`) every record whose path is
    /// selected. Returns the number of entries changed.
    fn purge(&self, select: impl Fn(&KeyPath) -> bool, keep_public: bool) -> KeystoreResult<usize> {
        self.purge_records(|path, _| select(path), keep_public)
    }

    /// Like [`Self::purge`], selecting on `(path, pubkey)`.
    fn purge_records(
        &self,
        select: impl Fn(&KeyPath, &str) -> bool,
        keep_public: bool,
    ) -> KeystoreResult<usize> {
        let mut purged = 0;
        for store in self.stores() {
            for (key, parts) in self.ns.scan(store, &self.kpath_prefix())? {
                let [_, _, path, pubkey] = parts.as_slice() else {
                    continue;
                };
                if !KeyPath::parse(path).is_ok_and(|path| select(&path, pubkey.as_str())) {
                    continue;
                }
                if keep_public {
                    if self.ns.save(store, &key, None, MUTABLE)? {
                        purged += 1;
                    }
                } else {
                    store.remove(&key)?;
                    purged += 1;
                }
            }
        }
        Ok(purged)
    }

    fn attach(&mut self, this: &Weak<Mutex<Self>>) {
        if self.history.is_none() {
            let weak = Weak::clone(this);
            let listener: LocationListener = Arc::new(move |location: &str| {
                with_inner(&weak, |inner| inner.on_location_change(location));
            });
            self.history = Some(self.platform.navigation.listen(listener));
        }

        if self.poller.is_none() {
            if let (Some(ticker), Some(period)) = (&self.platform.ticker, self.expiration.timeout())
            {
                let weak = Weak::clone(this);
                let tick: TickCallback = Arc::new(move || {
                    with_inner(&weak, KeystoreInner::on_tick);
                });
                self.poller = Some(ticker.every(period, tick));
            }
        }
    }

    /// Purges resident private keys the new location denies.
    fn on_location_change(&mut self, location: &str) -> KeystoreResult<()> {
        self.keep_alive();

        let mut resident = Vec::new();
        self.for_each_record(|path, _, wif| {
            if wif.is_some() && !resident.contains(&path) {
                resident.push(path);
            }
        })?;

        let denied = self.rules.deny(location, &resident);
        if denied.is_empty() {
            return Ok(());
        }
        self.purge(|path| denied.contains(path), self.config.keep_public_keys)?;
        log::info!("navigation purged {} key paths for {}", denied.len(), self.account);
        Ok(())
    }

    /// Purges the timeout paths once the deadline passes, then stops polling.
    fn on_tick(&mut self) -> KeystoreResult<()> {
        let Tick::Expired = self.expiration.tick(self.platform.clock.now()) else {
            return Ok(());
        };

        let purged = self.purge(
            |path| self.timeout_paths.iter().any(|matcher| matcher.matches(path)),
            self.config.keep_public_keys,
        )?;
        if let Some(poller) = self.poller.take() {
            poller.cancel();
        }
        log::info!("key store for {} expired, purged {purged} entries", self.account);
        Ok(())
    }

    fn detach(&mut self) {
        if let Some(history) = self.history.take() {
            history.cancel();
        }
        if let Some(poller) = self.poller.take() {
            poller.cancel();
        }
    }
}

impl Drop for KeystoreInner {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Runs a callback against the shared state if the key store is still alive.
fn with_inner(
    weak: &Weak<Mutex<KeystoreInner>>,
    run: impl FnOnce(&mut KeystoreInner) -> KeystoreResult<()>,
) {
    let Some(shared) = weak.upgrade() else {
        return;
    };
    let result = match shared.lock() {
        Ok(mut inner) => run(&mut inner),
        Err(_) => Err(KeystoreError::Lock("keystore state poisoned".to_string())),
    };
    if let Err(err) = result {
        log::warn!("key store callback failed: {err}");
    }
}
