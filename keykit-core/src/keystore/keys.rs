use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::crypto::PrivateKey;
use crate::error::{KeystoreError, KeystoreResult};
use crate::keygen;
use crate::matcher::KeySelector;
use crate::path::KeyPath;
use crate::secret::Classified;
use crate::storage::SaveOptions;

use super::KeystoreInner;

/// Fills null placeholders but never replaces a stored private key.
const KEEP_SECRETS: SaveOptions = SaveOptions {
    immutable: true,
    clobber: false,
};

/// A stored (or derived) key as seen from the current location.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct KeyRecord {
    /// Key path.
    pub path: KeyPath,
    /// Encoded public key.
    pub pubkey: String,
    /// WIF, or `None` when unavailable or denied here.
    pub wif: Option<String>,
    /// The current location denies this path.
    pub deny: bool,
}

impl fmt::Debug for KeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRecord")
            .field("path", &self.path)
            .field("pubkey", &self.pubkey)
            .field("wif", &self.wif.as_ref().map(|_| "<redacted>"))
            .field("deny", &self.deny)
            .finish()
    }
}

/// Result of [`add_key`](super::Keystore::add_key).
#[derive(Clone, PartialEq, Eq)]
pub struct AddedKey {
    /// WIF of the added key, if a private key was given.
    pub wif: Option<String>,
    /// Encoded public key.
    pub pubkey: String,
    /// The key is new to every substrate written, or replaced another key at
    /// the same path.
    pub dirty: bool,
}

impl fmt::Debug for AddedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddedKey")
            .field("wif", &self.wif.as_ref().map(|_| "<redacted>"))
            .field("pubkey", &self.pubkey)
            .field("dirty", &self.dirty)
            .finish()
    }
}

/// Paths with resident keys, sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KeyPaths {
    /// Paths holding at least a public key.
    pub pubkey: Vec<KeyPath>,
    /// Paths holding a private key.
    pub wif: Vec<KeyPath>,
}

/// Result of [`sign_shared_secret`](super::Keystore::sign_shared_secret).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedSecretSignatures {
    /// One signature per matching private key, over the shared secret.
    pub signatures: Vec<String>,
    /// Public half of the one-time key the shared secret was computed with.
    pub one_time_public: String,
}

type Resident = BTreeMap<(KeyPath, String), Option<String>>;

impl KeystoreInner {
    fn check_disk(&self, path: &KeyPath) -> KeystoreResult<()> {
        let active_forbidden = !self.config.persist_active && *path == KeyPath::active();
        if path.is_owner_rooted() || active_forbidden {
            return Err(KeystoreError::DiskSecurity {
                path: path.to_string(),
            });
        }
        Ok(())
    }

    pub(super) fn add_key(
        &self,
        path: &KeyPath,
        key: &Classified,
        to_disk: bool,
    ) -> KeystoreResult<Option<AddedKey>> {
        let ecc = &*self.platform.ecc;
        let (wif, pubkey) = match key {
            Classified::Wif(private) | Classified::RawPrivate(private) => {
                (Some(ecc.to_wif(private)), ecc.to_public(private)?)
            }
            Classified::Pubkey(pubkey) => (None, pubkey.clone()),
            Classified::Master(_) | Classified::Unknown => {
                return Err(KeystoreError::InvalidSecret(format!(
                    "expected a wif, public key or private key, got {}",
                    key.kind()
                )))
            }
        };

        if to_disk {
            self.check_disk(path)?;
        }

        if !self.rules.is_allowed(&self.location(), path) {
            log::debug!("add_key denied for {path} at current location");
            return Ok(None);
        }

        // A new private key at a path replaces whatever key was there.
        let rotated = if wif.is_some() {
            self.purge_records(
                |other, other_pubkey| other == path && other_pubkey != pubkey,
                false,
            )?
        } else {
            0
        };
        if rotated > 0 {
            log::debug!("replaced {rotated} stale entries at {path}");
        }

        let record = self.record_key(path, &pubkey);
        let mut dirty =
            self.ns
                .save(&*self.platform.volatile, &record, wif.as_deref(), KEEP_SECRETS)?;
        if to_disk {
            // Already resident keys that are only now persisted stay clean.
            dirty = self.ns.save(
                &*self.platform.persistent,
                &record,
                wif.as_deref(),
                KEEP_SECRETS,
            )? && dirty;
        }
        dirty |= rotated > 0;

        if dirty {
            // Children may have been derived from a different key.
            let stale = self.purge(|other| path.is_ancestor_of(other), false)?;
            if stale > 0 {
                log::debug!("dropped {stale} derived entries below {path}");
            }
        }

        Ok(Some(AddedKey { wif, pubkey, dirty }))
    }

    /// Every record, merged across substrates. A private key in either
    /// substrate wins over a null.
    fn resident(&self) -> KeystoreResult<Resident> {
        let mut resident = Resident::new();
        self.for_each_record(|path, pubkey, wif| {
            let slot = resident.entry((path, pubkey)).or_insert(None);
            if slot.is_none() {
                *slot = wif;
            }
        })?;
        Ok(resident)
    }

    /// Decodes resident private keys by path. With `allowed_only`, paths
    /// denied at the current location are skipped.
    pub(super) fn resident_private_keys(
        &self,
        allowed_only: bool,
    ) -> KeystoreResult<BTreeMap<KeyPath, PrivateKey>> {
        let location = self.location();
        let mut keys = BTreeMap::new();
        for ((path, _), wif) in self.resident()? {
            let Some(wif) = wif else {
                continue;
            };
            if allowed_only && !self.rules.is_allowed(&location, &path) {
                continue;
            }
            match self.platform.ecc.from_wif(&wif) {
                Ok(key) => {
                    keys.entry(path).or_insert(key);
                }
                Err(err) => log::warn!("skipping undecodable key at {path}: {err}"),
            }
        }
        Ok(keys)
    }

    fn view(&self, location: &str, path: KeyPath, pubkey: String, wif: Option<String>) -> KeyRecord {
        let deny = !self.rules.is_allowed(location, &path);
        KeyRecord {
            path,
            pubkey,
            wif: if deny { None } else { wif },
            deny,
        }
    }

    pub(super) fn get_keys(&self, selector: &KeySelector) -> KeystoreResult<Vec<KeyRecord>> {
        let location = self.location();
        let records: Vec<KeyRecord> = self
            .resident()?
            .into_iter()
            .filter(|((path, _), _)| selector.matches(path))
            .map(|((path, pubkey), wif)| self.view(&location, path, pubkey, wif))
            .collect();

        let Some(target) = selector.exact() else {
            return Ok(records);
        };
        if !records.is_empty() {
            return Ok(records);
        }

        let ecc = &*self.platform.ecc;
        let known = self.resident_private_keys(false)?;
        let derived = keygen::derive_keys(ecc, target, &known)?
            .into_iter()
            .find(|derived| derived.path == *target);

        match derived {
            Some(derived) => {
                let pubkey = ecc.to_public(&derived.private_key)?;
                let wif = ecc.to_wif(&derived.private_key);
                Ok(vec![self.view(&location, derived.path, pubkey, Some(wif))])
            }
            None => Ok(records),
        }
    }

    pub(super) fn get_key_paths(&self) -> KeystoreResult<KeyPaths> {
        let mut pubkey = BTreeSet::new();
        let mut wif = BTreeSet::new();
        for ((path, _), private) in self.resident()? {
            if private.is_some() {
                wif.insert(path.clone());
            }
            pubkey.insert(path);
        }
        Ok(KeyPaths {
            pubkey: pubkey.into_iter().collect(),
            wif: wif.into_iter().collect(),
        })
    }

    pub(super) fn get_public_keys(&self, selector: &KeySelector) -> KeystoreResult<Vec<String>> {
        let mut seen = BTreeSet::new();
        Ok(self
            .get_keys(selector)?
            .into_iter()
            .filter_map(|record| seen.insert(record.pubkey.clone()).then_some(record.pubkey))
            .collect())
    }

    pub(super) fn get_private_keys(
        &self,
        selector: &KeySelector,
        pubkeys: Option<&[String]>,
    ) -> KeystoreResult<Vec<String>> {
        let records = self.get_keys(selector)?;
        let Some(pubkeys) = pubkeys else {
            return Ok(records.into_iter().filter_map(|record| record.wif).collect());
        };

        let mut by_pubkey: BTreeMap<&str, &KeyRecord> = BTreeMap::new();
        for record in records.iter().filter(|record| pubkeys.contains(&record.pubkey)) {
            let slot = by_pubkey.entry(record.pubkey.as_str()).or_insert(record);
            if slot.wif.is_none() {
                *slot = record;
            }
        }

        if let Some(missing) = by_pubkey.values().find(|record| record.wif.is_none()) {
            return Err(KeystoreError::MissingKey {
                path: missing.path.to_string(),
            });
        }

        pubkeys
            .iter()
            .map(|pubkey| {
                by_pubkey
                    .get(pubkey.as_str())
                    .and_then(|record| record.wif.clone())
                    .ok_or_else(|| KeystoreError::UnknownKey {
                        pubkey: pubkey.clone(),
                    })
            })
            .collect()
    }

    pub(super) fn remove_keys(&self, paths: &[KeyPath], keep_public: bool) -> KeystoreResult<usize> {
        self.purge(
            |path| paths.iter().any(|removed| removed.is_self_or_ancestor_of(path)),
            keep_public,
        )
    }

    pub(super) fn sign_shared_secret(
        &self,
        other_pubkey: &str,
        selector: &KeySelector,
    ) -> KeystoreResult<SharedSecretSignatures> {
        let ecc = &*self.platform.ecc;
        if !ecc.is_valid_pubkey(other_pubkey) {
            return Err(KeystoreError::InvalidPublicKey(other_pubkey.to_string()));
        }

        let one_time = ecc.random_key()?;
        let shared = ecc.shared_secret(&one_time, other_pubkey)?;
        let signatures = self
            .get_private_keys(selector, None)?
            .iter()
            .map(|wif| ecc.sign(&shared, &ecc.from_wif(wif)?))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SharedSecretSignatures {
            signatures,
            one_time_public: ecc.to_public(&one_time)?,
        })
    }

    pub(super) fn logout(&mut self) -> KeystoreResult<()> {
        let account = [self.account.as_str()];
        let mut removed = 0;
        for store in self.stores() {
            removed += self.ns.remove_prefix(store, &account)?;
        }
        self.detach();
        self.expiration.clear();
        log::info!("logged out {}, removed {removed} entries", self.account);
        Ok(())
    }
}
