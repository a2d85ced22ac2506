use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::rules::LocationPatterns;

const SECONDS_PER_MINUTE: u64 = 60;

/// Key store configuration.
///
/// Deserializes from the camelCase JSON shape hosts already use:
///
/// ```json
/// {
///   "uriRules": { "active": ".*", "active/**": ".*" },
///   "timeoutInMin": 10,
///   "timeoutKeyPaths": ["owner", "owner/**"],
///   "keepPublicKeys": true
/// }
/// ```
///
/// Missing fields take their defaults. A `null` timeout disables expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KeystoreConfig {
    /// Key path glob to the locations where matching keys may be resident.
    pub uri_rules: BTreeMap<String, LocationPatterns>,
    /// Idle minutes before keys matching `timeout_key_paths` are purged.
    #[serde(alias = "timeoutInMin")]
    pub timeout_in_minutes: Option<u64>,
    /// Key path globs purged on expiry.
    pub timeout_key_paths: Vec<String>,
    /// Keep public keys (with the private key nulled) when keys are removed
    /// by navigation, expiry or [`remove_keys`](super::Keystore::remove_keys).
    pub keep_public_keys: bool,
    /// Allow the `active` key itself to be saved to persistent storage.
    pub persist_active: bool,
}

impl Default for KeystoreConfig {
    fn default() -> Self {
        Self {
            uri_rules: BTreeMap::from([
                ("active".to_string(), LocationPatterns::from(".*")),
                ("active/**".to_string(), LocationPatterns::from(".*")),
            ]),
            timeout_in_minutes: Some(10),
            timeout_key_paths: vec!["owner".to_string(), "owner/**".to_string()],
            keep_public_keys: true,
            persist_active: true,
        }
    }
}

impl KeystoreConfig {
    /// Replaces the access rules.
    #[must_use]
    pub fn with_uri_rules<K, V>(mut self, rules: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<LocationPatterns>,
    {
        self.uri_rules = rules
            .into_iter()
            .map(|(key, patterns)| (key.into(), patterns.into()))
            .collect();
        self
    }

    /// Sets the idle timeout; `None` disables expiry.
    #[must_use]
    pub const fn with_timeout_in_minutes(mut self, minutes: Option<u64>) -> Self {
        self.timeout_in_minutes = minutes;
        self
    }

    /// The idle timeout as a duration.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_in_minutes
            .map(|minutes| Duration::from_secs(minutes.saturating_mul(SECONDS_PER_MINUTE)))
    }
}
