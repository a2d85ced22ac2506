//! Composite keys with prefix scans.
//!
//! A composite key is a list of string parts under a namespace. It is encoded
//! as the hex of its JSON array form without the surrounding brackets:
//!
//! ```text
//! ("kstor", ["alice", "kpath"])  ->  hex("\"kstor\",\"alice\",\"kpath\"")
//! ```
//!
//! Dropping the closing bracket makes the encoding of `[a]` a strict prefix of
//! the encoding of `[a, b]`, and the closing quote of each part keeps `[a]`
//! from prefixing `[ab]`. Hex keeps the result safe for any substrate.
//!
//! Values are stored as JSON (`null` or a string) so a placeholder can be told
//! apart from a missing entry.

use std::ops::ControlFlow;

use crate::platform::KeyValueStore;

use super::error::{StorageError, StorageResult};

/// Write policy for [`Namespace::save`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOptions {
    /// Refuse to replace an existing non-null value with a different one.
    pub immutable: bool,
    /// Allow a `None` write to erase an existing value. When `false` the
    /// existing value is kept.
    pub clobber: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            immutable: true,
            clobber: true,
        }
    }
}

/// Encoder and accessor for one storage namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    name: String,
}

impl Namespace {
    /// Creates a namespace.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Encodes `parts` under this namespace.
    #[must_use]
    pub fn encode_key<S: AsRef<str>>(&self, parts: &[S]) -> String {
        let mut elements = Vec::with_capacity(parts.len() + 1);
        elements.push(self.name.as_str());
        elements.extend(parts.iter().map(AsRef::as_ref));

        // Serializing a list of strings cannot fail.
        let json = serde_json::to_string(&elements).unwrap_or_default();
        let trimmed = json
            .strip_prefix('[')
            .and_then(|json| json.strip_suffix(']'))
            .unwrap_or(&json);
        hex::encode(trimmed)
    }

    /// Decodes an encoded key back into its parts, namespace excluded.
    /// Returns `None` for keys of other namespaces or foreign formats.
    #[must_use]
    pub fn decode_key(&self, key: &str) -> Option<Vec<String>> {
        let bytes = hex::decode(key).ok()?;
        let json = String::from_utf8(bytes).ok()?;
        let mut elements: Vec<String> = serde_json::from_str(&format!("[{json}]")).ok()?;
        if elements.first() != Some(&self.name) {
            return None;
        }
        elements.remove(0);
        Some(elements)
    }

    /// Writes `value` under the encoded `key`.
    ///
    /// Returns `true` (dirty) if the substrate changed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Immutable`] when `options.immutable` is set and
    /// an existing non-null value differs from the value to write.
    pub fn save(
        &self,
        store: &dyn KeyValueStore,
        key: &str,
        value: Option<&str>,
        options: SaveOptions,
    ) -> StorageResult<bool> {
        let raw = store.get(key)?;
        let present = raw.is_some();
        let existing = raw.as_deref().map(decode_value).transpose()?.flatten();

        let value = match (value, &existing) {
            (None, Some(existing)) if !options.clobber => Some(existing.as_str()),
            _ => value,
        };

        let changed = existing.as_deref() != value;
        if existing.is_some() && changed && options.immutable {
            return Err(StorageError::Immutable {
                key: key.to_string(),
            });
        }

        let dirty = !present || changed;
        if dirty {
            store.set(key, &encode_value(value)?)?;
        }
        Ok(dirty)
    }

    /// Reads the value under the encoded `key`. Missing entries and null
    /// placeholders both read as `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the substrate fails or the value is malformed.
    pub fn get(&self, store: &dyn KeyValueStore, key: &str) -> StorageResult<Option<String>> {
        Ok(store
            .get(key)?
            .as_deref()
            .map(decode_value)
            .transpose()?
            .flatten())
    }

    /// Visits every entry whose key starts with the encoding of `prefix`,
    /// in key order, passing the key parts after `prefix` and the value.
    /// Stops early when `visit` breaks.
    ///
    /// The key set is snapshotted first, so `visit` may not observe writes it
    /// makes itself, and the traversal always terminates.
    ///
    /// # Errors
    ///
    /// Returns an error if the substrate fails or a value is malformed.
    pub fn query<S, F>(&self, store: &dyn KeyValueStore, prefix: &[S], mut visit: F) -> StorageResult<()>
    where
        S: AsRef<str>,
        F: FnMut(&[String], Option<String>) -> ControlFlow<()>,
    {
        for (key, parts) in self.scan(store, prefix)? {
            let Some(raw) = store.get(&key)? else {
                continue;
            };
            let value = decode_value(&raw)?;
            if visit(&parts[prefix.len()..], value).is_break() {
                break;
            }
        }
        Ok(())
    }

    /// Lists `(encoded key, decoded parts)` for every entry under `prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if the substrate cannot be enumerated.
    pub fn scan<S: AsRef<str>>(
        &self,
        store: &dyn KeyValueStore,
        prefix: &[S],
    ) -> StorageResult<Vec<(String, Vec<String>)>> {
        let encoded = self.encode_key(prefix);
        let mut keys: Vec<String> = store
            .keys()?
            .into_iter()
            .filter(|key| key.starts_with(&encoded))
            .collect();
        keys.sort();

        Ok(keys
            .into_iter()
            .filter_map(|key| {
                let parts = self.decode_key(&key)?;
                (parts.len() >= prefix.len()).then_some((key, parts))
            })
            .collect())
    }

    /// Deletes every entry under `prefix`. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the substrate fails.
    pub fn remove_prefix<S: AsRef<str>>(
        &self,
        store: &dyn KeyValueStore,
        prefix: &[S],
    ) -> StorageResult<usize> {
        let entries = self.scan(store, prefix)?;
        for (key, _) in &entries {
            store.remove(key)?;
        }
        Ok(entries.len())
    }
}

fn encode_value(value: Option<&str>) -> StorageResult<String> {
    serde_json::to_string(&value).map_err(|err| StorageError::Serialization(err.to_string()))
}

fn decode_value(raw: &str) -> StorageResult<Option<String>> {
    serde_json::from_str(raw).map_err(|err| StorageError::Serialization(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MemoryStore;

    #[test]
    fn test_encoded_prefix_property() {
        let ns = Namespace::new("kstor");
        let short = ns.encode_key(&["alice"]);
        let long = ns.encode_key(&["alice", "kpath"]);
        let sibling = ns.encode_key(&["alice2", "kpath"]);

        assert!(long.starts_with(&short));
        assert!(!sibling.starts_with(&short));
        assert!(ns.encode_key::<&str>(&[]).len() < short.len());
        assert_eq!(ns.decode_key(&long), Some(vec!["alice".to_string(), "kpath".to_string()]));
        assert_eq!(Namespace::new("other").decode_key(&long), None);
        assert_eq!(ns.decode_key("zz"), None);
    }

    #[test]
    fn test_save_dirty_and_idempotent() {
        let ns = Namespace::new("kstor");
        let store = MemoryStore::new();
        let key = ns.encode_key(&["a"]);

        assert!(ns.save(&store, &key, Some("v"), SaveOptions::default()).expect("save"));
        assert!(!ns.save(&store, &key, Some("v"), SaveOptions::default()).expect("save"));
        assert_eq!(ns.get(&store, &key).expect("get"), Some("v".to_string()));
    }

    #[test]
    fn test_save_immutable() {
        let ns = Namespace::new("kstor");
        let store = MemoryStore::new();
        let key = ns.encode_key(&["a"]);

        ns.save(&store, &key, Some("v"), SaveOptions::default()).expect("save");
        let err = ns
            .save(&store, &key, Some("w"), SaveOptions::default())
            .expect_err("immutable");
        assert!(matches!(err, StorageError::Immutable { .. }));

        let mutable = SaveOptions {
            immutable: false,
            clobber: true,
        };
        assert!(ns.save(&store, &key, Some("w"), mutable).expect("save"));
        assert_eq!(ns.get(&store, &key).expect("get"), Some("w".to_string()));
    }

    #[test]
    fn test_placeholder_fill_and_no_clobber() {
        let ns = Namespace::new("kstor");
        let store = MemoryStore::new();
        let key = ns.encode_key(&["a"]);
        let keep = SaveOptions {
            immutable: true,
            clobber: false,
        };

        // A null placeholder is a new entry.
        assert!(ns.save(&store, &key, None, keep).expect("save"));
        assert!(store.get(&key).expect("raw").is_some());
        assert_eq!(ns.get(&store, &key).expect("get"), None);

        // Filling the placeholder is allowed even when immutable.
        assert!(ns.save(&store, &key, Some("secret"), keep).expect("save"));

        // A null write without clobber keeps the secret.
        assert!(!ns.save(&store, &key, None, keep).expect("save"));
        assert_eq!(ns.get(&store, &key).expect("get"), Some("secret".to_string()));
    }

    #[test]
    fn test_query_prefix_and_early_stop() {
        let ns = Namespace::new("kstor");
        let store = MemoryStore::new();
        for (path, value) in [("active", Some("w1")), ("owner", None), ("active/x", Some("w2"))] {
            let key = ns.encode_key(&["alice", "kpath", path, "pub"]);
            ns.save(&store, &key, value, SaveOptions::default()).expect("save");
        }
        let other = ns.encode_key(&["bob", "kpath", "active", "pub"]);
        ns.save(&store, &other, Some("w3"), SaveOptions::default()).expect("save");

        let mut seen = Vec::new();
        ns.query(&store, &["alice", "kpath"], |suffix, value| {
            seen.push((suffix[0].clone(), value));
            ControlFlow::Continue(())
        })
        .expect("query");
        assert_eq!(seen.len(), 3);
        assert!(seen.contains(&("owner".to_string(), None)));

        let mut visits = 0;
        ns.query(&store, &["alice"], |_, _| {
            visits += 1;
            ControlFlow::Break(())
        })
        .expect("query");
        assert_eq!(visits, 1);

        assert_eq!(ns.remove_prefix(&store, &["alice"]).expect("remove"), 3);
        assert_eq!(store.len(), 1);
    }
}
