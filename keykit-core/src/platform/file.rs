//! JSON file backed persistent substrate.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::storage::{StorageError, StorageResult};

use super::KeyValueStore;

/// Persistent key-value substrate stored as one JSON object on disk.
///
/// Entries are cached in memory and every mutation rewrites the file
/// atomically:
/// 1. Write the full map to `{name}.tmp`
/// 2. `fsync` the temporary file
/// 3. Rename it over the target
///
/// The file is therefore always either the complete old content or the
/// complete new content.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Opens (or lazily creates) the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|err| StorageError::Serialization(err.to_string()))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(StorageError::Backend(format!("read {}: {err}", path.display()))),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Location of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> StorageResult<()> {
        let backend = |err: std::io::Error| {
            StorageError::Backend(format!("write {}: {err}", self.path.display()))
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(backend)?;
        }
        let bytes = serde_json::to_vec(entries)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let mut file = File::create(&tmp).map_err(backend)?;
        file.write_all(&bytes).map_err(backend)?;
        file.sync_all().map_err(backend)?;
        fs::rename(&tmp, &self.path).map_err(backend)
    }

    fn mutate(&self, apply: impl FnOnce(&mut BTreeMap<String, String>) -> bool) -> StorageResult<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_: PoisonError<_>| StorageError::Lock("mutex poisoned".to_string()))?;
        if apply(&mut entries) {
            self.persist(&entries)?;
        }
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| StorageError::Lock("mutex poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.mutate(|entries| {
            entries.insert(key.to_string(), value.to_string()).as_deref() != Some(value)
        })
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.mutate(|entries| entries.remove(key).is_some())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| StorageError::Lock("mutex poisoned".to_string()))?;
        Ok(entries.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("keys.json");

        let store = FileStore::open(&path).expect("open");
        assert!(store.keys().expect("keys").is_empty());
        store.set("a", "1").expect("set");
        store.set("b", "null").expect("set");
        store.remove("a").expect("remove");

        let reopened = FileStore::open(&path).expect("reopen");
        assert_eq!(reopened.keys().expect("keys"), vec!["b"]);
        assert_eq!(reopened.get("b").expect("get"), Some("null".to_string()));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("keys.json");
        fs::write(&path, b"not json").expect("write");

        assert!(matches!(
            FileStore::open(&path),
            Err(StorageError::Serialization(_))
        ));
    }
}
