//! File-based key-value backend.

use crate::backend::KeyValueBackend;
use crate::error::{StateError, StateResult};
use fs2::FileExt;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// A durable key-value backend persisting to a single CBOR file.
///
/// The whole map is rewritten through a temp file and an atomic rename on
/// every mutation. The state is small per-store metadata (flags, cursors,
/// hashes), so whole-map rewrites stay cheap and keep the on-disk image
/// consistent at every instant.
///
/// # Locking
///
/// An advisory `fs2` exclusive lock is taken on a sibling `.lock` file for
/// the lifetime of the backend, so two processes cannot mirror from the same
/// state directory.
///
/// # Corruption
///
/// An unreadable or undecodable state file degrades to an empty map (with a
/// warning); the engine then performs a full resync. Local state is always
/// recoverable from the source, so this loses no data.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    // Held for its lock; never read or written after open.
    _lock_file: File,
    map: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl FileBackend {
    /// Opens or creates a file backend at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be acquired or the directory is
    /// not writable. A corrupt state file is not an error.
    pub fn open(path: &Path) -> StateResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let lock_path = path.with_extension("lock");
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        lock_file
            .try_lock_exclusive()
            .map_err(|e| StateError::Locked(format!("{}: {e}", lock_path.display())))?;

        let map = match fs::read(path) {
            Ok(bytes) => match ciborium::from_reader(bytes.as_slice()) {
                Ok(map) => map,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e,
                        "state file undecodable, starting from empty state");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e,
                    "state file unreadable, starting from empty state");
                BTreeMap::new()
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
            map: Mutex::new(map),
        })
    }

    /// Returns the path of the state file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, map: &BTreeMap<String, Vec<u8>>) -> StateResult<()> {
        let mut bytes = Vec::new();
        ciborium::into_writer(map, &mut bytes).map_err(|e| StateError::Encode(e.to_string()))?;

        let tmp_path = self.path.with_extension("tmp");
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(&bytes)?;
        tmp.sync_all()?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl KeyValueBackend for FileBackend {
    fn get(&self, key: &str) -> StateResult<Option<Vec<u8>>> {
        Ok(self.map.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> StateResult<()> {
        let mut map = self.map.lock();
        map.insert(key.to_string(), value.to_vec());
        self.persist(&map)
    }

    fn delete(&self, key: &str) -> StateResult<()> {
        let mut map = self.map.lock();
        if map.remove(key).is_some() {
            self.persist(&map)?;
        }
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> StateResult<Vec<String>> {
        Ok(self
            .map
            .lock()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn clear_prefix(&self, prefix: &str) -> StateResult<()> {
        let mut map = self.map.lock();
        let before = map.len();
        map.retain(|k, _| !k.starts_with(prefix));
        if map.len() != before {
            self.persist(&map)?;
        }
        Ok(())
    }
}
