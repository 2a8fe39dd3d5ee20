//! In-memory key-value backend for testing.

use crate::backend::KeyValueBackend;
use crate::error::StateResult;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// An in-memory key-value backend.
///
/// Suitable for unit tests, integration tests, and ephemeral engines that do
/// not need sync state to survive a restart.
///
/// # Thread Safety
///
/// Thread-safe; the map is guarded by a single `RwLock`.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    map: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored keys.
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    /// Returns true if no keys are stored.
    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

impl KeyValueBackend for InMemoryBackend {
    fn get(&self, key: &str) -> StateResult<Option<Vec<u8>>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> StateResult<()> {
        self.map.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> StateResult<()> {
        self.map.write().remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> StateResult<Vec<String>> {
        Ok(self
            .map
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn clear_prefix(&self, prefix: &str) -> StateResult<()> {
        self.map.write().retain(|k, _| !k.starts_with(prefix));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.get("a").unwrap(), None);

        backend.put("a", b"1").unwrap();
        assert_eq!(backend.get("a").unwrap(), Some(b"1".to_vec()));

        backend.put("a", b"2").unwrap();
        assert_eq!(backend.get("a").unwrap(), Some(b"2".to_vec()));

        backend.delete("a").unwrap();
        assert_eq!(backend.get("a").unwrap(), None);

        // Deleting a missing key is fine.
        backend.delete("a").unwrap();
    }

    #[test]
    fn prefix_scan_is_ordered() {
        let backend = InMemoryBackend::new();
        backend.put("p/b", b"").unwrap();
        backend.put("p/a", b"").unwrap();
        backend.put("q/c", b"").unwrap();

        let keys = backend.keys_with_prefix("p/").unwrap();
        assert_eq!(keys, vec!["p/a".to_string(), "p/b".to_string()]);
    }

    #[test]
    fn clear_prefix_leaves_other_keys() {
        let backend = InMemoryBackend::new();
        backend.put("p/a", b"").unwrap();
        backend.put("p/b", b"").unwrap();
        backend.put("q/c", b"").unwrap();

        backend.clear_prefix("p/").unwrap();
        assert_eq!(backend.len(), 1);
        assert_eq!(backend.get("q/c").unwrap(), Some(Vec::new()));
    }
}
