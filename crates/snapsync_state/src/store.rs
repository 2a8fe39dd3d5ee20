//! The infallible sync-state store.

use crate::backend::KeyValueBackend;
use crate::keys;
use snapsync_protocol::{ChainId, StoreKind, CONTENT_HASH_LEN};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::warn;

/// Persisted sync state: dirty flags, cursors, hashes, and chain sets.
///
/// Every operation is synchronous and **never fails**. Backend errors are
/// logged and treated as "no prior state" on reads and as best-effort on
/// writes; the worst outcome of a lost write or read is a redundant full
/// resync, never remote-side data loss.
///
/// There is only ever one active writer (the currently running scheduler
/// instance, enforced by the single-flight guard), so per-key last-writer-
/// wins semantics are sufficient.
#[derive(Clone)]
pub struct SyncStateStore {
    backend: Arc<dyn KeyValueBackend>,
}

impl SyncStateStore {
    /// Creates a state store over the given backend.
    pub fn new(backend: Arc<dyn KeyValueBackend>) -> Self {
        Self { backend }
    }

    /// Returns the dirty flag of every store.
    pub fn dirty_flags(&self) -> BTreeMap<StoreKind, bool> {
        StoreKind::ALL
            .iter()
            .map(|&store| (store, self.dirty_flag(store)))
            .collect()
    }

    /// Returns one store's dirty flag.
    pub fn dirty_flag(&self, store: StoreKind) -> bool {
        self.read(&keys::dirty_flag(store))
            .map(|v| v.first() == Some(&1))
            .unwrap_or(false)
    }

    /// Sets or clears one store's dirty flag.
    pub fn set_dirty_flag(&self, store: StoreKind, dirty: bool) {
        self.write(&keys::dirty_flag(store), &[u8::from(dirty)]);
    }

    /// Returns true if any store is dirty.
    pub fn has_dirty_flags(&self) -> bool {
        StoreKind::ALL.iter().any(|&store| self.dirty_flag(store))
    }

    /// Returns the last key covered by a completed sync of `store`.
    pub fn sync_cursor(&self, store: StoreKind) -> Option<Vec<u8>> {
        self.read(&keys::sync_cursor(store))
    }

    /// Advances a store's sync cursor. Called only after finalize succeeds.
    pub fn set_sync_cursor(&self, store: StoreKind, cursor: &[u8]) {
        self.write(&keys::sync_cursor(store), cursor);
    }

    /// Returns the content hash of the store's last successful export.
    pub fn sync_hash(&self, store: StoreKind) -> Option<[u8; CONTENT_HASH_LEN]> {
        self.read(&keys::sync_hash(store))
            .and_then(|v| v.try_into().ok())
    }

    /// Records the content hash of a store's last successful export.
    pub fn set_sync_hash(&self, store: StoreKind, hash: &[u8; CONTENT_HASH_LEN]) {
        self.write(&keys::sync_hash(store), hash);
    }

    /// Returns an owner's opaque resumable full-snapshot cursor.
    pub fn snapshot_cursor(&self, owner: &str) -> Option<String> {
        self.read(&keys::snapshot_cursor(owner))
            .and_then(|v| String::from_utf8(v).ok())
    }

    /// Persists an owner's resumable full-snapshot cursor.
    pub fn set_snapshot_cursor(&self, owner: &str, cursor: &str) {
        self.write(&keys::snapshot_cursor(owner), cursor.as_bytes());
    }

    /// Removes an owner's resumable full-snapshot cursor.
    pub fn clear_snapshot_cursor(&self, owner: &str) {
        if let Err(e) = self.backend.delete(&keys::snapshot_cursor(owner)) {
            warn!(owner, error = %e, "failed to clear snapshot cursor");
        }
    }

    /// Returns the set of chains an owner has materialized locally.
    pub fn chain_set(&self, owner: &str) -> BTreeSet<ChainId> {
        let Some(bytes) = self.read(&keys::chain_set(owner)) else {
            return BTreeSet::new();
        };
        match ciborium::from_reader::<Vec<u64>, _>(bytes.as_slice()) {
            Ok(ids) => ids.into_iter().map(ChainId).collect(),
            Err(e) => {
                warn!(owner, error = %e, "chain set undecodable, treating as empty");
                BTreeSet::new()
            }
        }
    }

    /// Adds a chain to an owner's materialized set.
    pub fn add_chain(&self, owner: &str, chain: ChainId) {
        let mut chains = self.chain_set(owner);
        if !chains.insert(chain) {
            return;
        }
        let ids: Vec<u64> = chains.iter().map(|c| c.0).collect();
        let mut bytes = Vec::new();
        match ciborium::into_writer(&ids, &mut bytes) {
            Ok(()) => self.write(&keys::chain_set(owner), &bytes),
            Err(e) => warn!(owner, error = %e, "failed to encode chain set"),
        }
    }

    /// Deletes all persisted sync state under the versioned prefix.
    pub fn reset_all(&self) {
        if let Err(e) = self.backend.clear_prefix(keys::PREFIX) {
            warn!(error = %e, "failed to reset sync state");
        }
    }

    fn read(&self, key: &str) -> Option<Vec<u8>> {
        match self.backend.get(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "state read failed, degrading to no prior state");
                None
            }
        }
    }

    fn write(&self, key: &str, value: &[u8]) {
        if let Err(e) = self.backend.put(key, value) {
            warn!(key, error = %e, "state write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{StateError, StateResult};
    use crate::memory::InMemoryBackend;

    fn store() -> SyncStateStore {
        SyncStateStore::new(Arc::new(InMemoryBackend::new()))
    }

    #[test]
    fn dirty_flags_default_clean() {
        let state = store();
        assert!(!state.has_dirty_flags());
        assert!(state.dirty_flags().values().all(|&d| !d));
    }

    #[test]
    fn dirty_flag_set_and_clear() {
        let state = store();
        state.set_dirty_flag(StoreKind::Notes, true);
        assert!(state.dirty_flag(StoreKind::Notes));
        assert!(state.has_dirty_flags());
        assert!(!state.dirty_flag(StoreKind::Artifacts));

        state.set_dirty_flag(StoreKind::Notes, false);
        assert!(!state.has_dirty_flags());
    }

    #[test]
    fn cursor_and_hash_round_trip() {
        let state = store();
        assert_eq!(state.sync_cursor(StoreKind::Commitments), None);
        assert_eq!(state.sync_hash(StoreKind::Commitments), None);

        state.set_sync_cursor(StoreKind::Commitments, b"key-0150");
        state.set_sync_hash(StoreKind::Commitments, &[7u8; CONTENT_HASH_LEN]);

        assert_eq!(
            state.sync_cursor(StoreKind::Commitments),
            Some(b"key-0150".to_vec())
        );
        assert_eq!(
            state.sync_hash(StoreKind::Commitments),
            Some([7u8; CONTENT_HASH_LEN])
        );
    }

    #[test]
    fn snapshot_cursor_lifecycle() {
        let state = store();
        assert_eq!(state.snapshot_cursor("owner-1"), None);

        state.set_snapshot_cursor("owner-1", "b64cursor");
        assert_eq!(state.snapshot_cursor("owner-1").as_deref(), Some("b64cursor"));
        assert_eq!(state.snapshot_cursor("owner-2"), None);

        state.clear_snapshot_cursor("owner-1");
        assert_eq!(state.snapshot_cursor("owner-1"), None);
    }

    #[test]
    fn chain_set_accumulates() {
        let state = store();
        assert!(state.chain_set("owner-1").is_empty());

        state.add_chain("owner-1", ChainId(1));
        state.add_chain("owner-1", ChainId(137));
        state.add_chain("owner-1", ChainId(1));

        let chains = state.chain_set("owner-1");
        assert_eq!(chains.len(), 2);
        assert!(chains.contains(&ChainId(137)));
    }

    #[test]
    fn reset_all_clears_everything() {
        let state = store();
        state.set_dirty_flag(StoreKind::Notes, true);
        state.set_sync_cursor(StoreKind::Notes, b"k");
        state.add_chain("owner-1", ChainId(1));

        state.reset_all();
        assert!(!state.has_dirty_flags());
        assert_eq!(state.sync_cursor(StoreKind::Notes), None);
        assert!(state.chain_set("owner-1").is_empty());
    }

    /// A backend that fails every call, to exercise degradation.
    struct BrokenBackend;

    impl KeyValueBackend for BrokenBackend {
        fn get(&self, _key: &str) -> StateResult<Option<Vec<u8>>> {
            Err(StateError::Corrupted("broken".into()))
        }
        fn put(&self, _key: &str, _value: &[u8]) -> StateResult<()> {
            Err(StateError::Corrupted("broken".into()))
        }
        fn delete(&self, _key: &str) -> StateResult<()> {
            Err(StateError::Corrupted("broken".into()))
        }
        fn keys_with_prefix(&self, _prefix: &str) -> StateResult<Vec<String>> {
            Err(StateError::Corrupted("broken".into()))
        }
        fn clear_prefix(&self, _prefix: &str) -> StateResult<()> {
            Err(StateError::Corrupted("broken".into()))
        }
    }

    #[test]
    fn broken_backend_degrades_instead_of_failing() {
        let state = SyncStateStore::new(Arc::new(BrokenBackend));

        // Reads degrade to "no prior state".
        assert!(!state.dirty_flag(StoreKind::Notes));
        assert_eq!(state.sync_cursor(StoreKind::Notes), None);
        assert_eq!(state.sync_hash(StoreKind::Notes), None);
        assert_eq!(state.snapshot_cursor("owner-1"), None);
        assert!(state.chain_set("owner-1").is_empty());

        // Writes are best-effort and never panic.
        state.set_dirty_flag(StoreKind::Notes, true);
        state.set_sync_cursor(StoreKind::Notes, b"k");
        state.set_sync_hash(StoreKind::Notes, &[0u8; CONTENT_HASH_LEN]);
        state.set_snapshot_cursor("owner-1", "c");
        state.clear_snapshot_cursor("owner-1");
        state.add_chain("owner-1", ChainId(1));
        state.reset_all();
    }
}
