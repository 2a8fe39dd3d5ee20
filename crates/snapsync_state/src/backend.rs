//! Key-value backend trait definition.

use crate::error::StateResult;

/// A flat key-value store for sync-state persistence.
///
/// Backends are **opaque byte stores** over string keys. The state layout
/// (which keys exist and what they mean) is owned by
/// [`crate::SyncStateStore`] and the [`crate::keys`] module; backends do not
/// interpret keys beyond prefix matching.
///
/// # Invariants
///
/// - `put` is durable before it returns (no write buffering)
/// - `keys_with_prefix` returns keys in lexicographic order
/// - Backends must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`crate::InMemoryBackend`] - for testing
/// - [`crate::FileBackend`] - for persistent storage
pub trait KeyValueBackend: Send + Sync {
    /// Reads the value stored at `key`, if any.
    fn get(&self, key: &str) -> StateResult<Option<Vec<u8>>>;

    /// Stores `value` at `key`, replacing any previous value.
    fn put(&self, key: &str, value: &[u8]) -> StateResult<()>;

    /// Removes the value at `key`; removing a missing key is not an error.
    fn delete(&self, key: &str) -> StateResult<()>;

    /// Returns all keys starting with `prefix`, in lexicographic order.
    fn keys_with_prefix(&self, prefix: &str) -> StateResult<Vec<String>>;

    /// Removes every key starting with `prefix`.
    fn clear_prefix(&self, prefix: &str) -> StateResult<()>;
}
