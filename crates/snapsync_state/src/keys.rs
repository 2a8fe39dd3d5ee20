//! Persisted key layout.
//!
//! Every key lives under one versioned prefix so that a full reset is a
//! single prefix delete and a future layout change can migrate by bumping
//! the version.

use snapsync_protocol::StoreKind;

/// Versioned namespace prefix for all persisted sync state.
pub const PREFIX: &str = "ss1/";

/// Key of a store's dirty flag.
pub fn dirty_flag(store: StoreKind) -> String {
    format!("{PREFIX}dirty/{store}")
}

/// Key of a store's sync cursor (last key covered by a completed sync).
pub fn sync_cursor(store: StoreKind) -> String {
    format!("{PREFIX}cursor/{store}")
}

/// Key of a store's last successful manifest content hash.
pub fn sync_hash(store: StoreKind) -> String {
    format!("{PREFIX}hash/{store}")
}

/// Key of an owner's resumable full-snapshot cursor.
pub fn snapshot_cursor(owner: &str) -> String {
    format!("{PREFIX}snapcursor/{owner}")
}

/// Key of an owner's materialized chain set.
pub fn chain_set(owner: &str) -> String {
    format!("{PREFIX}chains/{owner}")
}
