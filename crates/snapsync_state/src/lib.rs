//! # SnapSync State
//!
//! Persisted local sync state for SnapSync: per-store dirty flags, sync
//! cursors, and content hashes, plus per-owner snapshot-resume cursors and
//! chain sets.
//!
//! This crate provides:
//! - [`KeyValueBackend`] - the persistence seam
//! - [`InMemoryBackend`] - for tests and ephemeral use
//! - [`FileBackend`] - durable single-file persistence with advisory locking
//! - [`SyncStateStore`] - the infallible sync-state API
//!
//! ## Key Invariants
//!
//! - Writes are synchronous and durable before the call returns
//! - [`SyncStateStore`] never fails: backend errors are logged and reads
//!   degrade to "no prior state", forcing a full resync rather than an error
//! - All keys live under one versioned prefix so a full reset is a single
//!   prefix delete

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
pub mod keys;
mod memory;
mod store;

pub use backend::KeyValueBackend;
pub use error::{StateError, StateResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
pub use store::SyncStateStore;
