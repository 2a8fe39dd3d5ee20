//! # SnapSync Engine
//!
//! Incremental snapshot mirror engine for SnapSync.
//!
//! This crate provides:
//! - Dirty-store tracking with debounced, rate-limited sync triggering
//! - Chunked, hash-verified delta export per store
//! - Single-flight sync scheduling with cooperative cancellation
//! - Periodic full-snapshot bootstrap publication with resumable uploads
//! - Chain discovery and remote hydration checks
//! - HTTP transport abstraction
//!
//! ## Architecture
//!
//! The engine implements an **export-then-finalize** mirror model:
//! 1. Changed stores are marked dirty and a debounced run is armed
//! 2. Each dirty store exports its delta as hash-addressed chunks
//! 3. Chunks upload under a manifest; finalize commits them remotely
//! 4. Only after finalize does local state (cursor, hash, flag) advance
//!
//! ## Key Invariants
//!
//! - At most one sync or bootstrap run is active at a time
//! - A full bootstrap snapshot is authoritative over in-flight deltas
//! - Local sync state never advances past what the remote confirmed
//! - Chunk packing is deterministic, so re-exports are idempotent

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bootstrap;
mod cancel;
mod chains;
mod clock;
mod config;
mod error;
mod export;
mod http;
mod hydration;
mod scheduler;
mod source;
mod transport;
mod trigger;

pub use bootstrap::{BootstrapCoordinator, BootstrapOutcome, BootstrapStats};
pub use cancel::CancelToken;
pub use chains::{sort_chains_by_priority, ChainManager, ChainScanStatus, KNOWN_CHAINS};
pub use clock::{unix_timestamp_ms, Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, GLOBAL_SCOPE};
pub use error::{EngineError, EngineResult};
pub use export::{DeltaExport, ExportedChunk, FullExport, SnapshotExporter};
pub use http::{HttpCacheTransport, HttpClient};
pub use hydration::{HydrationChecker, HydrationStatus};
pub use scheduler::{ExclusiveRun, SyncOutcome, SyncScheduler, SyncStats};
pub use source::{MemoryRecordSource, RecordSource};
pub use transport::{CacheTransport, FinalizedSnapshot, MemoryCache};
pub use trigger::{ChangeTrigger, DebounceState};
