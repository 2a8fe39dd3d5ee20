//! # SnapSync Protocol
//!
//! Shared types and wire messages for the SnapSync mirror protocol.
//!
//! This crate defines:
//! - Store and chain identifiers ([`StoreKind`], [`ChainId`])
//! - Snapshot manifests and hash-verified chunks
//! - Deterministic chunk building from serialized records
//! - CBOR-encoded request/response messages for the remote cache
//!
//! ## Key Invariants
//!
//! - Chunks are immutable once created and carry their own SHA-256 hash
//! - A manifest's content hash covers the ordered chunk hashes, so the same
//!   source data always produces the same manifest hash
//! - Chunk identity is (manifest timestamp, sequence index)

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod manifest;
mod messages;
mod types;

pub use error::{ProtocolError, ProtocolResult};
pub use manifest::{build_chunks, Chunk, Record, SnapshotManifest, CONTENT_HASH_LEN};
pub use messages::{
    AckResponse, ChainStatusEntry, ChainStatusResponse, ExistsResponse, FinalizeRequest,
    UploadChunkRequest, UploadManifestRequest, GLOBAL_STORE,
};
pub use types::{ChainId, StoreKind};
