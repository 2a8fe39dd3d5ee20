//! Wire messages exchanged with the remote cache.
//!
//! All bodies are CBOR. Requests are illustrative of the contract the remote
//! side must honor: chunk uploads are hash-verified on receipt, manifests are
//! registered before any chunk is trusted, and finalize is the commit point.

use crate::manifest::{Chunk, SnapshotManifest, CONTENT_HASH_LEN};
use crate::error::{ProtocolError, ProtocolResult};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Store name used for owner-agnostic full-snapshot uploads.
pub const GLOBAL_STORE: &str = "*";

fn encode_cbor<T: Serialize>(value: &T) -> ProtocolResult<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::into_writer(value, &mut out).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    Ok(out)
}

fn decode_cbor<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    ciborium::from_reader(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
}

/// Uploads one hash-verified chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadChunkRequest {
    /// Owner scope, or the global scope for bootstrap snapshots.
    pub owner: String,
    /// Target store name, or [`GLOBAL_STORE`].
    pub store: String,
    /// Manifest timestamp this chunk belongs to.
    pub timestamp_ms: u64,
    /// Zero-based chunk index.
    pub index: u32,
    /// Total chunks declared by the manifest.
    pub total_chunks: u32,
    /// CBOR-encoded record slice.
    pub payload: Vec<u8>,
    /// SHA-256 over the payload; the remote rejects on mismatch.
    pub hash: [u8; CONTENT_HASH_LEN],
}

impl UploadChunkRequest {
    /// Builds an upload request from a chunk.
    pub fn from_chunk(
        owner: impl Into<String>,
        store: impl Into<String>,
        chunk: &Chunk,
        total_chunks: u32,
    ) -> Self {
        Self {
            owner: owner.into(),
            store: store.into(),
            timestamp_ms: chunk.timestamp_ms,
            index: chunk.index,
            total_chunks,
            payload: chunk.payload.clone(),
            hash: chunk.hash,
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode_cbor(bytes)
    }
}

/// Registers a manifest before any of its chunks are trusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadManifestRequest {
    /// Owner scope.
    pub owner: String,
    /// Manifest timestamp; identifies the run.
    pub timestamp_ms: u64,
    /// The manifest being registered.
    pub manifest: SnapshotManifest,
}

impl UploadManifestRequest {
    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode_cbor(bytes)
    }
}

/// Marks a snapshot as complete and queryable.
///
/// Must be the last call of a run; the remote must fail it loudly unless
/// every declared chunk is present and hash-consistent with the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeRequest {
    /// Owner scope.
    pub owner: String,
    /// Store name, or [`GLOBAL_STORE`] for a full snapshot.
    pub store: String,
    /// Manifest timestamp being finalized.
    pub timestamp_ms: u64,
    /// Manifest echo for consistency checking, when available.
    pub manifest: Option<SnapshotManifest>,
}

impl FinalizeRequest {
    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode_cbor(bytes)
    }
}

/// Generic success/failure acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckResponse {
    /// Whether the request was accepted.
    pub success: bool,
    /// Rejection reason, if any.
    #[serde(default)]
    pub error: Option<String>,
}

impl AckResponse {
    /// Creates a success acknowledgement.
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    /// Creates a rejection with a reason.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(reason.into()),
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode_cbor(bytes)
    }
}

/// Boolean-equivalent result of an existence probe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistsResponse {
    /// Whether the probed resource exists.
    #[serde(default)]
    pub exists: bool,
}

impl ExistsResponse {
    /// Creates a response.
    pub fn new(exists: bool) -> Self {
        Self { exists }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode_cbor(bytes)
    }
}

/// Per-chain mirror status reported by the remote metadata endpoint.
///
/// The chain id is a string on the wire because remote metadata mixes hex
/// and decimal encodings; consumers normalize with
/// [`ChainId::parse_lenient`](crate::ChainId::parse_lenient). Missing fields
/// decode to their conservative defaults rather than failing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainStatusEntry {
    /// Chain id, hex or decimal encoded.
    #[serde(default)]
    pub chain_id: String,
    /// True if a full mirror exists for this chain and owner.
    #[serde(default)]
    pub hydrated: bool,
    /// True if the chain has been scanned by this owner.
    #[serde(default)]
    pub scanned: bool,
}

/// Remote metadata listing per-chain status for one owner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainStatusResponse {
    /// Known chain entries; may be empty.
    #[serde(default)]
    pub chains: Vec<ChainStatusEntry>,
}

impl ChainStatusResponse {
    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode_cbor(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{build_chunks, Record};

    #[test]
    fn chunk_request_round_trip() {
        let records = vec![Record::new(b"k".to_vec(), b"v".to_vec())];
        let chunks = build_chunks(99, &records, 1024).unwrap();
        let request = UploadChunkRequest::from_chunk("owner-1", "notes", &chunks[0], 1);

        let bytes = request.encode().unwrap();
        let decoded = UploadChunkRequest::decode(&bytes).unwrap();
        assert_eq!(decoded, request);
        assert_eq!(decoded.timestamp_ms, 99);
        assert_eq!(decoded.total_chunks, 1);
    }

    #[test]
    fn manifest_request_round_trip() {
        let manifest = SnapshotManifest::for_chunks(5, 0, &[]);
        let request = UploadManifestRequest {
            owner: "owner-1".into(),
            timestamp_ms: 5,
            manifest,
        };
        let decoded = UploadManifestRequest::decode(&request.encode().unwrap()).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn finalize_request_global_store() {
        let request = FinalizeRequest {
            owner: "global".into(),
            store: GLOBAL_STORE.into(),
            timestamp_ms: 5,
            manifest: None,
        };
        let decoded = FinalizeRequest::decode(&request.encode().unwrap()).unwrap();
        assert_eq!(decoded.store, "*");
    }

    #[test]
    fn ack_round_trip() {
        let ok = AckResponse::ok();
        assert!(AckResponse::decode(&ok.encode().unwrap()).unwrap().success);

        let rejected = AckResponse::rejected("hash mismatch");
        let decoded = AckResponse::decode(&rejected.encode().unwrap()).unwrap();
        assert!(!decoded.success);
        assert_eq!(decoded.error.as_deref(), Some("hash mismatch"));
    }

    #[test]
    fn chain_status_tolerates_missing_fields() {
        // An empty CBOR map decodes to all defaults.
        let mut bytes = Vec::new();
        ciborium::into_writer(
            &std::collections::BTreeMap::<String, bool>::new(),
            &mut bytes,
        )
        .unwrap();
        let decoded = ChainStatusResponse::decode(&bytes).unwrap();
        assert!(decoded.chains.is_empty());
    }

    #[test]
    fn chain_status_round_trip() {
        let response = ChainStatusResponse {
            chains: vec![
                ChainStatusEntry {
                    chain_id: "0x89".into(),
                    hydrated: true,
                    scanned: true,
                },
                ChainStatusEntry {
                    chain_id: "1".into(),
                    hydrated: false,
                    scanned: true,
                },
            ],
        };
        let decoded = ChainStatusResponse::decode(&response.encode().unwrap()).unwrap();
        assert_eq!(decoded, response);
    }
}
