//! Snapshot manifests, chunks, and deterministic chunk building.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Length in bytes of chunk and manifest content hashes (SHA-256).
pub const CONTENT_HASH_LEN: usize = 32;

/// One serialized source record: an opaque key/value pair.
///
/// Keys follow the source store's iteration order; the exporter relies on
/// that order being stable across calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Record key, in source iteration order.
    pub key: Vec<u8>,
    /// Serialized record body.
    pub value: Vec<u8>,
}

impl Record {
    /// Creates a record.
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// An ordered, size-bounded slice of a manifest's serialized records.
///
/// Identity is (manifest timestamp, sequence index). Chunks are never
/// mutated after creation; the hash is computed once over the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Timestamp of the manifest this chunk belongs to, in Unix millis.
    pub timestamp_ms: u64,
    /// Zero-based sequence index within the manifest.
    pub index: u32,
    /// CBOR-encoded record slice.
    pub payload: Vec<u8>,
    /// SHA-256 over the payload.
    pub hash: [u8; CONTENT_HASH_LEN],
}

impl Chunk {
    /// Creates a chunk, hashing the payload.
    pub fn new(timestamp_ms: u64, index: u32, payload: Vec<u8>) -> Self {
        let hash = hash_bytes(&payload);
        Self {
            timestamp_ms,
            index,
            payload,
            hash,
        }
    }

    /// Returns true if the stored hash matches the payload.
    pub fn verify(&self) -> bool {
        hash_bytes(&self.payload) == self.hash
    }

    /// Decodes the records carried by this chunk.
    pub fn records(&self) -> ProtocolResult<Vec<Record>> {
        ciborium::from_reader(self.payload.as_slice())
            .map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}

/// Metadata describing one completed or in-flight snapshot export.
///
/// A manifest is created when an export starts and becomes immutable once
/// every chunk it declares has been confirmed uploaded (the finalize step).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotManifest {
    /// Export timestamp in Unix millis; identifies the run on the remote.
    pub timestamp_ms: u64,
    /// Number of records covered.
    pub record_count: u64,
    /// Total payload bytes across all chunks.
    pub total_bytes: u64,
    /// Number of chunks declared.
    pub chunk_count: u32,
    /// SHA-256 over the ordered chunk hashes.
    pub content_hash: [u8; CONTENT_HASH_LEN],
    /// True for the owner-agnostic bootstrap snapshot.
    pub global_bootstrap: bool,
    /// Producer identity, set on bootstrap exports.
    pub producer: Option<String>,
}

impl SnapshotManifest {
    /// Builds a manifest over an ordered chunk sequence.
    pub fn for_chunks(timestamp_ms: u64, record_count: u64, chunks: &[Chunk]) -> Self {
        let total_bytes = chunks.iter().map(|c| c.payload.len() as u64).sum();
        let hashes: Vec<[u8; CONTENT_HASH_LEN]> = chunks.iter().map(|c| c.hash).collect();
        Self::from_chunk_hashes(timestamp_ms, record_count, total_bytes, &hashes)
    }

    /// Builds a manifest from already-known chunk hashes.
    ///
    /// Used when an interrupted upload resumes: the earlier chunks are no
    /// longer in memory, only their hashes survive in the resume cursor.
    pub fn from_chunk_hashes(
        timestamp_ms: u64,
        record_count: u64,
        total_bytes: u64,
        chunk_hashes: &[[u8; CONTENT_HASH_LEN]],
    ) -> Self {
        let mut hasher = Sha256::new();
        for hash in chunk_hashes {
            hasher.update(hash);
        }
        Self {
            timestamp_ms,
            record_count,
            total_bytes,
            chunk_count: chunk_hashes.len() as u32,
            content_hash: hasher.finalize().into(),
            global_bootstrap: false,
            producer: None,
        }
    }

    /// Marks this manifest as the global bootstrap snapshot for `producer`.
    pub fn into_bootstrap(mut self, producer: impl Into<String>) -> Self {
        self.global_bootstrap = true;
        self.producer = Some(producer.into());
        self
    }

    /// Checks the given chunks against this manifest's declaration.
    pub fn matches_chunks(&self, chunks: &[Chunk]) -> bool {
        if chunks.len() as u32 != self.chunk_count {
            return false;
        }
        let mut hasher = Sha256::new();
        for chunk in chunks {
            hasher.update(chunk.hash);
        }
        let digest: [u8; CONTENT_HASH_LEN] = hasher.finalize().into();
        digest == self.content_hash
    }
}

/// Partitions records into size-bounded chunks.
///
/// Packing is greedy over the CBOR-encoded size of each record, so the same
/// record sequence always produces the same chunk boundaries and hashes. A
/// single record larger than `max_chunk_bytes` still becomes its own chunk;
/// the bound is a packing target, not a hard limit.
pub fn build_chunks(
    timestamp_ms: u64,
    records: &[Record],
    max_chunk_bytes: usize,
) -> ProtocolResult<Vec<Chunk>> {
    fn flush<'a>(
        timestamp_ms: u64,
        batch: &mut Vec<&'a Record>,
        chunks: &mut Vec<Chunk>,
    ) -> ProtocolResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut payload = Vec::new();
        ciborium::into_writer(&batch, &mut payload)
            .map_err(|e| ProtocolError::Encode(e.to_string()))?;
        chunks.push(Chunk::new(timestamp_ms, chunks.len() as u32, payload));
        batch.clear();
        Ok(())
    }

    let mut chunks = Vec::new();
    let mut batch: Vec<&Record> = Vec::new();
    let mut batch_bytes = 0usize;

    for record in records {
        // 2 length headers plus the raw bytes approximates the encoded size
        // closely enough for stable packing.
        let record_bytes = record.key.len() + record.value.len() + 16;
        if !batch.is_empty() && batch_bytes + record_bytes > max_chunk_bytes {
            flush(timestamp_ms, &mut batch, &mut chunks)?;
            batch_bytes = 0;
        }
        batch.push(record);
        batch_bytes += record_bytes;
    }
    flush(timestamp_ms, &mut batch, &mut chunks)?;

    Ok(chunks)
}

fn hash_bytes(bytes: &[u8]) -> [u8; CONTENT_HASH_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}
