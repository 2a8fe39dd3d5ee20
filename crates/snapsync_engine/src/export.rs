//! Snapshot export: delta reads and resumable full snapshots.

use crate::cancel::CancelToken;
use crate::clock::unix_timestamp_ms;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::source::RecordSource;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use snapsync_protocol::{
    build_chunks, Chunk, Record, SnapshotManifest, StoreKind, CONTENT_HASH_LEN,
};
use snapsync_state::SyncStateStore;
use std::sync::Arc;
use tracing::{debug, warn};

/// A delta export of one store, read from its persisted sync cursor.
#[derive(Debug, Clone)]
pub struct DeltaExport {
    /// The exported store.
    pub store: StoreKind,
    /// Manifest covering the delta.
    pub manifest: SnapshotManifest,
    /// Chunks in upload order.
    pub chunks: Vec<Chunk>,
    /// Last source key included; becomes the new sync cursor on finalize.
    pub last_key: Vec<u8>,
    /// Number of records in the delta.
    pub record_count: u64,
}

/// One chunk of a full export, paired with the resume checkpoint that
/// becomes valid once this chunk is confirmed uploaded.
#[derive(Debug, Clone)]
pub struct ExportedChunk {
    /// The chunk to upload.
    pub chunk: Chunk,
    /// Opaque cursor describing progress through this chunk inclusive.
    pub checkpoint: String,
}

/// A full snapshot export across all stores.
///
/// When resuming an interrupted upload, `chunks` holds only the remaining
/// chunks; the manifest still covers the whole snapshot, previously uploaded
/// chunks included.
#[derive(Debug, Clone)]
pub struct FullExport {
    /// Snapshot timestamp; stable across resumed uploads of the same run.
    pub timestamp_ms: u64,
    /// Manifest covering the complete snapshot.
    pub manifest: SnapshotManifest,
    /// Remaining chunks to upload, in order.
    pub chunks: Vec<ExportedChunk>,
    /// Total records across the complete snapshot.
    pub record_count: u64,
    /// Total payload bytes across the complete snapshot.
    pub total_bytes: u64,
    /// Index of the first chunk in `chunks`.
    pub first_chunk_index: u32,
    /// True if this export resumed from a persisted cursor.
    pub resumed: bool,
}

/// Opaque resumable position inside a full-snapshot export.
///
/// Base64-encoded CBOR. Carries enough to continue the same logical
/// snapshot: the run timestamp, the source position, and the hashes of the
/// chunks already confirmed uploaded, so the completing call can still
/// produce the full manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SnapshotCursor {
    timestamp_ms: u64,
    store_index: u32,
    last_key: Vec<u8>,
    record_count: u64,
    total_bytes: u64,
    chunk_hashes: Vec<[u8; CONTENT_HASH_LEN]>,
}

impl SnapshotCursor {
    fn encode(&self) -> EngineResult<String> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes).map_err(|e| EngineError::Codec(e.to_string()))?;
        Ok(BASE64.encode(bytes))
    }

    fn decode(raw: &str) -> Option<Self> {
        let bytes = BASE64.decode(raw).ok()?;
        ciborium::from_reader(bytes.as_slice()).ok()
    }
}

/// Reads local stores and produces chunked, hash-verified exports.
pub struct SnapshotExporter {
    source: Arc<dyn RecordSource>,
    state: SyncStateStore,
    config: EngineConfig,
}

impl SnapshotExporter {
    /// Creates an exporter.
    pub fn new(source: Arc<dyn RecordSource>, state: SyncStateStore, config: EngineConfig) -> Self {
        Self {
            source,
            state,
            config,
        }
    }

    /// Exports the records of `store` newer than its persisted sync cursor.
    ///
    /// Returns `None` when the delta is empty. Never touches persisted
    /// state; cursor advancement is the scheduler's job after finalize.
    pub fn prepare_sync_data(
        &self,
        owner: &str,
        store: StoreKind,
    ) -> EngineResult<Option<DeltaExport>> {
        let mut after = self.state.sync_cursor(store);
        let mut records: Vec<Record> = Vec::new();
        loop {
            let batch =
                self.source
                    .read_batch(store, after.as_deref(), self.config.read_batch_size)?;
            let n = batch.len();
            if n == 0 {
                break;
            }
            after = batch.last().map(|r| r.key.clone());
            records.extend(batch);
            if n < self.config.read_batch_size {
                break;
            }
        }

        let Some(last) = records.last() else {
            debug!(owner, %store, "empty delta, nothing to export");
            return Ok(None);
        };
        let last_key = last.key.clone();

        let timestamp_ms = unix_timestamp_ms();
        let chunks = build_chunks(timestamp_ms, &records, self.config.max_chunk_bytes)?;
        let manifest = SnapshotManifest::for_chunks(timestamp_ms, records.len() as u64, &chunks);
        debug!(
            owner,
            %store,
            records = records.len(),
            chunks = chunks.len(),
            "prepared delta export"
        );
        Ok(Some(DeltaExport {
            store,
            manifest,
            chunks,
            last_key,
            record_count: records.len() as u64,
        }))
    }

    /// Exports a full snapshot across every store.
    ///
    /// If a resume cursor is persisted for `scope`, continues the same
    /// snapshot from the recorded position; otherwise starts fresh. Returns
    /// `None` when the source is empty and there is nothing to resume.
    /// Cancellation is checked between read batches; partial read state is
    /// discarded, not persisted — only confirmed uploads advance the cursor
    /// (via the per-chunk checkpoints the caller persists).
    pub fn export_full_snapshot(
        &self,
        scope: &str,
        cancel: &CancelToken,
    ) -> EngineResult<Option<FullExport>> {
        let resume = self.state.snapshot_cursor(scope).and_then(|raw| {
            let cursor = SnapshotCursor::decode(&raw);
            if cursor.is_none() {
                warn!(scope, "snapshot cursor undecodable, restarting export");
            }
            cursor
        });

        let (timestamp_ms, start_store, start_key, base_records, base_bytes, base_hashes, resumed) =
            match resume {
                Some(c) => (
                    c.timestamp_ms,
                    c.store_index as usize,
                    Some(c.last_key),
                    c.record_count,
                    c.total_bytes,
                    c.chunk_hashes,
                    true,
                ),
                None => (unix_timestamp_ms(), 0, None, 0, 0, Vec::new(), false),
            };

        let mut records: Vec<Record> = Vec::new();
        for (idx, store) in StoreKind::ALL.iter().enumerate() {
            if idx < start_store {
                continue;
            }
            let mut after: Option<Vec<u8>> = if idx == start_store {
                start_key.clone()
            } else {
                None
            };
            loop {
                cancel.checkpoint()?;
                let batch =
                    self.source
                        .read_batch(*store, after.as_deref(), self.config.read_batch_size)?;
                let n = batch.len();
                if n == 0 {
                    break;
                }
                after = batch.last().map(|r| r.key.clone());
                records.extend(batch.into_iter().map(|r| scope_record(*store, r)));
                if n < self.config.read_batch_size {
                    break;
                }
            }
        }

        if records.is_empty() && base_hashes.is_empty() {
            debug!(scope, "source empty, no snapshot to export");
            return Ok(None);
        }

        let first_chunk_index = base_hashes.len() as u32;
        let mut chunks = build_chunks(timestamp_ms, &records, self.config.max_chunk_bytes)?;
        for chunk in &mut chunks {
            chunk.index += first_chunk_index;
        }

        let mut hashes = base_hashes;
        let mut record_count = base_records;
        let mut total_bytes = base_bytes;
        let mut exported = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let chunk_records = chunk.records()?;
            let last = chunk_records
                .last()
                .ok_or_else(|| EngineError::Codec("chunk with no records".into()))?;
            let (store_index, raw_key) = split_scoped_key(&last.key)
                .ok_or_else(|| EngineError::Codec("malformed scoped record key".into()))?;

            record_count += chunk_records.len() as u64;
            total_bytes += chunk.payload.len() as u64;
            hashes.push(chunk.hash);

            let checkpoint = SnapshotCursor {
                timestamp_ms,
                store_index: store_index as u32,
                last_key: raw_key,
                record_count,
                total_bytes,
                chunk_hashes: hashes.clone(),
            }
            .encode()?;
            exported.push(ExportedChunk { chunk, checkpoint });
        }

        let manifest =
            SnapshotManifest::from_chunk_hashes(timestamp_ms, record_count, total_bytes, &hashes);
        debug!(
            scope,
            records = record_count,
            chunks = manifest.chunk_count,
            resumed,
            "prepared full snapshot export"
        );
        Ok(Some(FullExport {
            timestamp_ms,
            manifest,
            chunks: exported,
            record_count,
            total_bytes,
            first_chunk_index,
            resumed,
        }))
    }
}

/// Prefixes a record key with its store name so a full snapshot can mix
/// stores while staying resumable.
fn scope_record(store: StoreKind, record: Record) -> Record {
    let mut key = store.name().as_bytes().to_vec();
    key.push(b':');
    key.extend(record.key);
    Record {
        key,
        value: record.value,
    }
}

/// Splits a scoped key back into (store index, raw key).
fn split_scoped_key(key: &[u8]) -> Option<(usize, Vec<u8>)> {
    let sep = key.iter().position(|&b| b == b':')?;
    let name = std::str::from_utf8(&key[..sep]).ok()?;
    let store = StoreKind::from_name(name)?;
    let index = StoreKind::ALL.iter().position(|&s| s == store)?;
    Some((index, key[sep + 1..].to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryRecordSource;
    use snapsync_state::InMemoryBackend;

    fn setup(chunk_bytes: usize) -> (Arc<MemoryRecordSource>, SyncStateStore, SnapshotExporter) {
        let source = Arc::new(MemoryRecordSource::new());
        let state = SyncStateStore::new(Arc::new(InMemoryBackend::new()));
        let config = EngineConfig::new("owner-1")
            .with_max_chunk_bytes(chunk_bytes)
            .with_read_batch_size(10);
        let exporter = SnapshotExporter::new(source.clone(), state.clone(), config);
        (source, state, exporter)
    }

    fn fill(source: &MemoryRecordSource, store: StoreKind, n: usize) {
        for i in 0..n {
            source.insert(store, format!("key-{i:04}").into_bytes(), vec![0xCD; 32]);
        }
    }

    #[test]
    fn empty_delta_exports_nothing() {
        let (_, _, exporter) = setup(1024);
        let delta = exporter
            .prepare_sync_data("owner-1", StoreKind::Notes)
            .unwrap();
        assert!(delta.is_none());
    }

    #[test]
    fn delta_covers_all_records() {
        let (source, _, exporter) = setup(1 << 20);
        fill(&source, StoreKind::Notes, 25);

        let delta = exporter
            .prepare_sync_data("owner-1", StoreKind::Notes)
            .unwrap()
            .unwrap();
        assert_eq!(delta.record_count, 25);
        assert_eq!(delta.last_key, b"key-0024".to_vec());
        assert_eq!(delta.manifest.chunk_count, delta.chunks.len() as u32);
    }

    #[test]
    fn delta_resumes_from_sync_cursor() {
        let (source, state, exporter) = setup(1 << 20);
        fill(&source, StoreKind::Notes, 25);
        state.set_sync_cursor(StoreKind::Notes, b"key-0019");

        let delta = exporter
            .prepare_sync_data("owner-1", StoreKind::Notes)
            .unwrap()
            .unwrap();
        assert_eq!(delta.record_count, 5);
        assert_eq!(delta.chunks[0].records().unwrap()[0].key, b"key-0020".to_vec());
    }

    #[test]
    fn full_export_spans_stores_in_fixed_order() {
        let (source, _, exporter) = setup(1 << 20);
        fill(&source, StoreKind::Notes, 3);
        fill(&source, StoreKind::Artifacts, 2);

        let export = exporter
            .export_full_snapshot("global", &CancelToken::new())
            .unwrap()
            .unwrap();
        assert_eq!(export.record_count, 5);
        assert_eq!(export.first_chunk_index, 0);
        assert!(!export.resumed);

        let records = export.chunks[0].chunk.records().unwrap();
        // Artifacts precede Notes in the fixed store order.
        assert!(records[0].key.starts_with(b"artifacts:"));
        assert!(records[4].key.starts_with(b"notes:"));
    }

    #[test]
    fn full_export_of_empty_source_is_none() {
        let (_, _, exporter) = setup(1024);
        let export = exporter
            .export_full_snapshot("global", &CancelToken::new())
            .unwrap();
        assert!(export.is_none());
    }

    #[test]
    fn cancelled_export_discards_partial_state() {
        let (source, state, exporter) = setup(1024);
        fill(&source, StoreKind::Notes, 50);

        let cancel = CancelToken::new();
        cancel.cancel();
        let result = exporter.export_full_snapshot("global", &cancel);
        assert!(matches!(result, Err(EngineError::Cancelled)));
        // No cursor was persisted by the exporter itself.
        assert_eq!(state.snapshot_cursor("global"), None);
    }

    #[test]
    fn resume_continues_same_snapshot() {
        let (source, state, exporter) = setup(600);
        fill(&source, StoreKind::Commitments, 40);

        let fresh = exporter
            .export_full_snapshot("global", &CancelToken::new())
            .unwrap()
            .unwrap();
        assert!(fresh.chunks.len() >= 3);

        // Pretend the first two chunks were uploaded, then the run died.
        state.set_snapshot_cursor("global", &fresh.chunks[1].checkpoint);

        let resumed = exporter
            .export_full_snapshot("global", &CancelToken::new())
            .unwrap()
            .unwrap();
        assert!(resumed.resumed);
        assert_eq!(resumed.timestamp_ms, fresh.timestamp_ms);
        assert_eq!(resumed.first_chunk_index, 2);
        assert_eq!(resumed.chunks.len(), fresh.chunks.len() - 2);

        // The resumed chunks are byte-identical to the fresh export's tail,
        // and the cumulative manifest matches the fresh one exactly.
        for (a, b) in resumed.chunks.iter().zip(fresh.chunks[2..].iter()) {
            assert_eq!(a.chunk, b.chunk);
        }
        assert_eq!(resumed.manifest, fresh.manifest);
    }

    #[test]
    fn corrupt_resume_cursor_restarts() {
        let (source, state, exporter) = setup(1024);
        fill(&source, StoreKind::Notes, 5);
        state.set_snapshot_cursor("global", "!!not-base64!!");

        let export = exporter
            .export_full_snapshot("global", &CancelToken::new())
            .unwrap()
            .unwrap();
        assert!(!export.resumed);
        assert_eq!(export.first_chunk_index, 0);
    }

    #[test]
    fn scoped_key_round_trip() {
        let record = Record::new(b"abc".to_vec(), b"v".to_vec());
        let scoped = scope_record(StoreKind::TreeState, record);
        assert_eq!(scoped.key, b"tree-state:abc".to_vec());

        let (index, raw) = split_scoped_key(&scoped.key).unwrap();
        assert_eq!(StoreKind::ALL[index], StoreKind::TreeState);
        assert_eq!(raw, b"abc".to_vec());

        assert!(split_scoped_key(b"no-separator").is_none());
        assert!(split_scoped_key(b"bogus:key").is_none());
    }
}
