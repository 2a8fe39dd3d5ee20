//! Remote cache transport seam.

use crate::error::{EngineError, EngineResult};
use parking_lot::Mutex;
use snapsync_protocol::{
    ChainId, ChainStatusResponse, Chunk, SnapshotManifest, StoreKind, GLOBAL_STORE,
};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Boundary adapter to the remote snapshot cache.
///
/// Implementations own no sync state; every call is idempotent and safely
/// retryable except finalize, which is the commit point and must only be
/// issued once every chunk upload of the run has succeeded.
pub trait CacheTransport: Send + Sync {
    /// Registers a manifest. Must precede any chunk upload for the same
    /// timestamp.
    fn upload_manifest(&self, owner: &str, manifest: &SnapshotManifest) -> EngineResult<()>;

    /// Uploads one chunk; the remote rejects on hash mismatch.
    fn upload_chunk(
        &self,
        owner: &str,
        store: &str,
        chunk: &Chunk,
        total_chunks: u32,
    ) -> EngineResult<()>;

    /// Marks a per-store delta sync complete and queryable.
    fn finalize_sync(
        &self,
        owner: &str,
        store: StoreKind,
        timestamp_ms: u64,
        manifest: &SnapshotManifest,
    ) -> EngineResult<()>;

    /// Marks a full snapshot upload complete and queryable.
    fn finalize_snapshot(&self, owner: &str, timestamp_ms: u64) -> EngineResult<()>;

    /// Probes whether a published bootstrap exists for a chain.
    fn chain_bootstrap_exists(&self, chain: ChainId) -> EngineResult<bool>;

    /// Fetches per-chain mirror status for an owner.
    fn chain_status(&self, owner: &str) -> EngineResult<ChainStatusResponse>;
}

/// A finalized snapshot held by [`MemoryCache`].
#[derive(Debug, Clone)]
pub struct FinalizedSnapshot {
    /// Owner scope.
    pub owner: String,
    /// Store name, or `"*"` for a full snapshot.
    pub store: String,
    /// Run timestamp.
    pub timestamp_ms: u64,
    /// The finalized manifest.
    pub manifest: SnapshotManifest,
    /// Chunks in index order.
    pub chunks: Vec<Chunk>,
}

impl FinalizedSnapshot {
    /// Decodes every record across the snapshot's chunks, in order.
    pub fn records(&self) -> EngineResult<Vec<snapsync_protocol::Record>> {
        let mut all = Vec::new();
        for chunk in &self.chunks {
            all.extend(chunk.records()?);
        }
        Ok(all)
    }
}

#[derive(Debug, Default)]
struct PendingSnapshot {
    manifest: Option<SnapshotManifest>,
    chunks: BTreeMap<u32, Chunk>,
}

#[derive(Debug, Default)]
struct CacheInner {
    pending: BTreeMap<(String, u64), PendingSnapshot>,
    finalized: Vec<FinalizedSnapshot>,
    bootstraps: BTreeSet<u64>,
    statuses: BTreeMap<String, ChainStatusResponse>,
    fail_transport_at: Option<u32>,
    fail_integrity_at: Option<u32>,
    upload_delay: Option<Duration>,
}

/// An in-process remote cache with real verification semantics.
///
/// Enforces the wire contract the engine relies on: chunks are rejected
/// without a registered manifest or on hash mismatch, and finalize fails
/// loudly unless every declared chunk is present and consistent with the
/// manifest. Failure injection knobs drive abort-path tests.
#[derive(Debug, Default)]
pub struct MemoryCache {
    inner: Mutex<CacheInner>,
}

impl MemoryCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next uploads of chunk `index` fail with a retryable
    /// transport error, until cleared with `None`.
    pub fn set_fail_chunk_transport(&self, index: Option<u32>) {
        self.inner.lock().fail_transport_at = index;
    }

    /// Makes uploads of chunk `index` fail as a hash mismatch, until
    /// cleared with `None`.
    pub fn set_fail_chunk_integrity(&self, index: Option<u32>) {
        self.inner.lock().fail_integrity_at = index;
    }

    /// Delays every chunk upload, to widen race windows in tests.
    pub fn set_upload_delay(&self, delay: Option<Duration>) {
        self.inner.lock().upload_delay = delay;
    }

    /// Marks a chain as having a published bootstrap.
    pub fn set_chain_bootstrap(&self, chain: ChainId) {
        self.inner.lock().bootstraps.insert(chain.0);
    }

    /// Sets the chain status metadata returned for an owner.
    pub fn set_chain_status(&self, owner: impl Into<String>, status: ChainStatusResponse) {
        self.inner.lock().statuses.insert(owner.into(), status);
    }

    /// Returns all finalized snapshots, in finalization order.
    pub fn finalized(&self) -> Vec<FinalizedSnapshot> {
        self.inner.lock().finalized.clone()
    }

    /// Returns finalized snapshots for one owner.
    pub fn finalized_for(&self, owner: &str) -> Vec<FinalizedSnapshot> {
        self.inner
            .lock()
            .finalized
            .iter()
            .filter(|s| s.owner == owner)
            .cloned()
            .collect()
    }

    /// Number of chunks currently pending (uploaded but not finalized) for
    /// one run.
    pub fn pending_chunk_count(&self, owner: &str, timestamp_ms: u64) -> usize {
        self.inner
            .lock()
            .pending
            .get(&(owner.to_string(), timestamp_ms))
            .map_or(0, |p| p.chunks.len())
    }
}

impl CacheTransport for MemoryCache {
    fn upload_manifest(&self, owner: &str, manifest: &SnapshotManifest) -> EngineResult<()> {
        let mut inner = self.inner.lock();
        let entry = inner
            .pending
            .entry((owner.to_string(), manifest.timestamp_ms))
            .or_default();
        entry.manifest = Some(manifest.clone());
        Ok(())
    }

    fn upload_chunk(
        &self,
        owner: &str,
        store: &str,
        chunk: &Chunk,
        _total_chunks: u32,
    ) -> EngineResult<()> {
        let delay = self.inner.lock().upload_delay;
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let mut inner = self.inner.lock();
        if inner.fail_transport_at == Some(chunk.index) {
            return Err(EngineError::transport_retryable(format!(
                "injected transport failure at chunk {}",
                chunk.index
            )));
        }
        if inner.fail_integrity_at == Some(chunk.index) {
            return Err(EngineError::integrity(store, chunk.index, "hash mismatch"));
        }
        if !chunk.verify() {
            return Err(EngineError::integrity(store, chunk.index, "hash mismatch"));
        }

        let Some(pending) = inner
            .pending
            .get_mut(&(owner.to_string(), chunk.timestamp_ms))
            .filter(|p| p.manifest.is_some())
        else {
            return Err(EngineError::Remote(format!(
                "no manifest registered for {owner}@{}",
                chunk.timestamp_ms
            )));
        };
        pending.chunks.insert(chunk.index, chunk.clone());
        Ok(())
    }

    fn finalize_sync(
        &self,
        owner: &str,
        store: StoreKind,
        timestamp_ms: u64,
        manifest: &SnapshotManifest,
    ) -> EngineResult<()> {
        self.finalize(owner, store.name(), timestamp_ms, Some(manifest))
    }

    fn finalize_snapshot(&self, owner: &str, timestamp_ms: u64) -> EngineResult<()> {
        self.finalize(owner, GLOBAL_STORE, timestamp_ms, None)
    }

    fn chain_bootstrap_exists(&self, chain: ChainId) -> EngineResult<bool> {
        Ok(self.inner.lock().bootstraps.contains(&chain.0))
    }

    fn chain_status(&self, owner: &str) -> EngineResult<ChainStatusResponse> {
        Ok(self
            .inner
            .lock()
            .statuses
            .get(owner)
            .cloned()
            .unwrap_or_default())
    }
}

impl MemoryCache {
    fn finalize(
        &self,
        owner: &str,
        store: &str,
        timestamp_ms: u64,
        manifest_echo: Option<&SnapshotManifest>,
    ) -> EngineResult<()> {
        let mut inner = self.inner.lock();
        let key = (owner.to_string(), timestamp_ms);
        let Some(pending) = inner.pending.get(&key) else {
            return Err(EngineError::Remote(format!(
                "finalize for unknown run {owner}@{timestamp_ms}"
            )));
        };
        let Some(manifest) = pending.manifest.clone() else {
            return Err(EngineError::Remote("finalize without manifest".into()));
        };
        if let Some(echo) = manifest_echo {
            if echo.content_hash != manifest.content_hash {
                return Err(EngineError::Remote(
                    "finalize manifest does not match registered manifest".into(),
                ));
            }
        }

        let chunks: Vec<Chunk> = pending.chunks.values().cloned().collect();
        let contiguous = chunks
            .iter()
            .enumerate()
            .all(|(i, c)| c.index == i as u32);
        if !contiguous || !manifest.matches_chunks(&chunks) {
            return Err(EngineError::Remote(format!(
                "finalize with incomplete chunks: have {}, declared {}",
                chunks.len(),
                manifest.chunk_count
            )));
        }

        inner.pending.remove(&key);
        inner.finalized.push(FinalizedSnapshot {
            owner: owner.to_string(),
            store: store.to_string(),
            timestamp_ms,
            manifest,
            chunks,
        });
        Ok(())
    }
}
