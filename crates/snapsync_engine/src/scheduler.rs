//! Single-flight sync scheduler.

use crate::cancel::CancelToken;
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::export::SnapshotExporter;
use crate::transport::CacheTransport;
use parking_lot::{Mutex, RwLock};
use snapsync_protocol::StoreKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Structured result of a sync run. Never an error: sync is best-effort
/// background maintenance and failures must not propagate to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Every dirty store was exported, uploaded, and finalized.
    Completed {
        /// Stores that had a delta and were mirrored.
        covered: Vec<StoreKind>,
        /// Dirty stores whose delta turned out empty.
        empty: Vec<StoreKind>,
    },
    /// No store was dirty.
    NothingToSync,
    /// Another run holds the single-flight guard; dirty flags stay set.
    AlreadyRunning,
    /// The run failed partway. Stores finalized before the failure keep
    /// their updates; the failed and remaining stores keep pre-run state.
    Aborted {
        /// Stores finalized before the failure.
        covered: Vec<StoreKind>,
        /// The store whose sync failed, when known.
        failed: Option<StoreKind>,
        /// Failure description.
        reason: String,
    },
}

impl SyncOutcome {
    /// Returns true for [`SyncOutcome::Completed`].
    pub fn is_completed(&self) -> bool {
        matches!(self, SyncOutcome::Completed { .. })
    }
}

/// Counters describing scheduler activity.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Runs that finished with every covered store finalized.
    pub runs_completed: u64,
    /// Runs that aborted partway.
    pub runs_aborted: u64,
    /// Start requests skipped because a run was active.
    pub runs_skipped: u64,
    /// Stores mirrored across all completed work.
    pub stores_synced: u64,
    /// Chunks uploaded across all runs.
    pub chunks_uploaded: u64,
    /// Last failure description.
    pub last_error: Option<String>,
}

/// Holds the single-flight guard for the duration of one run.
///
/// Releasing happens on drop, so the guard cannot leak across an early
/// return or a panic in test code.
pub struct ExclusiveRun<'a> {
    scheduler: &'a SyncScheduler,
    cancel: CancelToken,
}

impl ExclusiveRun<'_> {
    /// Returns the cancellation token of this run.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }
}

impl Drop for ExclusiveRun<'_> {
    fn drop(&mut self) {
        *self.scheduler.active_cancel.lock() = None;
        self.scheduler.running.store(false, Ordering::SeqCst);
    }
}

/// Orchestrates export → upload → finalize for dirty stores.
///
/// At most one run executes system-wide. The guard is shared with the
/// bootstrap coordinator: a bootstrap publication and an owner delta run
/// can never interleave their uploads.
pub struct SyncScheduler {
    config: EngineConfig,
    exporter: SnapshotExporter,
    transport: Arc<dyn CacheTransport>,
    state: snapsync_state::SyncStateStore,
    running: AtomicBool,
    active_cancel: Mutex<Option<CancelToken>>,
    stats: RwLock<SyncStats>,
}

impl SyncScheduler {
    /// Creates a scheduler.
    pub fn new(
        config: EngineConfig,
        exporter: SnapshotExporter,
        transport: Arc<dyn CacheTransport>,
        state: snapsync_state::SyncStateStore,
    ) -> Self {
        Self {
            config,
            exporter,
            transport,
            state,
            running: AtomicBool::new(false),
            active_cancel: Mutex::new(None),
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// Returns current run counters.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns true while a run holds the guard.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Requests cancellation of the active run, if any.
    pub fn cancel_active(&self) {
        if let Some(token) = self.active_cancel.lock().as_ref() {
            token.cancel();
        }
    }

    /// Attempts to take the single-flight guard without waiting.
    pub fn begin_exclusive(&self) -> Option<ExclusiveRun<'_>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }
        let cancel = CancelToken::new();
        *self.active_cancel.lock() = Some(cancel.clone());
        Some(ExclusiveRun {
            scheduler: self,
            cancel,
        })
    }

    /// Cancels the active run and waits up to `wait` to take the guard.
    ///
    /// Used by the bootstrap path: a full snapshot is authoritative and
    /// supersedes an in-flight delta run.
    pub fn preempt(&self, wait: Duration) -> Option<ExclusiveRun<'_>> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(run) = self.begin_exclusive() {
                return Some(run);
            }
            self.cancel_active();
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    /// Runs one sync over the currently dirty stores.
    pub fn run_sync(&self) -> SyncOutcome {
        let Some(run) = self.begin_exclusive() else {
            debug!("sync requested while a run is active, skipping");
            self.stats.write().runs_skipped += 1;
            return SyncOutcome::AlreadyRunning;
        };
        let cancel = run.cancel_token();

        let dirty: Vec<StoreKind> = StoreKind::ALL
            .iter()
            .copied()
            .filter(|&store| self.state.dirty_flag(store))
            .collect();
        if dirty.is_empty() {
            debug!("no dirty stores, nothing to sync");
            return SyncOutcome::NothingToSync;
        }

        info!(stores = ?dirty, "sync run starting");
        let mut covered = Vec::new();
        let mut empty = Vec::new();
        for store in dirty {
            match self.sync_store(store, &cancel) {
                Ok(true) => covered.push(store),
                Ok(false) => {
                    // A dirty flag with an empty delta means local state
                    // already matches the mirror; the flag can clear.
                    self.state.set_dirty_flag(store, false);
                    empty.push(store);
                }
                Err(e) => {
                    warn!(%store, error = %e, "sync run aborted");
                    let mut stats = self.stats.write();
                    stats.runs_aborted += 1;
                    stats.last_error = Some(e.to_string());
                    return SyncOutcome::Aborted {
                        covered,
                        failed: Some(store),
                        reason: e.to_string(),
                    };
                }
            }
        }

        info!(covered = covered.len(), "sync run completed");
        let mut stats = self.stats.write();
        stats.runs_completed += 1;
        stats.stores_synced += covered.len() as u64;
        stats.last_error = None;
        SyncOutcome::Completed { covered, empty }
    }

    /// Mirrors one store: manifest, then chunks, then finalize, then the
    /// local cursor/hash/dirty updates. Returns `Ok(false)` on an empty
    /// delta.
    fn sync_store(&self, store: StoreKind, cancel: &CancelToken) -> EngineResult<bool> {
        let owner = self.config.owner.as_str();
        let Some(delta) = self.exporter.prepare_sync_data(owner, store)? else {
            return Ok(false);
        };

        self.transport.upload_manifest(owner, &delta.manifest)?;
        let total = delta.manifest.chunk_count;
        for chunk in &delta.chunks {
            cancel.checkpoint()?;
            self.transport
                .upload_chunk(owner, store.name(), chunk, total)?;
            self.stats.write().chunks_uploaded += 1;
        }
        cancel.checkpoint()?;
        self.transport
            .finalize_sync(owner, store, delta.manifest.timestamp_ms, &delta.manifest)?;

        // The commit point: only now does persisted state advance.
        self.state.set_sync_cursor(store, &delta.last_key);
        self.state.set_sync_hash(store, &delta.manifest.content_hash);
        self.state.set_dirty_flag(store, false);
        debug!(
            %store,
            records = delta.record_count,
            chunks = total,
            "store mirrored"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryRecordSource;
    use crate::transport::MemoryCache;
    use snapsync_state::{InMemoryBackend, SyncStateStore};

    struct Fixture {
        source: Arc<MemoryRecordSource>,
        state: SyncStateStore,
        cache: Arc<MemoryCache>,
        scheduler: SyncScheduler,
    }

    fn fixture() -> Fixture {
        let source = Arc::new(MemoryRecordSource::new());
        let state = SyncStateStore::new(Arc::new(InMemoryBackend::new()));
        let cache = Arc::new(MemoryCache::new());
        let config = EngineConfig::new("owner-1").with_max_chunk_bytes(4480);
        let exporter = SnapshotExporter::new(source.clone(), state.clone(), config.clone());
        let scheduler = SyncScheduler::new(config, exporter, cache.clone(), state.clone());
        Fixture {
            source,
            state,
            cache,
            scheduler,
        }
    }

    fn fill(fixture: &Fixture, store: StoreKind, n: usize) {
        for i in 0..n {
            fixture
                .source
                .insert(store, format!("key-{i:04}").into_bytes(), vec![0xCD; 32]);
        }
        fixture.state.set_dirty_flag(store, true);
    }

    #[test]
    fn nothing_to_sync() {
        let fixture = fixture();
        assert_eq!(fixture.scheduler.run_sync(), SyncOutcome::NothingToSync);
        assert!(!fixture.scheduler.is_running());
    }

    #[test]
    fn completed_run_advances_state() {
        let fixture = fixture();
        // 150 records at 56 estimated bytes each against a 4480-byte budget
        // packs into exactly two chunks.
        fill(&fixture, StoreKind::Commitments, 150);
        assert_eq!(fixture.state.sync_cursor(StoreKind::Commitments), None);

        let outcome = fixture.scheduler.run_sync();
        let SyncOutcome::Completed { covered, empty } = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(covered, vec![StoreKind::Commitments]);
        assert!(empty.is_empty());

        let finalized = fixture.cache.finalized_for("owner-1");
        assert_eq!(finalized.len(), 1);
        assert_eq!(finalized[0].manifest.record_count, 150);
        assert_eq!(finalized[0].manifest.chunk_count, 2);

        assert_eq!(
            fixture.state.sync_cursor(StoreKind::Commitments),
            Some(b"key-0149".to_vec())
        );
        assert_eq!(
            fixture.state.sync_hash(StoreKind::Commitments),
            Some(finalized[0].manifest.content_hash)
        );
        assert!(!fixture.state.dirty_flag(StoreKind::Commitments));
        assert_eq!(fixture.scheduler.stats().runs_completed, 1);
    }

    #[test]
    fn dirty_with_empty_delta_clears_flag() {
        let fixture = fixture();
        fixture.state.set_dirty_flag(StoreKind::Notes, true);

        let outcome = fixture.scheduler.run_sync();
        let SyncOutcome::Completed { covered, empty } = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert!(covered.is_empty());
        assert_eq!(empty, vec![StoreKind::Notes]);
        assert!(!fixture.state.dirty_flag(StoreKind::Notes));
        assert!(fixture.cache.finalized().is_empty());
    }

    #[test]
    fn integrity_failure_aborts_without_state_change() {
        let fixture = fixture();
        fill(&fixture, StoreKind::Commitments, 150);
        // Chunk 2 of 2 fails hash verification.
        fixture.cache.set_fail_chunk_integrity(Some(1));

        let outcome = fixture.scheduler.run_sync();
        let SyncOutcome::Aborted { failed, reason, .. } = outcome else {
            panic!("expected abort, got {outcome:?}");
        };
        assert_eq!(failed, Some(StoreKind::Commitments));
        assert!(reason.contains("hash mismatch"));

        // Pre-run values survive: no cursor, no hash, still dirty, nothing
        // finalized.
        assert_eq!(fixture.state.sync_cursor(StoreKind::Commitments), None);
        assert_eq!(fixture.state.sync_hash(StoreKind::Commitments), None);
        assert!(fixture.state.dirty_flag(StoreKind::Commitments));
        assert!(fixture.cache.finalized().is_empty());
        assert_eq!(fixture.scheduler.stats().runs_aborted, 1);
    }

    #[test]
    fn earlier_stores_keep_their_commit_on_later_abort() {
        let fixture = fixture();
        fill(&fixture, StoreKind::Artifacts, 10);
        fill(&fixture, StoreKind::Notes, 150);
        // Artifacts packs into one chunk, Notes into two; failing chunk
        // index 1 hits only the Notes upload.
        fixture.cache.set_fail_chunk_integrity(Some(1));

        let outcome = fixture.scheduler.run_sync();
        let SyncOutcome::Aborted {
            covered, failed, ..
        } = outcome
        else {
            panic!("expected abort, got {outcome:?}");
        };
        assert_eq!(covered, vec![StoreKind::Artifacts]);
        assert_eq!(failed, Some(StoreKind::Notes));

        // Artifacts committed before the failure and keeps its updates.
        assert!(!fixture.state.dirty_flag(StoreKind::Artifacts));
        assert_eq!(
            fixture.state.sync_cursor(StoreKind::Artifacts),
            Some(b"key-0009".to_vec())
        );
        // Notes rolled back to pre-run state.
        assert!(fixture.state.dirty_flag(StoreKind::Notes));
        assert_eq!(fixture.state.sync_cursor(StoreKind::Notes), None);

        let finalized = fixture.cache.finalized_for("owner-1");
        assert_eq!(finalized.len(), 1);
        assert_eq!(finalized[0].store, StoreKind::Artifacts.name());
    }

    #[test]
    fn guard_blocks_second_run() {
        let fixture = fixture();
        fill(&fixture, StoreKind::Notes, 5);

        let run = fixture.scheduler.begin_exclusive().unwrap();
        assert!(fixture.scheduler.is_running());
        assert_eq!(fixture.scheduler.run_sync(), SyncOutcome::AlreadyRunning);
        assert_eq!(fixture.scheduler.stats().runs_skipped, 1);
        assert!(fixture.state.dirty_flag(StoreKind::Notes));

        drop(run);
        assert!(!fixture.scheduler.is_running());
        assert!(fixture.scheduler.run_sync().is_completed());
    }

    #[test]
    fn cancel_active_aborts_between_chunks() {
        let fixture = fixture();
        fill(&fixture, StoreKind::Notes, 150);

        // Cancel before the run starts is impossible through the public API
        // (each run gets a fresh token), so cancel mid-run from the token.
        let run = fixture.scheduler.begin_exclusive().unwrap();
        let token = run.cancel_token();
        token.cancel();
        drop(run);

        // A fresh run gets a fresh token and proceeds normally.
        assert!(fixture.scheduler.run_sync().is_completed());
    }

    #[test]
    fn preempt_cancels_and_acquires() {
        let fixture = fixture();
        let run = fixture.scheduler.begin_exclusive().unwrap();
        let token = run.cancel_token();

        // Guard held: preempt with zero wait fails but requests cancel.
        assert!(fixture.scheduler.preempt(Duration::ZERO).is_none());
        assert!(token.is_cancelled());

        drop(run);
        let preempted = fixture.scheduler.preempt(Duration::from_millis(100));
        assert!(preempted.is_some());
    }
}
