//! Periodic global bootstrap snapshot publication.

use crate::cancel::CancelToken;
use crate::config::{EngineConfig, GLOBAL_SCOPE};
use crate::error::{EngineError, EngineResult};
use crate::export::SnapshotExporter;
use crate::scheduler::SyncScheduler;
use crate::transport::CacheTransport;
use parking_lot::{Condvar, Mutex, RwLock};
use snapsync_protocol::GLOBAL_STORE;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

/// Result of one bootstrap publication attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// A snapshot was exported, uploaded, and finalized.
    Published {
        /// Snapshot timestamp, shared by every chunk.
        timestamp_ms: u64,
        /// Total chunks in the finalized snapshot.
        chunk_count: u32,
        /// Total records in the finalized snapshot.
        record_count: u64,
    },
    /// The source is empty and no interrupted upload is pending.
    NothingToPublish,
    /// The single-flight guard could not be taken in time.
    SkippedBusy,
    /// This instance has no producer identity configured.
    NotProducer,
    /// The publication failed partway; settled chunks stay uploaded and a
    /// resume cursor is persisted.
    Aborted {
        /// Failure description.
        reason: String,
    },
}

/// Counters describing bootstrap activity.
#[derive(Debug, Clone, Default)]
pub struct BootstrapStats {
    /// Snapshots finalized.
    pub publications: u64,
    /// Attempts that failed partway.
    pub aborted: u64,
    /// Attempts skipped because the guard stayed busy.
    pub skipped_busy: u64,
    /// Timestamp of the last finalized snapshot.
    pub last_published_ms: Option<u64>,
    /// Last failure description.
    pub last_error: Option<String>,
}

struct TimerShared {
    gate: Mutex<()>,
    condvar: Condvar,
    stop: AtomicBool,
}

/// Publishes full snapshots of every store on a fixed interval.
///
/// Only the instance configured with a producer identity publishes; other
/// instances report [`BootstrapOutcome::NotProducer`]. A publication
/// preempts any in-flight delta run: the full snapshot is authoritative
/// and supersedes deltas of the same data.
pub struct BootstrapCoordinator {
    config: EngineConfig,
    exporter: SnapshotExporter,
    transport: Arc<dyn CacheTransport>,
    state: snapsync_state::SyncStateStore,
    scheduler: Arc<SyncScheduler>,
    stats: RwLock<BootstrapStats>,
    timer: TimerShared,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BootstrapCoordinator {
    /// Creates a coordinator. Call [`start`] to arm the interval timer.
    ///
    /// [`start`]: BootstrapCoordinator::start
    pub fn new(
        config: EngineConfig,
        exporter: SnapshotExporter,
        transport: Arc<dyn CacheTransport>,
        state: snapsync_state::SyncStateStore,
        scheduler: Arc<SyncScheduler>,
    ) -> Self {
        Self {
            config,
            exporter,
            transport,
            state,
            scheduler,
            stats: RwLock::new(BootstrapStats::default()),
            timer: TimerShared {
                gate: Mutex::new(()),
                condvar: Condvar::new(),
                stop: AtomicBool::new(false),
            },
            worker: Mutex::new(None),
        }
    }

    /// Returns current publication counters.
    pub fn stats(&self) -> BootstrapStats {
        self.stats.read().clone()
    }

    /// Returns true when an interrupted publication left a resume cursor.
    pub fn has_pending_resume(&self) -> bool {
        self.state.snapshot_cursor(GLOBAL_SCOPE).is_some()
    }

    /// Spawns the interval timer. No-op on non-producer instances and when
    /// already started.
    pub fn start(self: &Arc<Self>) {
        if self.config.producer.is_none() {
            debug!("bootstrap timer not started, no producer identity");
            return;
        }
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }
        let coordinator = Arc::clone(self);
        *worker = Some(std::thread::spawn(move || coordinator.timer_loop()));
        info!(interval = ?self.config.bootstrap_interval, "bootstrap timer started");
    }

    /// Stops the interval timer and waits for it to exit.
    pub fn stop(&self) {
        {
            // The store and notify happen under the gate, so the worker can
            // never park between checking the flag and waiting.
            let _gate = self.timer.gate.lock();
            self.timer.stop.store(true, Ordering::SeqCst);
            self.timer.condvar.notify_all();
        }
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                warn!("bootstrap timer thread panicked");
            }
        }
    }

    /// Runs one publication attempt immediately.
    pub fn trigger_now(&self) -> BootstrapOutcome {
        let Some(producer) = self.config.producer.clone() else {
            return BootstrapOutcome::NotProducer;
        };

        // Take the single-flight guard, cancelling any delta run in flight.
        let Some(run) = self.scheduler.preempt(self.config.request_timeout) else {
            debug!("bootstrap skipped, sync guard stayed busy");
            self.stats.write().skipped_busy += 1;
            return BootstrapOutcome::SkippedBusy;
        };
        let cancel = run.cancel_token();

        match self.publish(&producer, &cancel) {
            Ok(Some((timestamp_ms, chunk_count, record_count))) => {
                info!(timestamp_ms, chunk_count, record_count, "bootstrap snapshot published");
                let mut stats = self.stats.write();
                stats.publications += 1;
                stats.last_published_ms = Some(timestamp_ms);
                stats.last_error = None;
                BootstrapOutcome::Published {
                    timestamp_ms,
                    chunk_count,
                    record_count,
                }
            }
            Ok(None) => BootstrapOutcome::NothingToPublish,
            Err(e) => {
                warn!(error = %e, "bootstrap publication aborted");
                let mut stats = self.stats.write();
                stats.aborted += 1;
                stats.last_error = Some(e.to_string());
                BootstrapOutcome::Aborted {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Exports and uploads a full snapshot.
    ///
    /// Chunks go up in fan-out batches; after each batch settles, the
    /// checkpoint of its last chunk is persisted so an interrupted upload
    /// resumes mid-snapshot instead of restarting. The resume cursor clears
    /// only after finalize succeeds.
    fn publish(&self, producer: &str, cancel: &CancelToken) -> EngineResult<Option<(u64, u32, u64)>> {
        let Some(export) = self.exporter.export_full_snapshot(GLOBAL_SCOPE, cancel)? else {
            return Ok(None);
        };
        if export.resumed {
            info!(
                timestamp_ms = export.timestamp_ms,
                from_chunk = export.first_chunk_index,
                "resuming interrupted bootstrap upload"
            );
        }

        let manifest = export.manifest.clone().into_bootstrap(producer);
        self.transport.upload_manifest(GLOBAL_SCOPE, &manifest)?;

        let total = manifest.chunk_count;
        for batch in export.chunks.chunks(self.config.bootstrap_fanout) {
            cancel.checkpoint()?;
            std::thread::scope(|scope| -> EngineResult<()> {
                let handles: Vec<_> = batch
                    .iter()
                    .map(|exported| {
                        scope.spawn(move || {
                            self.transport.upload_chunk(
                                GLOBAL_SCOPE,
                                GLOBAL_STORE,
                                &exported.chunk,
                                total,
                            )
                        })
                    })
                    .collect();
                let mut result = Ok(());
                for handle in handles {
                    let upload = handle.join().map_err(|_| {
                        EngineError::transport_fatal("chunk upload worker panicked")
                    })?;
                    if result.is_ok() {
                        result = upload;
                    }
                }
                result
            })?;
            // Batch settled: confirmed uploads become the resume position.
            if let Some(last) = batch.last() {
                self.state.set_snapshot_cursor(GLOBAL_SCOPE, &last.checkpoint);
            }
        }

        cancel.checkpoint()?;
        self.transport
            .finalize_snapshot(GLOBAL_SCOPE, export.timestamp_ms)?;
        self.state.clear_snapshot_cursor(GLOBAL_SCOPE);
        Ok(Some((export.timestamp_ms, total, export.record_count)))
    }

    fn timer_loop(&self) {
        let mut gate = self.timer.gate.lock();
        loop {
            // Checked while holding the gate: a stop issued before the
            // worker first parks, or during a publication, is seen here.
            if self.timer.stop.load(Ordering::SeqCst) {
                return;
            }
            let timed_out = self
                .timer
                .condvar
                .wait_for(&mut gate, self.config.bootstrap_interval)
                .timed_out();
            if self.timer.stop.load(Ordering::SeqCst) {
                return;
            }
            if !timed_out {
                continue;
            }
            drop(gate);
            let outcome = self.trigger_now();
            debug!(?outcome, "scheduled bootstrap attempt finished");
            gate = self.timer.gate.lock();
        }
    }
}

impl Drop for BootstrapCoordinator {
    fn drop(&mut self) {
        self.stop();
    }
}
