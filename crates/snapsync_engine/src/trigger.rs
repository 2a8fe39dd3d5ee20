//! Change-driven sync triggering with debounce and rate limiting.

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::scheduler::{SyncOutcome, SyncScheduler};
use parking_lot::{Condvar, Mutex};
use snapsync_protocol::StoreKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Pure debounce/rate-limit state machine.
///
/// Kept free of threads and real time so the policy is testable with a
/// manual clock: callers pass `now` explicitly and drive transitions.
#[derive(Debug)]
pub struct DebounceState {
    window: Duration,
    min_interval: Duration,
    deadline: Option<Instant>,
    last_run_start: Option<Instant>,
}

impl DebounceState {
    /// Creates an idle debounce state.
    pub fn new(window: Duration, min_interval: Duration) -> Self {
        Self {
            window,
            min_interval,
            deadline: None,
            last_run_start: None,
        }
    }

    /// Records a change signal. Any pending deadline is replaced, so a
    /// burst of signals collapses into one run scheduled `window` after
    /// the last signal.
    pub fn on_signal(&mut self, now: Instant) {
        self.deadline = Some(now + self.window);
    }

    /// Returns the instant the state machine next needs to be polled.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns true when a run is pending.
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Checks whether a run should start at `now`.
    ///
    /// When the debounce deadline has passed but the rate limit blocks it,
    /// the deadline re-arms at the earliest eligible instant instead of
    /// dropping the pending work. Firing does not consume the rate-limit
    /// window by itself; the caller reports back with [`note_run_started`]
    /// once a run actually began, so attempts that resolve to "nothing to
    /// do" or "already running" do not delay the next genuine run.
    ///
    /// [`note_run_started`]: DebounceState::note_run_started
    pub fn try_fire(&mut self, now: Instant) -> bool {
        let Some(deadline) = self.deadline else {
            return false;
        };
        if now < deadline {
            return false;
        }
        if let Some(last) = self.last_run_start {
            let eligible = last + self.min_interval;
            if now < eligible {
                self.deadline = Some(eligible);
                return false;
            }
        }
        self.deadline = None;
        true
    }

    /// Records that a run actually started at `now`, opening the rate-limit
    /// window.
    pub fn note_run_started(&mut self, now: Instant) {
        self.last_run_start = Some(now);
    }
}

struct TriggerShared {
    state: Mutex<DebounceState>,
    condvar: Condvar,
    scheduler: Arc<SyncScheduler>,
    sync_state: snapsync_state::SyncStateStore,
    clock: Arc<dyn Clock>,
    stop: AtomicBool,
}

/// Background trigger that turns change signals into debounced sync runs.
///
/// [`ChangeTrigger::signal`] marks stores dirty immediately (the durable
/// record of pending work) and arms the debounce; a worker thread fires
/// [`SyncScheduler::run_sync`] once the window elapses.
pub struct ChangeTrigger {
    shared: Arc<TriggerShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ChangeTrigger {
    /// Creates a trigger bound to the scheduler. Call [`start`] to spawn
    /// the worker.
    ///
    /// [`start`]: ChangeTrigger::start
    pub fn new(
        config: &EngineConfig,
        scheduler: Arc<SyncScheduler>,
        sync_state: snapsync_state::SyncStateStore,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let shared = Arc::new(TriggerShared {
            state: Mutex::new(DebounceState::new(
                config.debounce_window,
                config.min_run_interval,
            )),
            condvar: Condvar::new(),
            scheduler,
            sync_state,
            clock,
            stop: AtomicBool::new(false),
        });
        Self {
            shared,
            worker: Mutex::new(None),
        }
    }

    /// Records changed stores and arms the debounce window.
    ///
    /// Dirty flags persist before the debounce fires, so a crash between
    /// signal and run leaves the work discoverable by the next run.
    pub fn signal(&self, stores: &[StoreKind]) {
        for &store in stores {
            self.shared.sync_state.set_dirty_flag(store, true);
        }
        let now = self.shared.clock.now();
        self.shared.state.lock().on_signal(now);
        self.shared.condvar.notify_one();
        debug!(stores = ?stores, "change signal recorded");
    }

    /// Spawns the worker thread. Idempotent.
    pub fn start(&self) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        *worker = Some(std::thread::spawn(move || Self::worker_loop(&shared)));
        info!("change trigger started");
    }

    /// Stops the worker thread and waits for it to exit.
    pub fn stop(&self) {
        {
            // The store and notify happen under the state mutex, so the
            // worker can never park between checking the flag and waiting.
            let _state = self.shared.state.lock();
            self.shared.stop.store(true, Ordering::SeqCst);
            self.shared.condvar.notify_all();
        }
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                warn!("change trigger worker panicked");
            }
        }
        info!("change trigger stopped");
    }

    /// Returns true while a debounce deadline is pending.
    pub fn is_armed(&self) -> bool {
        self.shared.state.lock().is_armed()
    }

    fn worker_loop(shared: &TriggerShared) {
        loop {
            let fired_at = {
                let mut state = shared.state.lock();
                loop {
                    if shared.stop.load(Ordering::SeqCst) {
                        return;
                    }
                    let now = shared.clock.now();
                    if state.try_fire(now) {
                        break now;
                    }
                    match state.next_deadline() {
                        Some(deadline) => {
                            let wait = deadline.saturating_duration_since(now);
                            let _ = shared.condvar.wait_for(&mut state, wait);
                        }
                        None => shared.condvar.wait(&mut state),
                    }
                }
            };
            let outcome = shared.scheduler.run_sync();
            debug!(?outcome, "debounced sync run finished");
            let mut state = shared.state.lock();
            match outcome {
                SyncOutcome::Completed { .. } | SyncOutcome::Aborted { .. } => {
                    state.note_run_started(fired_at);
                }
                // The guard was held elsewhere; re-arm so the pending work
                // drains once it is released, without opening the window.
                SyncOutcome::AlreadyRunning => state.on_signal(shared.clock.now()),
                SyncOutcome::NothingToSync => {}
            }
        }
    }
}

impl Drop for ChangeTrigger {
    fn drop(&mut self) {
        self.stop();
    }
}
