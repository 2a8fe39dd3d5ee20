//! Configuration for the mirror engine.

use std::time::Duration;

/// Owner scope used for the global, owner-agnostic bootstrap snapshot.
pub const GLOBAL_SCOPE: &str = "global";

/// Configuration for sync and bootstrap runs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Owner identity for per-owner sync runs.
    pub owner: String,
    /// Producer identity, set only on the designated bootstrap instance.
    pub producer: Option<String>,
    /// Debounce window measured from the last change signal.
    pub debounce_window: Duration,
    /// Hard rate limit: minimum interval between run starts.
    pub min_run_interval: Duration,
    /// Packing target for chunk payloads, in bytes.
    ///
    /// Must be small enough that a single chunk upload completes well within
    /// the transport timeout.
    pub max_chunk_bytes: usize,
    /// Records per source read batch.
    pub read_batch_size: usize,
    /// Interval between bootstrap snapshot publications.
    pub bootstrap_interval: Duration,
    /// Concurrent chunk uploads per bootstrap batch.
    pub bootstrap_fanout: usize,
    /// Per-request transport timeout hint.
    pub request_timeout: Duration,
}

impl EngineConfig {
    /// Creates a configuration for the given owner with default tuning.
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            producer: None,
            debounce_window: Duration::from_secs(2),
            min_run_interval: Duration::from_secs(60),
            max_chunk_bytes: 256 * 1024,
            read_batch_size: 500,
            bootstrap_interval: Duration::from_secs(15 * 60),
            bootstrap_fanout: 6,
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Designates this instance as the bootstrap producer.
    pub fn with_producer(mut self, producer: impl Into<String>) -> Self {
        self.producer = Some(producer.into());
        self
    }

    /// Sets the debounce window.
    pub fn with_debounce_window(mut self, window: Duration) -> Self {
        self.debounce_window = window;
        self
    }

    /// Sets the minimum interval between run starts.
    pub fn with_min_run_interval(mut self, interval: Duration) -> Self {
        self.min_run_interval = interval;
        self
    }

    /// Sets the chunk payload packing target.
    pub fn with_max_chunk_bytes(mut self, bytes: usize) -> Self {
        self.max_chunk_bytes = bytes;
        self
    }

    /// Sets the source read batch size.
    pub fn with_read_batch_size(mut self, records: usize) -> Self {
        self.read_batch_size = records;
        self
    }

    /// Sets the bootstrap publication interval.
    pub fn with_bootstrap_interval(mut self, interval: Duration) -> Self {
        self.bootstrap_interval = interval;
        self
    }

    /// Sets the bootstrap chunk upload fan-out.
    pub fn with_bootstrap_fanout(mut self, fanout: usize) -> Self {
        self.bootstrap_fanout = fanout.max(1);
        self
    }

    /// Sets the per-request timeout hint.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::new("owner-1");
        assert_eq!(config.owner, "owner-1");
        assert_eq!(config.producer, None);
        assert_eq!(config.debounce_window, Duration::from_secs(2));
        assert_eq!(config.min_run_interval, Duration::from_secs(60));
        assert_eq!(config.bootstrap_fanout, 6);
    }

    #[test]
    fn builder() {
        let config = EngineConfig::new("owner-1")
            .with_producer("producer-1")
            .with_debounce_window(Duration::from_millis(100))
            .with_max_chunk_bytes(1024)
            .with_bootstrap_fanout(0);

        assert_eq!(config.producer.as_deref(), Some("producer-1"));
        assert_eq!(config.debounce_window, Duration::from_millis(100));
        assert_eq!(config.max_chunk_bytes, 1024);
        // Fan-out is clamped to at least one upload per batch.
        assert_eq!(config.bootstrap_fanout, 1);
    }
}
