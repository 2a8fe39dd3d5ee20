//! Remote hydration status checks.

use crate::transport::CacheTransport;
use snapsync_protocol::ChainId;
use std::sync::Arc;
use tracing::{debug, warn};

/// How far the remote cache has progressed for a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HydrationStatus {
    /// Scanned and fully hydrated: a consumer can bootstrap from the cache.
    Hydrated,
    /// Scanned but hydration has not completed.
    Scanned,
    /// Not scanned, or the remote could not be reached.
    NotScanned,
}

/// Queries the remote cache for per-chain hydration state.
///
/// Failures degrade to [`HydrationStatus::NotScanned`]: a consumer that
/// cannot confirm hydration must fall back to a full scan rather than
/// trust stale data.
pub struct HydrationChecker {
    transport: Arc<dyn CacheTransport>,
}

impl HydrationChecker {
    /// Creates a checker.
    pub fn new(transport: Arc<dyn CacheTransport>) -> Self {
        Self { transport }
    }

    /// Returns the hydration status of `chain` for `owner`.
    pub fn chain_hydration(&self, owner: &str, chain: ChainId) -> HydrationStatus {
        let response = match self.transport.chain_status(owner) {
            Ok(response) => response,
            Err(e) => {
                warn!(owner, %chain, error = %e, "chain status unavailable");
                return HydrationStatus::NotScanned;
            }
        };
        for entry in &response.chains {
            let Ok(id) = ChainId::parse_lenient(&entry.chain_id) else {
                debug!(raw = %entry.chain_id, "skipping malformed chain id in status");
                continue;
            };
            if id != chain {
                continue;
            }
            return if entry.hydrated {
                HydrationStatus::Hydrated
            } else if entry.scanned {
                HydrationStatus::Scanned
            } else {
                HydrationStatus::NotScanned
            };
        }
        HydrationStatus::NotScanned
    }

    /// Returns true only when the chain is fully hydrated.
    pub fn is_chain_hydrated(&self, owner: &str, chain: ChainId) -> bool {
        self.chain_hydration(owner, chain) == HydrationStatus::Hydrated
    }
}
