//! Chain discovery and scan bookkeeping.

use crate::error::EngineResult;
use crate::source::RecordSource;
use crate::transport::CacheTransport;
use snapsync_protocol::{ChainId, StoreKind};
use snapsync_state::SyncStateStore;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Known chains in scan-priority order: mainnet first, then the high-volume
/// L2s and sidechains.
const PRIORITY: &[(u64, u8)] = &[
    (1, 0),
    (137, 1),
    (56, 2),
    (42161, 3),
    (10, 4),
    (8453, 5),
];

/// Chains probed during discovery when no local knowledge exists.
pub const KNOWN_CHAINS: &[u64] = &[1, 137, 56, 42161, 10, 8453];

fn rank(chain: ChainId) -> u8 {
    PRIORITY
        .iter()
        .find(|(id, _)| *id == chain.0)
        .map_or(u8::MAX, |(_, r)| *r)
}

/// Sorts chains by scan priority, unknown chains last by id.
pub fn sort_chains_by_priority(chains: &mut [ChainId]) {
    chains.sort_by_key(|&c| (rank(c), c.0));
}

/// Scan state of a chain for an owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainScanStatus {
    /// The chain has been scanned for this owner.
    Scanned,
    /// The chain has not been scanned.
    Unscanned,
}

/// Tracks which chains an owner has scanned.
///
/// Discovery is layered: the persisted chain set is authoritative; when it
/// is empty, remote bootstrap probes and then local wallet records fill it
/// in. Every discovery is persisted so later calls stay local.
pub struct ChainManager {
    state: SyncStateStore,
    transport: Arc<dyn CacheTransport>,
    source: Arc<dyn RecordSource>,
}

impl ChainManager {
    /// Creates a chain manager.
    pub fn new(
        state: SyncStateStore,
        transport: Arc<dyn CacheTransport>,
        source: Arc<dyn RecordSource>,
    ) -> Self {
        Self {
            state,
            transport,
            source,
        }
    }

    /// Records that `chain` has been scanned for `owner`.
    pub fn mark_chain_scanned(&self, owner: &str, chain: ChainId) {
        self.state.add_chain(owner, chain);
    }

    /// Returns the scan status of one chain.
    pub fn chain_scan_status(&self, owner: &str, chain: ChainId) -> EngineResult<ChainScanStatus> {
        if self.scanned_chains(owner)?.contains(&chain) {
            Ok(ChainScanStatus::Scanned)
        } else {
            Ok(ChainScanStatus::Unscanned)
        }
    }

    /// Returns the owner's scanned chains in priority order.
    ///
    /// Falls back to discovery when nothing is persisted: first remote
    /// bootstrap probes over [`KNOWN_CHAINS`], then a scan of local wallet
    /// records. Discovered chains are persisted.
    pub fn scanned_chains(&self, owner: &str) -> EngineResult<Vec<ChainId>> {
        let cached = self.state.chain_set(owner);
        if !cached.is_empty() {
            let mut chains: Vec<ChainId> = cached.into_iter().collect();
            sort_chains_by_priority(&mut chains);
            return Ok(chains);
        }

        let mut discovered = self.probe_remote(owner)?;
        if discovered.is_empty() {
            discovered = self.scan_wallet_records(owner)?;
        }

        let mut chains: Vec<ChainId> = discovered.into_iter().collect();
        sort_chains_by_priority(&mut chains);
        Ok(chains)
    }

    fn probe_remote(&self, owner: &str) -> EngineResult<BTreeSet<ChainId>> {
        let mut found = BTreeSet::new();
        for &id in KNOWN_CHAINS {
            let chain = ChainId(id);
            if self.transport.chain_bootstrap_exists(chain)? {
                self.state.add_chain(owner, chain);
                found.insert(chain);
            }
        }
        if !found.is_empty() {
            debug!(owner, chains = found.len(), "chains discovered via bootstrap probes");
        }
        Ok(found)
    }

    fn scan_wallet_records(&self, owner: &str) -> EngineResult<BTreeSet<ChainId>> {
        let mut found = BTreeSet::new();
        let mut after: Option<Vec<u8>> = None;
        loop {
            let batch = self
                .source
                .read_batch(StoreKind::WalletRecords, after.as_deref(), 500)?;
            let n = batch.len();
            if n == 0 {
                break;
            }
            after = batch.last().map(|r| r.key.clone());
            for record in &batch {
                if let Some(chain) = parse_chain_key(&record.key) {
                    if found.insert(chain) {
                        self.state.add_chain(owner, chain);
                    }
                }
            }
            if n < 500 {
                break;
            }
        }
        if !found.is_empty() {
            debug!(owner, chains = found.len(), "chains discovered from wallet records");
        }
        Ok(found)
    }
}

/// Extracts the chain id from a wallet record key of the form
/// `chain:<id>:<rest>`.
fn parse_chain_key(key: &[u8]) -> Option<ChainId> {
    let text = std::str::from_utf8(key).ok()?;
    let rest = text.strip_prefix("chain:")?;
    let (id, _) = rest.split_once(':')?;
    ChainId::parse_lenient(id).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryRecordSource;
    use crate::transport::MemoryCache;
    use snapsync_state::InMemoryBackend;

    fn manager() -> (ChainManager, Arc<MemoryCache>, Arc<MemoryRecordSource>) {
        let state = SyncStateStore::new(Arc::new(InMemoryBackend::new()));
        let cache = Arc::new(MemoryCache::new());
        let source = Arc::new(MemoryRecordSource::new());
        (
            ChainManager::new(state, cache.clone(), source.clone()),
            cache,
            source,
        )
    }

    #[test]
    fn priority_order() {
        let mut chains = vec![ChainId(8453), ChainId(999), ChainId(1), ChainId(137)];
        sort_chains_by_priority(&mut chains);
        assert_eq!(
            chains,
            vec![ChainId(1), ChainId(137), ChainId(8453), ChainId(999)]
        );
    }

    #[test]
    fn persisted_set_wins() {
        let (manager, cache, _) = manager();
        // A remote probe would also find chain 56, but the persisted set is
        // authoritative once non-empty.
        cache.set_chain_bootstrap(ChainId(56));
        manager.mark_chain_scanned("owner-1", ChainId(137));
        manager.mark_chain_scanned("owner-1", ChainId(1));

        let chains = manager.scanned_chains("owner-1").unwrap();
        assert_eq!(chains, vec![ChainId(1), ChainId(137)]);
    }

    #[test]
    fn remote_probe_discovers_and_persists() {
        let (manager, cache, _) = manager();
        cache.set_chain_bootstrap(ChainId(1));
        cache.set_chain_bootstrap(ChainId(42161));

        let chains = manager.scanned_chains("owner-1").unwrap();
        assert_eq!(chains, vec![ChainId(1), ChainId(42161)]);
        assert_eq!(
            manager.chain_scan_status("owner-1", ChainId(42161)).unwrap(),
            ChainScanStatus::Scanned
        );
        assert_eq!(
            manager.chain_scan_status("owner-1", ChainId(137)).unwrap(),
            ChainScanStatus::Unscanned
        );
    }

    #[test]
    fn wallet_records_discover_chains() {
        let (manager, _, source) = manager();
        source.insert(
            StoreKind::WalletRecords,
            b"chain:137:account:0xabc".to_vec(),
            vec![1],
        );
        source.insert(
            StoreKind::WalletRecords,
            b"chain:1:account:0xdef".to_vec(),
            vec![2],
        );
        source.insert(StoreKind::WalletRecords, b"meta:version".to_vec(), vec![3]);

        let chains = manager.scanned_chains("owner-1").unwrap();
        assert_eq!(chains, vec![ChainId(1), ChainId(137)]);
    }

    #[test]
    fn chain_key_parsing() {
        assert_eq!(parse_chain_key(b"chain:137:x"), Some(ChainId(137)));
        assert_eq!(parse_chain_key(b"chain:0x89:x"), Some(ChainId(137)));
        assert_eq!(parse_chain_key(b"chain:137"), None);
        assert_eq!(parse_chain_key(b"balance:137:x"), None);
        assert_eq!(parse_chain_key(&[0xFF, 0xFE]), None);
    }
}
