//! Store and chain identifiers.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A logical partition of local data that is mirrored independently.
///
/// The set of stores is fixed at compile time. Stores are never created or
/// destroyed at runtime; their name is their identity, both locally and on
/// the remote cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreKind {
    /// Derived artifacts (proofs, prover inputs).
    Artifacts,
    /// Merkle tree state.
    TreeState,
    /// Wallet metadata records.
    WalletRecords,
    /// Note commitments.
    Commitments,
    /// Spent-note nullifiers.
    Nullifiers,
    /// Decrypted notes.
    Notes,
}

impl StoreKind {
    /// All stores, in the fixed order used for full exports.
    pub const ALL: [StoreKind; 6] = [
        StoreKind::Artifacts,
        StoreKind::TreeState,
        StoreKind::WalletRecords,
        StoreKind::Commitments,
        StoreKind::Nullifiers,
        StoreKind::Notes,
    ];

    /// Returns the stable wire name of this store.
    pub fn name(&self) -> &'static str {
        match self {
            StoreKind::Artifacts => "artifacts",
            StoreKind::TreeState => "tree-state",
            StoreKind::WalletRecords => "wallet-records",
            StoreKind::Commitments => "commitments",
            StoreKind::Nullifiers => "nullifiers",
            StoreKind::Notes => "notes",
        }
    }

    /// Parses a store from its wire name.
    pub fn from_name(name: &str) -> Option<StoreKind> {
        StoreKind::ALL.iter().copied().find(|s| s.name() == name)
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identifier of a chain: one owner-visible partition of the record space.
///
/// In the source domain a chain corresponds to a blockchain network whose
/// records the owner has materialized locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(pub u64);

impl ChainId {
    /// Parses a chain id from a heterogeneous numeric encoding.
    ///
    /// Remote metadata mixes decimal (`"137"`) and hex (`"0x89"`) encodings;
    /// both normalize to the same id.
    pub fn parse_lenient(raw: &str) -> ProtocolResult<ChainId> {
        let raw = raw.trim();
        let parsed = if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
            u64::from_str_radix(hex, 16)
        } else {
            raw.parse::<u64>()
        };
        parsed
            .map(ChainId)
            .map_err(|e| ProtocolError::invalid_field("chain_id", format!("{raw:?}: {e}")))
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ChainId {
    fn from(id: u64) -> Self {
        ChainId(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_names_round_trip() {
        for store in StoreKind::ALL {
            assert_eq!(StoreKind::from_name(store.name()), Some(store));
        }
        assert_eq!(StoreKind::from_name("bogus"), None);
    }

    #[test]
    fn store_order_is_stable() {
        assert_eq!(StoreKind::ALL[0], StoreKind::Artifacts);
        assert_eq!(StoreKind::ALL[5], StoreKind::Notes);
    }

    #[test]
    fn chain_id_lenient_parsing() {
        assert_eq!(ChainId::parse_lenient("137").unwrap(), ChainId(137));
        assert_eq!(ChainId::parse_lenient("0x89").unwrap(), ChainId(137));
        assert_eq!(ChainId::parse_lenient("0X89").unwrap(), ChainId(137));
        assert_eq!(ChainId::parse_lenient(" 1 ").unwrap(), ChainId(1));
        assert!(ChainId::parse_lenient("banana").is_err());
        assert!(ChainId::parse_lenient("0x").is_err());
        assert!(ChainId::parse_lenient("").is_err());
    }

    #[test]
    fn chain_id_display() {
        assert_eq!(ChainId(137).to_string(), "137");
    }
}
