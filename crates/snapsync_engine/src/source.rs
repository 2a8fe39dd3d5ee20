//! The local record source seam.

use crate::error::EngineResult;
use parking_lot::RwLock;
use snapsync_protocol::{Record, StoreKind};
use std::collections::BTreeMap;

/// Ordered, resumable iteration over a local store.
///
/// This is the interface the data-owning collaborator (the wallet engine)
/// must provide. Iteration order must be stable across calls for the same
/// source state; the exporter resumes by passing the last key it saw.
pub trait RecordSource: Send + Sync {
    /// Returns up to `limit` records of `store` with keys strictly after
    /// `after`, in key order. `None` starts from the beginning.
    fn read_batch(
        &self,
        store: StoreKind,
        after: Option<&[u8]>,
        limit: usize,
    ) -> EngineResult<Vec<Record>>;
}

/// An in-memory record source for tests and examples.
#[derive(Debug, Default)]
pub struct MemoryRecordSource {
    stores: RwLock<BTreeMap<StoreKind, BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryRecordSource {
    /// Creates an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a record.
    pub fn insert(&self, store: StoreKind, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.stores
            .write()
            .entry(store)
            .or_default()
            .insert(key.into(), value.into());
    }

    /// Returns the number of records in a store.
    pub fn len(&self, store: StoreKind) -> usize {
        self.stores.read().get(&store).map_or(0, |m| m.len())
    }

    /// Returns true if the store holds no records.
    pub fn is_empty(&self, store: StoreKind) -> bool {
        self.len(store) == 0
    }
}

impl RecordSource for MemoryRecordSource {
    fn read_batch(
        &self,
        store: StoreKind,
        after: Option<&[u8]>,
        limit: usize,
    ) -> EngineResult<Vec<Record>> {
        let stores = self.stores.read();
        let Some(map) = stores.get(&store) else {
            return Ok(Vec::new());
        };
        let iter: Box<dyn Iterator<Item = (&Vec<u8>, &Vec<u8>)>> = match after {
            Some(after) => Box::new(
                map.range(after.to_vec()..)
                    .filter(move |(k, _)| k.as_slice() > after),
            ),
            None => Box::new(map.iter()),
        };
        Ok(iter
            .take(limit)
            .map(|(k, v)| Record::new(k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_batch_pages_in_key_order() {
        let source = MemoryRecordSource::new();
        for i in [3u8, 1, 2, 5, 4] {
            source.insert(StoreKind::Notes, vec![i], vec![i * 10]);
        }

        let first = source.read_batch(StoreKind::Notes, None, 2).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].key, vec![1]);
        assert_eq!(first[1].key, vec![2]);

        let rest = source
            .read_batch(StoreKind::Notes, Some(&first[1].key), 10)
            .unwrap();
        assert_eq!(rest.len(), 3);
        assert_eq!(rest[0].key, vec![3]);
        assert_eq!(rest[2].key, vec![5]);
    }

    #[test]
    fn after_is_exclusive() {
        let source = MemoryRecordSource::new();
        source.insert(StoreKind::Notes, b"a".to_vec(), b"1".to_vec());
        source.insert(StoreKind::Notes, b"b".to_vec(), b"2".to_vec());

        let batch = source
            .read_batch(StoreKind::Notes, Some(b"a"), 10)
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].key, b"b".to_vec());
    }

    #[test]
    fn empty_store_reads_empty() {
        let source = MemoryRecordSource::new();
        assert!(source
            .read_batch(StoreKind::Artifacts, None, 10)
            .unwrap()
            .is_empty());
    }
}
