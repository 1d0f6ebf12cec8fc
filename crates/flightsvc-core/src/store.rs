//! Concurrency-safe dataset store keyed by [`DescriptorKey`].
//!
//! A single reader/writer lock guards the map. Values are `Arc<Dataset>`s that
//! are fully materialized before insertion, so a reader sees either the old or
//! the new dataset for a key and never a partial one.

use crate::dataset::Dataset;
use crate::descriptor::DescriptorKey;
use crate::error::{FlightError, Result};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

/// A stored dataset plus the metadata used to answer info queries.
#[derive(Debug, Clone)]
pub struct StoreEntry {
    pub dataset: Arc<Dataset>,
    pub total_records: u64,
    /// Serialized size estimate, computed once on put.
    pub total_bytes: u64,
}

impl StoreEntry {
    fn new(dataset: Arc<Dataset>) -> Self {
        Self {
            total_records: dataset.num_rows() as u64,
            total_bytes: dataset.encoded_size(),
            dataset,
        }
    }
}

/// In-memory map from descriptor keys to datasets.
#[derive(Debug, Default)]
pub struct DatasetStore {
    entries: RwLock<HashMap<DescriptorKey, StoreEntry>>,
}

impl DatasetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or fully replace the dataset stored under `key`.
    pub fn put(&self, key: DescriptorKey, dataset: impl Into<Arc<Dataset>>) {
        let dataset = dataset.into();
        info!("adding key: {}", key);
        info!(
            "{} has {} rows and {} columns",
            key,
            dataset.num_rows(),
            dataset.num_columns()
        );

        // Size estimate is computed outside the lock
        let entry = StoreEntry::new(dataset);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, entry);
    }

    /// Get a shared handle to the dataset stored under `key`.
    pub fn get(&self, key: &DescriptorKey) -> Result<Arc<Dataset>> {
        self.entry(key)
            .map(|e| e.dataset)
            .ok_or_else(|| FlightError::NotFound {
                key: key.to_string(),
            })
    }

    /// Get the entry (dataset plus metadata) stored under `key`.
    pub fn entry(&self, key: &DescriptorKey) -> Option<StoreEntry> {
        let entry = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned();
        if entry.is_none() {
            debug!("lookup miss for {}", key);
        }
        entry
    }

    /// Enumerate a snapshot of all entries, ordered by key.
    ///
    /// The key set is captured up front; entries added afterwards are not
    /// reported and no entry is reported twice.
    pub fn list(&self) -> impl Iterator<Item = (DescriptorKey, StoreEntry)> {
        let mut snapshot: Vec<(DescriptorKey, StoreEntry)> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        snapshot.sort_by(|a, b| a.0.cmp(&b.0));
        snapshot.into_iter()
    }

    /// Remove the entry under `key`. Not reachable from the protocol surface.
    pub fn remove(&self, key: &DescriptorKey) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Column;
    use crate::descriptor::Descriptor;

    fn table(rows: usize) -> Dataset {
        let values: Vec<i64> = (0..rows as i64).collect();
        Dataset::from_columns(vec![
            ("id", Column::from(values.clone())),
            ("value", Column::from(values)),
        ])
        .unwrap()
    }

    #[test]
    fn test_put_then_get() {
        let store = DatasetStore::new();
        let key = Descriptor::for_command("stocks").key();
        store.put(key.clone(), table(3));

        let ds = store.get(&key).unwrap();
        assert_eq!(ds.num_rows(), 3);
        assert_eq!(ds.num_columns(), 2);
    }

    #[test]
    fn test_second_put_replaces() {
        let store = DatasetStore::new();
        let key = Descriptor::for_command("stocks").key();
        store.put(key.clone(), table(3));
        store.put(key.clone(), table(7));

        assert_eq!(store.get(&key).unwrap().num_rows(), 7);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let store = DatasetStore::new();
        let key = Descriptor::for_path(["nope"]).key();
        assert!(matches!(store.get(&key), Err(FlightError::NotFound { .. })));
    }

    #[test]
    fn test_list_snapshot() {
        let store = DatasetStore::new();
        assert_eq!(store.list().count(), 0);

        for i in 0..4 {
            store.put(Descriptor::for_path([format!("t{}", i)]).key(), table(i + 1));
        }
        let listed = store.list();
        // Added after the snapshot was taken
        store.put(Descriptor::for_command("late").key(), table(1));

        let rows: Vec<u64> = listed.map(|(_, e)| e.total_records).collect();
        assert_eq!(rows, vec![1, 2, 3, 4]);
        assert_eq!(store.list().count(), 5);
    }

    #[test]
    fn test_entry_metadata() {
        let store = DatasetStore::new();
        let key = Descriptor::for_command("m").key();
        let ds = table(5);
        let expected_bytes = ds.encoded_size();
        store.put(key.clone(), ds);

        let entry = store.entry(&key).unwrap();
        assert_eq!(entry.total_records, 5);
        assert_eq!(entry.total_bytes, expected_bytes);
    }

    #[test]
    fn test_remove() {
        let store = DatasetStore::new();
        let key = Descriptor::for_command("gone").key();
        store.put(key.clone(), table(1));
        assert!(store.remove(&key));
        assert!(!store.remove(&key));
        assert!(store.is_empty());
    }

    #[test]
    fn test_concurrent_readers_never_see_partial_values() {
        let store = Arc::new(DatasetStore::new());
        let key = Descriptor::for_command("hot").key();
        store.put(key.clone(), table(10));

        let writers: Vec<_> = (0..4)
            .map(|i| {
                let store = store.clone();
                let key = key.clone();
                std::thread::spawn(move || {
                    for n in 0..50 {
                        store.put(key.clone(), table(10 + (i * 50 + n) % 7));
                    }
                })
            })
            .collect();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                let key = key.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let ds = store.get(&key).unwrap();
                        for column in ds.columns() {
                            assert_eq!(column.len(), ds.num_rows());
                        }
                    }
                })
            })
            .collect();

        for handle in writers.into_iter().chain(readers) {
            handle.join().unwrap();
        }
    }
}
