//! In-memory [`KeyValueStore`] implementation.
//!
//! A `BTreeMap` behind a single `RwLock`: ordered keys make prefix scans a
//! range walk, and holding the write lock for a whole batch gives the atomic
//! multi-op guarantee for free. Suitable for tests and for platforms that
//! persist elsewhere.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use super::kv::{KeyValueStore, StoreError, WriteOp};

/// Non-durable store backed by an ordered map.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryKvStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KeyValueStore for MemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let entries = self.entries.read();
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn write_batch(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        let mut entries = self.entries.write();
        for op in ops {
            match op {
                WriteOp::Put { key, value } => {
                    entries.insert(key, value);
                }
                WriteOp::Delete { key } => {
                    entries.remove(&key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete_round_trip() {
        let store = MemoryKvStore::new();
        assert_eq!(store.get("k").unwrap(), None);

        store.put("k", vec![1, 2, 3]).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(vec![1, 2, 3]));

        store.delete("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
        assert!(store.is_empty());
    }

    #[test]
    fn scan_prefix_returns_only_matching_keys_in_order() {
        let store = MemoryKvStore::new();
        store.put("a/2", vec![2]).unwrap();
        store.put("a/1", vec![1]).unwrap();
        store.put("b/1", vec![9]).unwrap();
        store.put("a", vec![0]).unwrap();

        let rows = store.scan_prefix("a/").unwrap();
        let keys: Vec<&str> = rows.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["a/1", "a/2"]);
    }

    #[test]
    fn scan_prefix_empty_prefix_returns_everything() {
        let store = MemoryKvStore::new();
        store.put("x", vec![1]).unwrap();
        store.put("y", vec![2]).unwrap();
        assert_eq!(store.scan_prefix("").unwrap().len(), 2);
    }

    #[test]
    fn write_batch_applies_all_ops() {
        let store = MemoryKvStore::new();
        store.put("stale", vec![0]).unwrap();

        store
            .write_batch(vec![
                WriteOp::put("a", vec![1]),
                WriteOp::put("b", vec![2]),
                WriteOp::delete("stale"),
            ])
            .unwrap();

        assert_eq!(store.get("a").unwrap(), Some(vec![1]));
        assert_eq!(store.get("b").unwrap(), Some(vec![2]));
        assert_eq!(store.get("stale").unwrap(), None);
        assert_eq!(store.len(), 2);
    }
}
