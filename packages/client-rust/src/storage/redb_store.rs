//! Durable [`KeyValueStore`] implementation backed by `redb`.
//!
//! A single table holds the whole key space; `write_batch` maps to one redb
//! write transaction, which supplies the atomic-batch guarantee.

use std::path::Path;

use redb::{Database, TableDefinition};

use super::kv::{KeyValueStore, StoreError, WriteOp};

const TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("chorus");

fn backend<E: std::fmt::Display>(err: E) -> StoreError {
    StoreError::Backend(err.to_string())
}

/// Durable store persisting to a single redb file.
pub struct RedbKvStore {
    db: Database,
}

impl RedbKvStore {
    /// Opens (or creates) the database at `path` and ensures the table exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the file cannot be opened or the
    /// initial transaction fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path).map_err(backend)?;
        let txn = db.begin_write().map_err(backend)?;
        txn.open_table(TABLE).map_err(backend)?;
        txn.commit().map_err(backend)?;
        Ok(Self { db })
    }
}

impl KeyValueStore for RedbKvStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let txn = self.db.begin_read().map_err(backend)?;
        let table = txn.open_table(TABLE).map_err(backend)?;
        let value = table.get(key).map_err(backend)?;
        Ok(value.map(|guard| guard.value().to_vec()))
    }

    fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.write_batch(vec![WriteOp::Put {
            key: key.to_string(),
            value,
        }])
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.write_batch(vec![WriteOp::delete(key)])
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let txn = self.db.begin_read().map_err(backend)?;
        let table = txn.open_table(TABLE).map_err(backend)?;
        let mut rows = Vec::new();
        for item in table.range(prefix..).map_err(backend)? {
            let (key, value) = item.map_err(backend)?;
            if !key.value().starts_with(prefix) {
                break;
            }
            rows.push((key.value().to_string(), value.value().to_vec()));
        }
        Ok(rows)
    }

    fn write_batch(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(backend)?;
        {
            let mut table = txn.open_table(TABLE).map_err(backend)?;
            for op in &ops {
                match op {
                    WriteOp::Put { key, value } => {
                        table
                            .insert(key.as_str(), value.as_slice())
                            .map_err(backend)?;
                    }
                    WriteOp::Delete { key } => {
                        table.remove(key.as_str()).map_err(backend)?;
                    }
                }
            }
        }
        txn.commit().map_err(backend)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, RedbKvStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbKvStore::open(dir.path().join("test.redb")).unwrap();
        (dir, store)
    }

    #[test]
    fn put_get_delete_round_trip() {
        let (_dir, store) = open_temp();

        store.put("k", vec![1, 2]).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(vec![1, 2]));

        store.delete("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn scan_prefix_is_ordered_and_bounded() {
        let (_dir, store) = open_temp();
        store.put("p/b", vec![2]).unwrap();
        store.put("p/a", vec![1]).unwrap();
        store.put("q/x", vec![9]).unwrap();

        let rows = store.scan_prefix("p/").unwrap();
        let keys: Vec<&str> = rows.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["p/a", "p/b"]);
    }

    #[test]
    fn write_batch_is_atomic_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.redb");

        {
            let store = RedbKvStore::open(&path).unwrap();
            store
                .write_batch(vec![
                    WriteOp::put("a", vec![1]),
                    WriteOp::put("b", vec![2]),
                ])
                .unwrap();
        }

        let store = RedbKvStore::open(&path).unwrap();
        assert_eq!(store.get("a").unwrap(), Some(vec![1]));
        assert_eq!(store.get("b").unwrap(), Some(vec![2]));
    }
}
