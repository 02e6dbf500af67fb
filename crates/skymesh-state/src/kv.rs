//! KvStore — redb-backed ordered string→string store.
//!
//! All records are UTF-8 JSON strings in a single table. Prefix scans
//! come from redb's key-ordered iteration. There are no cross-key
//! transactions; higher layers reconcile partial multi-key writes with
//! idempotent puts.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{StateError, StateResult};

const RECORDS: TableDefinition<&str, &str> = TableDefinition::new("records");

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe ordered key-value store backed by redb.
#[derive(Clone)]
pub struct KvStore {
    db: Arc<Database>,
}

impl KvStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_table()?;
        debug!(?path, "kv store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_table()?;
        debug!("in-memory kv store opened");
        Ok(store)
    }

    /// Create the table if it doesn't exist yet.
    fn ensure_table(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(RECORDS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get the value stored under a key.
    pub fn get(&self, key: &str) -> StateResult<Option<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RECORDS).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(guard.value().to_string())),
            None => Ok(None),
        }
    }

    /// Insert or replace a value (last writer wins).
    pub fn put(&self, key: &str, value: &str) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(RECORDS).map_err(map_err!(Table))?;
            table.insert(key, value).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Insert a value only if the key is absent. Returns whether the
    /// value was written. The check and the insert share one write
    /// transaction.
    pub fn put_if_absent(&self, key: &str, value: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let written;
        {
            let mut table = txn.open_table(RECORDS).map_err(map_err!(Table))?;
            let exists = table.get(key).map_err(map_err!(Read))?.is_some();
            if exists {
                written = false;
            } else {
                table.insert(key, value).map_err(map_err!(Write))?;
                written = true;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(written)
    }

    /// Delete a key. Returns true if it existed.
    pub fn delete(&self, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(RECORDS).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    /// List all `(key, value)` pairs under a prefix, ordered by key.
    pub fn list(&self, prefix: &str) -> StateResult<Vec<(String, String)>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RECORDS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.range(prefix..).map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(prefix) {
                break;
            }
            results.push((key.value().to_string(), value.value().to_string()));
        }
        Ok(results)
    }

    /// Delete every key under a prefix. Returns the number removed.
    pub fn delete_prefix(&self, prefix: &str) -> StateResult<u32> {
        let keys: Vec<String> = self
            .list(prefix)?
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(RECORDS).map_err(map_err!(Table))?;
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(keys.len() as u32)
    }

    // ── JSON record helpers ────────────────────────────────────────

    /// Get and decode a JSON record.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> StateResult<Option<T>> {
        match self.get(key)? {
            Some(value) => {
                let record =
                    serde_json::from_str(&value).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Get and decode a JSON record; a value that fails decoding (or is
    /// empty) is deleted and reported as absent.
    pub fn get_json_or_evict<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> StateResult<Option<T>> {
        let Some(value) = self.get(key)? else {
            return Ok(None);
        };
        if value.is_empty() {
            warn!(%key, "empty record evicted");
            self.delete(key)?;
            return Ok(None);
        }
        match serde_json::from_str(&value) {
            Ok(record) => Ok(Some(record)),
            Err(err) => {
                warn!(%key, error = %err, "corrupted record evicted");
                self.delete(key)?;
                Ok(None)
            }
        }
    }

    /// Encode and store a JSON record.
    pub fn put_json<T: Serialize>(&self, key: &str, record: &T) -> StateResult<()> {
        let value = serde_json::to_string(record).map_err(map_err!(Serialize))?;
        self.put(key, &value)
    }

    /// Encode and store a JSON record only if the key is absent.
    pub fn put_json_if_absent<T: Serialize>(
        &self,
        key: &str,
        record: &T,
    ) -> StateResult<bool> {
        let value = serde_json::to_string(record).map_err(map_err!(Serialize))?;
        self.put_if_absent(key, &value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Probe {
        name: String,
        count: u32,
    }

    #[test]
    fn put_and_get() {
        let store = KvStore::open_in_memory().unwrap();
        store.put("/a", "one").unwrap();
        assert_eq!(store.get("/a").unwrap(), Some("one".to_string()));
        assert_eq!(store.get("/missing").unwrap(), None);
    }

    #[test]
    fn put_is_last_writer_wins() {
        let store = KvStore::open_in_memory().unwrap();
        store.put("/a", "one").unwrap();
        store.put("/a", "two").unwrap();
        assert_eq!(store.get("/a").unwrap(), Some("two".to_string()));
    }

    #[test]
    fn put_if_absent_respects_existing() {
        let store = KvStore::open_in_memory().unwrap();
        assert!(store.put_if_absent("/a", "one").unwrap());
        assert!(!store.put_if_absent("/a", "two").unwrap());
        assert_eq!(store.get("/a").unwrap(), Some("one".to_string()));
    }

    #[test]
    fn delete_reports_existence() {
        let store = KvStore::open_in_memory().unwrap();
        store.put("/a", "one").unwrap();
        assert!(store.delete("/a").unwrap());
        assert!(!store.delete("/a").unwrap());
        assert_eq!(store.get("/a").unwrap(), None);
    }

    #[test]
    fn list_is_ordered_and_prefix_scoped() {
        let store = KvStore::open_in_memory().unwrap();
        store.put("/ns/demo/mci/m1/vm/v-2", "b").unwrap();
        store.put("/ns/demo/mci/m1/vm/v-1", "a").unwrap();
        store.put("/ns/demo/mci/m1/subgroup/v", "s").unwrap();
        store.put("/ns/other/mci/m1/vm/v-1", "x").unwrap();

        let entries = store.list("/ns/demo/mci/m1/").unwrap();
        let keys: Vec<&str> = entries.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "/ns/demo/mci/m1/subgroup/v",
                "/ns/demo/mci/m1/vm/v-1",
                "/ns/demo/mci/m1/vm/v-2",
            ]
        );
    }

    #[test]
    fn delete_prefix_removes_descendants_only() {
        let store = KvStore::open_in_memory().unwrap();
        store.put("/ns/demo/mci/m1", "root").unwrap();
        store.put("/ns/demo/mci/m1/vm/v-1", "a").unwrap();
        store.put("/ns/demo/mci/m10", "other").unwrap();

        let removed = store.delete_prefix("/ns/demo/mci/m1/").unwrap();
        assert_eq!(removed, 1);
        assert!(store.get("/ns/demo/mci/m1").unwrap().is_some());
        assert!(store.get("/ns/demo/mci/m10").unwrap().is_some());
    }

    #[test]
    fn json_round_trip() {
        let store = KvStore::open_in_memory().unwrap();
        let record = Probe {
            name: "vm".to_string(),
            count: 3,
        };
        store.put_json("/probe", &record).unwrap();
        let loaded: Probe = store.get_json("/probe").unwrap().unwrap();
        assert_eq!(loaded, record);
    }

    #[test]
    fn corrupted_record_is_evicted() {
        let store = KvStore::open_in_memory().unwrap();
        store.put("/probe", "{not json").unwrap();
        let loaded: Option<Probe> = store.get_json_or_evict("/probe").unwrap();
        assert!(loaded.is_none());
        // The offending key was deleted, not just skipped.
        assert_eq!(store.get("/probe").unwrap(), None);
    }

    #[test]
    fn empty_record_is_evicted() {
        let store = KvStore::open_in_memory().unwrap();
        store.put("/probe", "").unwrap();
        let loaded: Option<Probe> = store.get_json_or_evict("/probe").unwrap();
        assert!(loaded.is_none());
        assert_eq!(store.get("/probe").unwrap(), None);
    }

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("state.redb");

        {
            let store = KvStore::open(&db_path).unwrap();
            store.put("/a", "one").unwrap();
        }

        let store = KvStore::open(&db_path).unwrap();
        assert_eq!(store.get("/a").unwrap(), Some("one".to_string()));
    }
}
