//! RedbStateStore: redb-backed scale state, one row per resource group.
//!
//! redb serializes write transactions, so `compare_and_swap` is atomic for
//! every handle sharing the database. The file lock redb takes on open
//! keeps a second process from opening the same database.

use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::file::ScaleRecord;
use crate::tables::SCALE_STATE;
use crate::{ScaleStateStore, same_instant};

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe scale state store backed by redb.
#[derive(Clone)]
pub struct RedbStateStore {
    db: Arc<Database>,
    key: String,
}

impl RedbStateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path, key: &str) -> StateResult<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(map_err!(Open))?;
        }
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self {
            db: Arc::new(db),
            key: key.to_string(),
        };
        store.ensure_tables()?;
        debug!(?path, key, "scale state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory(key: &str) -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self {
            db: Arc::new(db),
            key: key.to_string(),
        };
        store.ensure_tables()?;
        Ok(store)
    }

    /// Another handle on the same database for a different resource group.
    pub fn for_key(&self, key: &str) -> Self {
        Self {
            db: Arc::clone(&self.db),
            key: key.to_string(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(SCALE_STATE).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }
}

impl ScaleStateStore for RedbStateStore {
    fn get_last_scale(&self) -> StateResult<Option<SystemTime>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SCALE_STATE).map_err(map_err!(Table))?;
        match table.get(self.key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => ScaleRecord::decode(guard.value())?.last_scale_time(),
            None => Ok(None),
        }
    }

    fn put_last_scale(&self, at: SystemTime) -> StateResult<()> {
        let value = ScaleRecord::at(at).encode()?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SCALE_STATE).map_err(map_err!(Table))?;
            table
                .insert(self.key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(key = %self.key, "scale state stored");
        Ok(())
    }

    fn compare_and_swap(&self, expected: Option<SystemTime>, new: SystemTime) -> StateResult<bool> {
        let value = ScaleRecord::at(new).encode()?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let swapped;
        {
            let mut table = txn.open_table(SCALE_STATE).map_err(map_err!(Table))?;
            let current = match table.get(self.key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => ScaleRecord::decode(guard.value())
                    .and_then(|r| r.last_scale_time())
                    .unwrap_or(None),
                None => None,
            };
            swapped = same_instant(current, expected);
            if swapped {
                table
                    .insert(self.key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        if swapped {
            txn.commit().map_err(map_err!(Transaction))?;
        } else {
            txn.abort().map_err(map_err!(Transaction))?;
        }
        Ok(swapped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn empty_store_is_never_scaled() {
        let store = RedbStateStore::open_in_memory("default").unwrap();
        assert!(store.get_last_scale().unwrap().is_none());
    }

    #[test]
    fn put_and_get() {
        let store = RedbStateStore::open_in_memory("default").unwrap();
        store.put_last_scale(at(1000)).unwrap();
        assert_eq!(store.get_last_scale().unwrap(), Some(at(1000)));

        store.put_last_scale(at(1600)).unwrap();
        assert_eq!(store.get_last_scale().unwrap(), Some(at(1600)));
    }

    #[test]
    fn keys_are_independent() {
        let store = RedbStateStore::open_in_memory("workers").unwrap();
        let other = store.for_key("ingest");

        store.put_last_scale(at(1000)).unwrap();
        assert_eq!(store.get_last_scale().unwrap(), Some(at(1000)));
        assert!(other.get_last_scale().unwrap().is_none());
        assert_eq!(other.key(), "ingest");
    }

    #[test]
    fn compare_and_swap_is_exclusive() {
        let store = RedbStateStore::open_in_memory("default").unwrap();
        let racer = store.clone();

        // Both observed "never scaled"; only one may win.
        assert!(store.compare_and_swap(None, at(100)).unwrap());
        assert!(!racer.compare_and_swap(None, at(101)).unwrap());
        assert_eq!(store.get_last_scale().unwrap(), Some(at(100)));

        assert!(racer.compare_and_swap(Some(at(100)), at(700)).unwrap());
        assert_eq!(store.get_last_scale().unwrap(), Some(at(700)));
    }

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("scale_state.redb");

        {
            let store = RedbStateStore::open(&db_path, "prod").unwrap();
            store.put_last_scale(at(5000)).unwrap();
        }

        let store = RedbStateStore::open(&db_path, "prod").unwrap();
        assert_eq!(store.get_last_scale().unwrap(), Some(at(5000)));
    }

    #[test]
    fn out_of_range_row_is_a_read_error_and_is_replaced() {
        let store = RedbStateStore::open_in_memory("prod").unwrap();
        let txn = store.db.begin_write().unwrap();
        {
            let mut table = txn.open_table(SCALE_STATE).unwrap();
            table
                .insert("prod", br#"{"last_scale": 1e300}"#.as_slice())
                .unwrap();
        }
        txn.commit().unwrap();

        assert!(matches!(
            store.get_last_scale(),
            Err(StateError::Deserialize(_))
        ));
        assert!(store.compare_and_swap(None, at(100)).unwrap());
        assert_eq!(store.get_last_scale().unwrap(), Some(at(100)));
    }
}
