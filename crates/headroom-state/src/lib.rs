//! headroom-state: durable scale decision state.
//!
//! Persists a single record per managed resource group: the time of the
//! last successful scale-up. The [`CooldownGate`] reads it on every
//! decision and overwrites it after each successful provisioning action.
//!
//! # Backends
//!
//! ```text
//! ScaleStateStore (get / put / compare_and_swap)
//!   ├── FileStateStore   {"last_scale": <unix secs>}, temp file + rename
//!   ├── RedbStateStore   redb table keyed by resource group
//!   └── MemoryStateStore tests
//! ```
//!
//! A crash between a successful apply and `record_scale` loses the record;
//! the next overload after restart may then scale once more than intended.
//! That window is accepted rather than papered over.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use headroom_core::config::StateBackend;

pub mod error;
pub mod file;
pub mod gate;
pub mod memory;
pub mod redb_store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use file::FileStateStore;
pub use gate::CooldownGate;
pub use memory::MemoryStateStore;
pub use redb_store::RedbStateStore;

/// Narrow durable key-value interface over the last-scale record.
///
/// Implementations must make `put_last_scale` atomic with respect to
/// concurrent readers: a reader sees either the old or the new record.
pub trait ScaleStateStore: Send + Sync {
    /// Time of the last successful scale, `None` if never scaled.
    fn get_last_scale(&self) -> StateResult<Option<SystemTime>>;

    /// Overwrite the record.
    fn put_last_scale(&self, at: SystemTime) -> StateResult<()>;

    /// Write `new` only if the stored value still equals `expected`.
    /// Returns false when another writer got there first.
    fn compare_and_swap(&self, expected: Option<SystemTime>, new: SystemTime) -> StateResult<bool>;
}

/// Open the configured backend.
pub fn open_store(
    backend: StateBackend,
    path: &Path,
    key: &str,
) -> StateResult<Arc<dyn ScaleStateStore>> {
    Ok(match backend {
        StateBackend::File => Arc::new(FileStateStore::new(path)),
        StateBackend::Redb => Arc::new(RedbStateStore::open(path, key)?),
    })
}

/// Timestamps go through an f64 of unix seconds on disk; compare with a
/// millisecond tolerance.
pub(crate) fn same_instant(a: Option<SystemTime>, b: Option<SystemTime>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => {
            let diff = match a.duration_since(b) {
                Ok(d) => d,
                Err(e) => e.duration(),
            };
            diff < Duration::from_millis(1)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    #[test]
    fn same_instant_tolerates_float_round_trip() {
        let t = UNIX_EPOCH + Duration::from_nanos(1_700_000_000_123_456_789);
        let rt = headroom_core::from_unix_secs(headroom_core::unix_secs(t)).unwrap();
        assert!(same_instant(Some(t), Some(rt)));
        assert!(same_instant(None, None));
        assert!(!same_instant(Some(t), None));
        assert!(!same_instant(Some(t), Some(t + Duration::from_secs(1))));
    }

    #[test]
    fn open_store_selects_backend() {
        let dir = tempfile::tempdir().unwrap();
        let file = open_store(StateBackend::File, &dir.path().join("s.json"), "g").unwrap();
        assert!(file.get_last_scale().unwrap().is_none());

        let redb = open_store(StateBackend::Redb, &dir.path().join("s.redb"), "g").unwrap();
        assert!(redb.get_last_scale().unwrap().is_none());
    }
}
