//! FileStateStore: the `{"last_scale": <unix timestamp>}` JSON document.
//!
//! Writes land in a sibling temp file that is fsynced and renamed over the
//! target, so a concurrent reader never observes a torn record. A missing
//! file means "never scaled".

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::debug;

use headroom_core::{from_unix_secs, unix_secs};

use crate::error::{StateError, StateResult};
use crate::{ScaleStateStore, same_instant};

/// On-disk shape of the record, shared with the redb backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub(crate) struct ScaleRecord {
    #[serde(default)]
    pub last_scale: Option<f64>,
}

impl ScaleRecord {
    pub(crate) fn at(t: SystemTime) -> Self {
        Self {
            last_scale: Some(unix_secs(t)),
        }
    }

    /// A timestamp outside the clock's range is as malformed as bad JSON.
    pub(crate) fn last_scale_time(&self) -> StateResult<Option<SystemTime>> {
        match self.last_scale {
            None => Ok(None),
            Some(secs) => from_unix_secs(secs).map(Some).ok_or_else(|| {
                StateError::Deserialize(format!("last_scale {secs} is not a valid timestamp"))
            }),
        }
    }

    pub(crate) fn decode(bytes: &[u8]) -> StateResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| StateError::Deserialize(e.to_string()))
    }

    pub(crate) fn encode(&self) -> StateResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| StateError::Serialize(e.to_string()))
    }
}

/// Single-file JSON store.
///
/// `compare_and_swap` is serialized within this process only; two daemons
/// pointed at the same file can still race.
pub struct FileStateStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_record(&self) -> StateResult<ScaleRecord> {
        match fs::read(&self.path) {
            Ok(bytes) => ScaleRecord::decode(&bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(ScaleRecord::default()),
            Err(e) => Err(StateError::Read(format!("{}: {e}", self.path.display()))),
        }
    }

    fn write_record(&self, record: &ScaleRecord) -> StateResult<()> {
        let bytes = record.encode()?;
        let write_err = |e: std::io::Error| StateError::Write(format!("{}: {e}", self.path.display()));

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(write_err)?;
        }

        let tmp = self.tmp_path();
        {
            let mut file = fs::File::create(&tmp).map_err(write_err)?;
            file.write_all(&bytes).map_err(write_err)?;
            file.sync_all().map_err(write_err)?;
        }
        fs::rename(&tmp, &self.path).map_err(write_err)?;
        debug!(path = ?self.path, "scale state written");
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "scale_state.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl ScaleStateStore for FileStateStore {
    fn get_last_scale(&self) -> StateResult<Option<SystemTime>> {
        self.read_record()?.last_scale_time()
    }

    fn put_last_scale(&self, at: SystemTime) -> StateResult<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|e| StateError::Write(e.to_string()))?;
        self.write_record(&ScaleRecord::at(at))
    }

    fn compare_and_swap(&self, expected: Option<SystemTime>, new: SystemTime) -> StateResult<bool> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|e| StateError::Write(e.to_string()))?;
        // A corrupt record is replaced rather than compared.
        let current = self
            .read_record()
            .and_then(|r| r.last_scale_time())
            .unwrap_or(None);
        if !same_instant(current, expected) {
            return Ok(false);
        }
        self.write_record(&ScaleRecord::at(new))?;
        Ok(true)
    }
}
