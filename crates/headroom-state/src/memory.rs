//! In-memory scale state, for tests and dry runs.

use std::sync::Mutex;
use std::time::SystemTime;

use crate::error::{StateError, StateResult};
use crate::{ScaleStateStore, same_instant};

#[derive(Debug, Default)]
pub struct MemoryStateStore {
    last_scale: Mutex<Option<SystemTime>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a record already present.
    pub fn with_last_scale(at: SystemTime) -> Self {
        Self {
            last_scale: Mutex::new(Some(at)),
        }
    }
}

impl ScaleStateStore for MemoryStateStore {
    fn get_last_scale(&self) -> StateResult<Option<SystemTime>> {
        self.last_scale
            .lock()
            .map(|guard| *guard)
            .map_err(|e| StateError::Read(e.to_string()))
    }

    fn put_last_scale(&self, at: SystemTime) -> StateResult<()> {
        let mut guard = self
            .last_scale
            .lock()
            .map_err(|e| StateError::Write(e.to_string()))?;
        *guard = Some(at);
        Ok(())
    }

    fn compare_and_swap(&self, expected: Option<SystemTime>, new: SystemTime) -> StateResult<bool> {
        let mut guard = self
            .last_scale
            .lock()
            .map_err(|e| StateError::Write(e.to_string()))?;
        if !same_instant(*guard, expected) {
            return Ok(false);
        }
        *guard = Some(new);
        Ok(true)
    }
}
