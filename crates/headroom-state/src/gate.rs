//! CooldownGate: decides whether a scale-up is currently permitted.
//!
//! ```text
//! Idle --(overload && !cooldown_active)--> Scaling
//! Scaling --(apply ok)--> Idle, record_scale(now) => cooldown active
//! Scaling --(apply failed)--> Idle, record untouched => retry allowed
//! ```

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tracing::warn;

use crate::ScaleStateStore;
use crate::error::StateResult;

/// What the gate saw when it was consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownCheck {
    /// Record as read; `None` if never scaled or unreadable.
    pub last_scale: Option<SystemTime>,
    /// Time left in the window; `None` when scaling is permitted.
    pub remaining: Option<Duration>,
}

impl CooldownCheck {
    pub fn is_active(&self) -> bool {
        self.remaining.is_some()
    }
}

/// Cooldown gate over a durable last-scale record.
#[derive(Clone)]
pub struct CooldownGate {
    store: Arc<dyn ScaleStateStore>,
    cooldown: Duration,
}

impl CooldownGate {
    pub fn new(store: Arc<dyn ScaleStateStore>, cooldown: Duration) -> Self {
        Self { store, cooldown }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Raw record, surfacing read errors.
    pub fn last_scale_time(&self) -> StateResult<Option<SystemTime>> {
        self.store.get_last_scale()
    }

    /// Read the record and compute the remaining window.
    ///
    /// An unreadable record is logged and treated as "never scaled"; it is
    /// overwritten by the next successful scale.
    pub fn check(&self, now: SystemTime) -> CooldownCheck {
        let last_scale = match self.store.get_last_scale() {
            Ok(last) => last,
            Err(e) => {
                warn!(error = %e, "scale state unreadable, treating as never scaled");
                None
            }
        };
        CooldownCheck {
            last_scale,
            remaining: last_scale.and_then(|last| remaining_window(last, self.cooldown, now)),
        }
    }

    /// True iff `now - last_scale_time < cooldown`. A missing record never
    /// blocks.
    pub fn is_cooldown_active(&self, now: SystemTime) -> bool {
        self.check(now).is_active()
    }

    /// Time left before the next scale is permitted.
    pub fn remaining(&self, now: SystemTime) -> Option<Duration> {
        self.check(now).remaining
    }

    /// Unconditionally overwrite the record with `now`.
    pub fn record_scale(&self, now: SystemTime) -> StateResult<()> {
        self.store.put_last_scale(now)
    }

    /// Overwrite the record only if it still holds what `check` observed.
    ///
    /// Returns false if another writer recorded a scale in between; their
    /// record is kept.
    pub fn record_scale_after(&self, observed: &CooldownCheck, now: SystemTime) -> StateResult<bool> {
        self.store.compare_and_swap(observed.last_scale, now)
    }
}

/// `last + cooldown - now`, or `None` once the window has passed. A record
/// in the future stays active until its own window ends.
fn remaining_window(last: SystemTime, cooldown: Duration, now: SystemTime) -> Option<Duration> {
    let deadline = last.checked_add(cooldown)?;
    deadline
        .duration_since(now)
        .ok()
        .filter(|left| !left.is_zero())
}
