//! ProvisioningDriver: cooldown-gated, single-flight scale-up.
//!
//! Checks the cooldown window, then reads the authoritative desired size
//! from the provisioner, applies `current + 1` (capped), and records the
//! scale time only once the apply has succeeded.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use headroom_core::config::ScalingConfig;
use headroom_core::format_duration;
use headroom_provision::{ProvisionError, Provisioner};
use headroom_state::CooldownGate;

/// Bound on reading the current desired size.
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Why a provisioning apply did not succeed.
#[derive(Debug)]
pub enum ProvisionFailure {
    /// The apply exceeded its bound and was abandoned.
    Timeout(Duration),
    /// The provisioning tool reported failure.
    Command(ProvisionError),
}

impl fmt::Display for ProvisionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisionFailure::Timeout(d) => write!(f, "timed out after {}", format_duration(*d)),
            ProvisionFailure::Command(e) => write!(f, "{e}"),
        }
    }
}

/// Outcome of one scale-up attempt.
///
/// Only `ProvisioningFailed` is an error; the rest are expected outcomes.
#[derive(Debug)]
pub enum ScaleResult {
    /// Desired size changed and the cooldown window started.
    Scaled { from: u32, to: u32 },
    /// Already at the configured ceiling; nothing applied.
    AtCapacity { current: u32, max: u32 },
    /// Inside the cooldown window; nothing applied.
    CooldownActive { remaining: Duration },
    /// Another attempt is running; nothing applied.
    AlreadyInProgress,
    /// Apply failed; cooldown untouched so the next overload may retry.
    ProvisioningFailed { cause: ProvisionFailure },
}

impl ScaleResult {
    pub fn is_scaled(&self) -> bool {
        matches!(self, ScaleResult::Scaled { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ScaleResult::ProvisioningFailed { .. })
    }
}

impl fmt::Display for ScaleResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScaleResult::Scaled { from, to } => write!(f, "scaled {from} -> {to}"),
            ScaleResult::AtCapacity { current, max } => {
                write!(f, "at capacity ({current}/{max}), nothing to do")
            }
            ScaleResult::CooldownActive { remaining } => {
                write!(f, "cooldown active, {}s remaining", remaining.as_secs())
            }
            ScaleResult::AlreadyInProgress => f.write_str("a scale-up is already in progress"),
            ScaleResult::ProvisioningFailed { cause } => write!(f, "provisioning failed: {cause}"),
        }
    }
}

/// Issues scale-ups through a [`Provisioner`], gated by a [`CooldownGate`].
pub struct ProvisioningDriver {
    provisioner: Arc<dyn Provisioner>,
    gate: CooldownGate,
    max_size: u32,
    fallback_size: u32,
    apply_timeout: Duration,
    read_timeout: Duration,
    /// Held for the duration of one attempt.
    in_flight: Mutex<()>,
}

impl ProvisioningDriver {
    pub fn new(provisioner: Arc<dyn Provisioner>, gate: CooldownGate, max_size: u32) -> Self {
        let defaults = ScalingConfig::default();
        Self {
            provisioner,
            gate,
            max_size,
            fallback_size: defaults.fallback_size,
            apply_timeout: defaults.apply_timeout,
            read_timeout: DEFAULT_READ_TIMEOUT,
            in_flight: Mutex::new(()),
        }
    }

    pub fn from_config(
        provisioner: Arc<dyn Provisioner>,
        gate: CooldownGate,
        config: &ScalingConfig,
    ) -> Self {
        Self::new(provisioner, gate, config.max_size)
            .with_fallback_size(config.fallback_size)
            .with_apply_timeout(config.apply_timeout)
    }

    /// Size assumed when the current size cannot be read.
    pub fn with_fallback_size(mut self, fallback_size: u32) -> Self {
        self.fallback_size = fallback_size;
        self
    }

    pub fn with_apply_timeout(mut self, apply_timeout: Duration) -> Self {
        self.apply_timeout = apply_timeout;
        self
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn gate(&self) -> &CooldownGate {
        &self.gate
    }

    pub fn max_size(&self) -> u32 {
        self.max_size
    }

    /// Attempt a scale-up now.
    pub async fn scale_up(&self) -> ScaleResult {
        self.scale_up_at(SystemTime::now()).await
    }

    /// Attempt a scale-up, treating `now` as the current time.
    pub async fn scale_up_at(&self, now: SystemTime) -> ScaleResult {
        let Ok(_attempt) = self.in_flight.try_lock() else {
            debug!("scale-up already in progress, suppressing");
            return ScaleResult::AlreadyInProgress;
        };

        // Cooldown first: a gated attempt never touches the provisioner.
        let check = self.gate.check(now);
        if let Some(remaining) = check.remaining {
            info!(remaining_secs = remaining.as_secs(), "in cooldown period, skipping scale-up");
            return ScaleResult::CooldownActive { remaining };
        }

        let current = self.read_current_size().await;
        let new_size = current.saturating_add(1).min(self.max_size);

        if current >= self.max_size {
            info!(current, max = self.max_size, "already at maximum capacity, skipping scale-up");
            return ScaleResult::AtCapacity {
                current,
                max: self.max_size,
            };
        }

        info!(from = current, to = new_size, "scaling up");
        let started = Instant::now();
        let applied = tokio::time::timeout(self.apply_timeout, self.provisioner.apply(new_size)).await;

        match applied {
            Ok(Ok(())) => {
                let finished_at = now + started.elapsed();
                match self.gate.record_scale_after(&check, finished_at) {
                    Ok(true) => {}
                    Ok(false) => warn!(
                        "scale state changed during apply; another writer recorded a scale"
                    ),
                    Err(e) => error!(
                        error = %e,
                        "scale applied but recording it failed; a restart may scale again inside the cooldown"
                    ),
                }
                info!(from = current, to = new_size, "scale-up complete");
                ScaleResult::Scaled {
                    from: current,
                    to: new_size,
                }
            }
            Ok(Err(e)) => {
                error!(error = %e, to = new_size, "provisioning apply failed");
                ScaleResult::ProvisioningFailed {
                    cause: ProvisionFailure::Command(e),
                }
            }
            Err(_) => {
                error!(
                    timeout = %format_duration(self.apply_timeout),
                    to = new_size,
                    "provisioning apply timed out, abandoned"
                );
                ScaleResult::ProvisioningFailed {
                    cause: ProvisionFailure::Timeout(self.apply_timeout),
                }
            }
        }
    }

    /// Current desired size, or the fallback when it cannot be read.
    async fn read_current_size(&self) -> u32 {
        match tokio::time::timeout(self.read_timeout, self.provisioner.current_desired_size()).await
        {
            Ok(Ok(size)) => size,
            Ok(Err(e)) => {
                warn!(error = %e, fallback = self.fallback_size, "could not read desired size, using fallback");
                self.fallback_size
            }
            Err(_) => {
                warn!(fallback = self.fallback_size, "reading desired size timed out, using fallback");
                self.fallback_size
            }
        }
    }
}
