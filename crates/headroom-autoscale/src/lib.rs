//! headroom-autoscale: overload detection and cooldown-gated scale-up.
//!
//! # Control loop
//!
//! ```text
//! PollLoop (every interval, until shutdown)
//!   ├── Monitor::observe()
//!   │     ├── Sampler::sample_all()        → Vec<MetricSample>
//!   │     └── ThresholdEvaluator::evaluate → OverloadVerdict
//!   └── if a scale rule is breached:
//!         ProvisioningDriver::scale_up()
//!           1. cooldown active     → CooldownActive
//!           2. read current size (fallback on failure)
//!           3. new = min(current + 1, max)
//!           4. current >= max      → AtCapacity
//!           5. apply(new), bounded → Scaled / ProvisioningFailed
//!              success records the scale time; failure leaves it alone
//! ```
//!
//! Scale attempts are single-flight: while one is running, others return
//! `AlreadyInProgress` without touching the provisioner.

pub mod evaluator;
pub mod poller;
pub mod scaler;

pub use evaluator::{Breach, Comparison, OverloadVerdict, Threshold, ThresholdEvaluator};
pub use poller::{Monitor, Observation, PollLoop, PollReport};
pub use scaler::{ProvisionFailure, ProvisioningDriver, ScaleResult};
