//! The monitoring loop: sample, evaluate, scale, sleep.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use headroom_core::{MetricRule, MetricSample};
use headroom_metrics::{MetricSource, SampleError, Sampler};

use crate::evaluator::{OverloadVerdict, ThresholdEvaluator};
use crate::scaler::{ProvisioningDriver, ScaleResult};

/// Samples and verdict for one observation.
#[derive(Debug, Clone)]
pub struct Observation {
    pub samples: Vec<MetricSample>,
    pub verdict: OverloadVerdict,
}

/// Sampler plus evaluator bound to one metric source.
pub struct Monitor {
    source: Arc<dyn MetricSource>,
    sampler: Sampler,
    evaluator: ThresholdEvaluator,
}

impl Monitor {
    pub fn new(source: Arc<dyn MetricSource>, rules: Vec<MetricRule>) -> Self {
        let evaluator = ThresholdEvaluator::from_rules(&rules);
        Self {
            source,
            sampler: Sampler::new(rules),
            evaluator,
        }
    }

    pub fn evaluator(&self) -> &ThresholdEvaluator {
        &self.evaluator
    }

    /// Sample every rule and evaluate the thresholds.
    pub async fn observe(&mut self, now: SystemTime) -> Result<Observation, SampleError> {
        let samples = self.sampler.sample_all(self.source.as_ref(), now).await?;
        let verdict = self.evaluator.evaluate(&samples);
        Ok(Observation { samples, verdict })
    }
}

/// What one iteration of the loop did.
#[derive(Debug)]
pub struct PollReport {
    pub observation: Observation,
    /// Present only when a scale-up was attempted.
    pub scale: Option<ScaleResult>,
}

/// Fixed-interval control loop.
pub struct PollLoop {
    monitor: Monitor,
    driver: Arc<ProvisioningDriver>,
    interval: Duration,
}

impl PollLoop {
    pub fn new(monitor: Monitor, driver: Arc<ProvisioningDriver>, interval: Duration) -> Self {
        Self {
            monitor,
            driver,
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one iteration. Returns `None` if sampling failed; the failure is
    /// logged and the next iteration starts fresh.
    pub async fn tick(&mut self) -> Option<PollReport> {
        let observation = match self.monitor.observe(SystemTime::now()).await {
            Ok(observation) => observation,
            Err(e) => {
                error!(error = %e, "metric sampling failed, skipping this iteration");
                return None;
            }
        };

        for breach in observation.verdict.breaches() {
            warn!(
                metric = %breach.metric_name,
                value = breach.value,
                limit = breach.limit,
                action = ?breach.action,
                "threshold breached"
            );
        }

        let scale = if observation.verdict.requires_scale() {
            let result = self.driver.scale_up().await;
            if result.is_failure() {
                error!(result = %result, "scale-up attempt failed");
            } else {
                info!(result = %result, "scale-up attempt finished");
            }
            Some(result)
        } else {
            debug!(overloaded = observation.verdict.is_overloaded(), "no scale-up required");
            None
        };

        Some(PollReport { observation, scale })
    }

    /// Loop until `shutdown` flips. An iteration in progress is completed
    /// before the loop exits.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_ms = self.interval.as_millis() as u64, "headroom monitor started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            self.tick().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("headroom monitor shutting down");
    }
}
