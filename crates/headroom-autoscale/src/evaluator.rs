//! Threshold evaluation over one poll cycle's samples.

use headroom_core::{BreachAction, MetricRule, MetricSample};

/// Comparison rule applied between a sample and its limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Comparison {
    /// `value >= limit`.
    #[default]
    AtLeast,
}

impl Comparison {
    pub fn breached(self, value: f64, limit: f64) -> bool {
        match self {
            Comparison::AtLeast => value >= limit,
        }
    }
}

/// Immutable threshold for one named metric.
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub metric_name: String,
    pub limit: f64,
    pub comparison: Comparison,
    pub action: BreachAction,
}

impl Threshold {
    pub fn new(metric_name: impl Into<String>, limit: f64) -> Self {
        Self {
            metric_name: metric_name.into(),
            limit,
            comparison: Comparison::AtLeast,
            action: BreachAction::Scale,
        }
    }

    pub fn alert_only(mut self) -> Self {
        self.action = BreachAction::Alert;
        self
    }
}

impl From<&MetricRule> for Threshold {
    fn from(rule: &MetricRule) -> Self {
        Self {
            metric_name: rule.label.clone(),
            limit: rule.threshold,
            comparison: Comparison::AtLeast,
            action: rule.action,
        }
    }
}

/// One threshold that the current samples exceed.
#[derive(Debug, Clone, PartialEq)]
pub struct Breach {
    pub metric_name: String,
    pub value: f64,
    pub limit: f64,
    pub action: BreachAction,
}

/// The set of thresholds currently breached.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverloadVerdict {
    breaches: Vec<Breach>,
}

impl OverloadVerdict {
    pub fn is_overloaded(&self) -> bool {
        !self.breaches.is_empty()
    }

    pub fn breaches(&self) -> &[Breach] {
        &self.breaches
    }

    pub fn breached_names(&self) -> Vec<&str> {
        self.breaches.iter().map(|b| b.metric_name.as_str()).collect()
    }

    /// True if any breached threshold is allowed to trigger a scale-up.
    pub fn requires_scale(&self) -> bool {
        self.breaches.iter().any(|b| b.action == BreachAction::Scale)
    }
}

/// Evaluates an arbitrary set of named thresholds.
#[derive(Debug, Clone, Default)]
pub struct ThresholdEvaluator {
    thresholds: Vec<Threshold>,
}

impl ThresholdEvaluator {
    pub fn new(thresholds: Vec<Threshold>) -> Self {
        Self { thresholds }
    }

    pub fn from_rules(rules: &[MetricRule]) -> Self {
        Self::new(rules.iter().map(Threshold::from).collect())
    }

    pub fn thresholds(&self) -> &[Threshold] {
        &self.thresholds
    }

    /// A threshold without a matching sample is not breached.
    pub fn evaluate(&self, samples: &[MetricSample]) -> OverloadVerdict {
        let breaches = self
            .thresholds
            .iter()
            .filter_map(|threshold| {
                let sample = samples.iter().find(|s| s.name == threshold.metric_name)?;
                threshold
                    .comparison
                    .breached(sample.value, threshold.limit)
                    .then(|| Breach {
                        metric_name: threshold.metric_name.clone(),
                        value: sample.value,
                        limit: threshold.limit,
                        action: threshold.action,
                    })
            })
            .collect();
        OverloadVerdict { breaches }
    }
}
