//! Sampler: one `MetricSample` per configured rule, per poll cycle.

use std::collections::HashMap;
use std::time::SystemTime;

use tracing::debug;

use headroom_core::{MetricRule, MetricSample, RuleKind};

use crate::error::SampleError;
use crate::source::MetricSource;

/// Samples every rule and turns counters into per-interval deltas.
pub struct Sampler {
    rules: Vec<MetricRule>,
    /// Last raw value per delta rule label.
    baselines: HashMap<String, f64>,
}

impl Sampler {
    pub fn new(rules: Vec<MetricRule>) -> Self {
        Self {
            rules,
            baselines: HashMap::new(),
        }
    }

    pub fn rules(&self) -> &[MetricRule] {
        &self.rules
    }

    /// Query every rule in order.
    ///
    /// Any failure aborts the whole pass and leaves delta baselines as
    /// they were, so the next pass computes deltas against the last good
    /// sample.
    pub async fn sample_all(
        &mut self,
        source: &dyn MetricSource,
        now: SystemTime,
    ) -> Result<Vec<MetricSample>, SampleError> {
        let mut raw = Vec::with_capacity(self.rules.len());
        for rule in &self.rules {
            let value = source
                .sample(&rule.query)
                .await
                .map_err(|source| SampleError {
                    label: rule.label.clone(),
                    source,
                })?;
            raw.push(value);
        }

        let mut samples = Vec::with_capacity(self.rules.len());
        for (rule, value) in self.rules.iter().zip(raw) {
            let compared = match rule.kind {
                RuleKind::Gauge => value,
                RuleKind::Delta => {
                    let delta = self
                        .baselines
                        .get(&rule.label)
                        .map(|prev| (value - prev).abs())
                        .unwrap_or(0.0);
                    self.baselines.insert(rule.label.clone(), value);
                    delta
                }
            };
            let sample = MetricSample::new(rule.label.clone(), compared, now).with_unit(rule.unit);
            debug!(metric = %sample.name, value = %sample.display_value(), "sampled");
            samples.push(sample);
        }
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueryError;
    use crate::source::SampleFuture;
    use headroom_core::{BreachAction, Unit};
    use std::sync::Mutex;

    /// Returns scripted values per query; a missing entry fails.
    struct ScriptedSource {
        values: Mutex<HashMap<String, Vec<f64>>>,
    }

    impl ScriptedSource {
        fn new(script: &[(&str, &[f64])]) -> Self {
            Self {
                values: Mutex::new(
                    script
                        .iter()
                        .map(|(q, vs)| (q.to_string(), vs.iter().rev().copied().collect()))
                        .collect(),
                ),
            }
        }
    }

    impl MetricSource for ScriptedSource {
        fn sample<'a>(&'a self, query: &'a str) -> SampleFuture<'a> {
            let next = self
                .values
                .lock()
                .unwrap()
                .get_mut(query)
                .and_then(|vs| vs.pop());
            Box::pin(async move {
                next.ok_or_else(|| QueryError::Connect("scripted failure".to_string()))
            })
        }
    }

    fn rule(label: &str, query: &str, kind: RuleKind) -> MetricRule {
        MetricRule {
            label: label.to_string(),
            query: query.to_string(),
            threshold: 100.0,
            kind,
            unit: Unit::Raw,
            action: BreachAction::Scale,
        }
    }

    #[tokio::test]
    async fn gauge_values_pass_through() {
        let source = ScriptedSource::new(&[("cpu_q", &[95.0]), ("mem_q", &[40.0])]);
        let mut sampler = Sampler::new(vec![
            rule("cpu", "cpu_q", RuleKind::Gauge),
            rule("mem", "mem_q", RuleKind::Gauge),
        ]);

        let samples = sampler.sample_all(&source, SystemTime::now()).await.unwrap();
        let values: Vec<_> = samples.iter().map(|s| (s.name.as_str(), s.value)).collect();
        assert_eq!(values, vec![("cpu", 95.0), ("mem", 40.0)]);
    }

    #[tokio::test]
    async fn delta_starts_at_zero_then_tracks_absolute_change() {
        let source = ScriptedSource::new(&[("rx", &[1000.0, 1500.0, 1200.0])]);
        let mut sampler = Sampler::new(vec![rule("net-rx", "rx", RuleKind::Delta)]);
        let now = SystemTime::now();

        let first = sampler.sample_all(&source, now).await.unwrap();
        assert_eq!(first[0].value, 0.0);
        let second = sampler.sample_all(&source, now).await.unwrap();
        assert_eq!(second[0].value, 500.0);
        let third = sampler.sample_all(&source, now).await.unwrap();
        assert_eq!(third[0].value, 300.0);
    }

    #[tokio::test]
    async fn failure_skips_pass_and_keeps_baselines() {
        // Second pass fails on "disk" after "rx" already answered.
        let source = ScriptedSource::new(&[("rx", &[100.0, 400.0, 700.0]), ("disk", &[50.0])]);
        let mut sampler = Sampler::new(vec![
            rule("net-rx", "rx", RuleKind::Delta),
            rule("disk", "disk", RuleKind::Gauge),
        ]);
        let now = SystemTime::now();

        sampler.sample_all(&source, now).await.unwrap();
        let err = sampler.sample_all(&source, now).await.unwrap_err();
        assert_eq!(err.label, "disk");

        // Baseline is still 100, not 400.
        source
            .values
            .lock()
            .unwrap()
            .insert("disk".to_string(), vec![50.0]);
        let samples = sampler.sample_all(&source, now).await.unwrap();
        assert_eq!(samples[0].value, 600.0);
    }
}
