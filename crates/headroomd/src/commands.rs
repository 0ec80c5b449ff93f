//! One-shot subcommands: `check`, `scale-up`, `status`, `show-config`.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::Context;
use tracing::warn;

use headroom_autoscale::{Monitor, Observation, ScaleResult};
use headroom_core::{HeadroomConfig, format_duration, unix_secs};
use headroom_metrics::PrometheusClient;

use crate::daemon::Components;

/// Exit code for `check` when a threshold is breached.
const EXIT_OVERLOADED: u8 = 2;

/// One sampling pass; never scales.
pub async fn check(config: &HeadroomConfig) -> anyhow::Result<ExitCode> {
    let source = Arc::new(
        PrometheusClient::new(&config.metrics.url, config.metrics.timeout)
            .context("metrics backend")?,
    );
    let mut monitor = Monitor::new(source, config.rules.clone());
    let observation = monitor.observe(SystemTime::now()).await?;

    print!("{}", render_observation(&observation));
    Ok(if observation.verdict.is_overloaded() {
        ExitCode::from(EXIT_OVERLOADED)
    } else {
        ExitCode::SUCCESS
    })
}

fn render_observation(observation: &Observation) -> String {
    let mut out = String::new();
    for sample in &observation.samples {
        let breach = observation
            .verdict
            .breaches()
            .iter()
            .find(|b| b.metric_name == sample.name);
        let marker = match breach {
            Some(b) => format!("  BREACH (limit {})", b.limit),
            None => String::new(),
        };
        out.push_str(&format!("{:<12} {}{marker}\n", sample.name, sample.display_value()));
    }
    if observation.verdict.is_overloaded() {
        out.push_str(&format!(
            "overloaded: {}\n",
            observation.verdict.breached_names().join(", ")
        ));
    } else {
        out.push_str("nominal\n");
    }
    out
}

/// Run the driver once and report what happened.
pub async fn scale_up(config: &HeadroomConfig) -> anyhow::Result<ExitCode> {
    let components = Components::build(config)?;
    let result = components.driver.scale_up().await;
    println!("{result}");
    Ok(match result {
        ScaleResult::ProvisioningFailed { .. } => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    })
}

/// Last scale time and remaining cooldown.
pub fn status(config: &HeadroomConfig) -> anyhow::Result<ExitCode> {
    let components = Components::build(config)?;
    let now = SystemTime::now();
    let last = components
        .gate
        .last_scale_time()
        .context("reading scale state")?;

    println!("state:     {}", config.state_path().display());
    println!("cooldown:  {}", format_duration(components.gate.cooldown()));
    match last {
        None => println!("last scale: never"),
        Some(at) => {
            let ago = now
                .duration_since(at)
                .map(|d| format!("{}s ago", d.as_secs()))
                .unwrap_or_else(|_| "in the future".to_string());
            println!("last scale: {:.0} ({ago})", unix_secs(at));
        }
    }
    match components.gate.remaining(now) {
        Some(left) => println!("remaining: {}s", left.as_secs()),
        None => println!("remaining: none, scale-up permitted"),
    }
    Ok(ExitCode::SUCCESS)
}

/// Print the effective config. Validation problems are reported but do not
/// stop the output.
pub fn show_config(path: Option<&Path>) -> anyhow::Result<ExitCode> {
    let mut config = match path {
        Some(path) => HeadroomConfig::from_file(path)?,
        None => HeadroomConfig::default(),
    };
    config.apply_env(|key| std::env::var(key).ok())?;
    if let Err(e) = config.validate() {
        warn!(error = %e, "configuration is not valid");
    }
    print!("{}", config.to_toml_string()?);
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use headroom_autoscale::{Threshold, ThresholdEvaluator};
    use headroom_core::{MetricSample, Unit};

    fn observation(values: &[(&str, f64)]) -> Observation {
        let now = SystemTime::now();
        let samples: Vec<MetricSample> = values
            .iter()
            .map(|(name, v)| MetricSample::new(*name, *v, now).with_unit(Unit::Percent))
            .collect();
        let evaluator = ThresholdEvaluator::new(vec![
            Threshold::new("cpu", 90.0),
            Threshold::new("mem", 90.0),
        ]);
        let verdict = evaluator.evaluate(&samples);
        Observation { samples, verdict }
    }

    #[test]
    fn renders_breaches_and_summary() {
        let text = render_observation(&observation(&[("cpu", 95.0), ("mem", 40.0)]));
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("cpu"));
        assert!(lines[0].contains("BREACH (limit 90)"));
        assert!(!lines[1].contains("BREACH"));
        assert_eq!(lines[2], "overloaded: cpu");
    }

    #[test]
    fn renders_nominal() {
        let text = render_observation(&observation(&[("cpu", 10.0), ("mem", 20.0)]));
        assert!(text.ends_with("nominal\n"));
    }
}
