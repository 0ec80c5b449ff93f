//! Domain types shared by the sampling, evaluation, and scaling crates.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// ── Rules ──────────────────────────────────────────────────────────

/// One monitored metric: what to query, and when it counts as breached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricRule {
    /// Short name used in logs, verdicts, and env overrides (`cpu`, `disk`).
    pub label: String,
    /// Query-language expression sent to the metrics backend.
    pub query: String,
    /// Breach limit; a value `>=` this is a breach.
    pub threshold: f64,
    #[serde(default)]
    pub kind: RuleKind,
    #[serde(default)]
    pub unit: Unit,
    #[serde(default)]
    pub action: BreachAction,
}

impl MetricRule {
    /// Environment variable that overrides this rule's threshold.
    pub fn threshold_env_var(&self) -> String {
        format!(
            "HEADROOM_THRESHOLD_{}",
            self.label.to_ascii_uppercase().replace('-', "_")
        )
    }
}

/// How the raw query result is turned into the compared value.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// Compare the sampled value directly.
    #[default]
    Gauge,
    /// Compare the absolute change since the previous sample.
    Delta,
}

/// Display unit of a metric. Only affects log rendering.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    Percent,
    Bytes,
    #[default]
    Raw,
}

/// What a breach of the rule should cause.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BreachAction {
    /// Breach triggers a scale-up attempt.
    #[default]
    Scale,
    /// Breach is logged only.
    Alert,
}

// ── Samples ────────────────────────────────────────────────────────

/// A single value produced for one rule in one poll cycle. Not persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub name: String,
    pub value: f64,
    pub unit: Unit,
    pub timestamp: SystemTime,
}

impl MetricSample {
    pub fn new(name: impl Into<String>, value: f64, timestamp: SystemTime) -> Self {
        Self {
            name: name.into(),
            value,
            unit: Unit::Raw,
            timestamp,
        }
    }

    pub fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = unit;
        self
    }

    /// Renders the value for logs according to its unit.
    pub fn display_value(&self) -> DisplayValue {
        DisplayValue {
            value: self.value,
            unit: self.unit,
        }
    }
}

/// `Display` wrapper returned by [`MetricSample::display_value`].
#[derive(Debug, Clone, Copy)]
pub struct DisplayValue {
    value: f64,
    unit: Unit,
}

impl fmt::Display for DisplayValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.unit {
            Unit::Percent => write!(f, "{:.1}%", self.value),
            Unit::Bytes => f.write_str(&format_bytes(self.value)),
            Unit::Raw => write!(f, "{}", self.value),
        }
    }
}

/// Format a byte count with 1024-based units (`B` through `PB`).
pub fn format_bytes(bytes: f64) -> String {
    let mut b = bytes;
    for unit in ["B", "KB", "MB", "GB", "TB"] {
        if b.abs() < 1024.0 {
            return format!("{b:.2}{unit}");
        }
        b /= 1024.0;
    }
    format!("{b:.2}PB")
}

// ── Time ───────────────────────────────────────────────────────────

/// Seconds since the Unix epoch as a float (sub-second precision).
pub fn unix_secs(t: SystemTime) -> f64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs_f64(),
        Err(e) => -e.duration().as_secs_f64(),
    }
}

/// Inverse of [`unix_secs`]. `None` for NaN, infinities, and values the
/// platform clock cannot represent.
pub fn from_unix_secs(secs: f64) -> Option<SystemTime> {
    let offset = Duration::try_from_secs_f64(secs.abs()).ok()?;
    if secs >= 0.0 {
        UNIX_EPOCH.checked_add(offset)
    } else {
        UNIX_EPOCH.checked_sub(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_env_var_is_upper_snake() {
        let rule = MetricRule {
            label: "net-rx".to_string(),
            query: "sum(x)".to_string(),
            threshold: 1.0,
            kind: RuleKind::Delta,
            unit: Unit::Bytes,
            action: BreachAction::Alert,
        };
        assert_eq!(rule.threshold_env_var(), "HEADROOM_THRESHOLD_NET_RX");
    }

    #[test]
    fn format_bytes_scales_units() {
        assert_eq!(format_bytes(512.0), "512.00B");
        assert_eq!(format_bytes(1536.0), "1.50KB");
        assert_eq!(format_bytes(100.0 * 1024.0 * 1024.0), "100.00MB");
        assert_eq!(format_bytes(-2048.0), "-2.00KB");
        assert_eq!(format_bytes(1024f64.powi(5) * 3.0), "3.00PB");
    }

    #[test]
    fn display_value_follows_unit() {
        let now = SystemTime::now();
        let pct = MetricSample::new("disk", 81.34, now).with_unit(Unit::Percent);
        assert_eq!(pct.display_value().to_string(), "81.3%");

        let raw = MetricSample::new("load", 3.5, now);
        assert_eq!(raw.display_value().to_string(), "3.5");
    }

    #[test]
    fn unix_secs_round_trip_keeps_fractions() {
        let t = from_unix_secs(1_700_000_000.25).unwrap();
        assert!((unix_secs(t) - 1_700_000_000.25).abs() < 1e-6);
        let before = from_unix_secs(-86_400.0).unwrap();
        assert_eq!(unix_secs(before), -86_400.0);
    }

    #[test]
    fn unrepresentable_unix_secs_are_rejected() {
        assert_eq!(from_unix_secs(f64::NAN), None);
        assert_eq!(from_unix_secs(f64::INFINITY), None);
        assert_eq!(from_unix_secs(1e300), None);
        assert_eq!(from_unix_secs(-1e300), None);
    }
}
