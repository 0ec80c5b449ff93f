//! headroom.toml configuration parser and environment overrides.
//!
//! Precedence is defaults < file < environment. The result is immutable for
//! the lifetime of the process and handed to each component's constructor.

use std::collections::HashSet;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::{parse_duration, serde_str};
use crate::error::{ConfigError, ConfigResult};
use crate::types::MetricRule;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HeadroomConfig {
    pub metrics: MetricsConfig,
    pub poll: PollConfig,
    pub scaling: ScalingConfig,
    pub terraform: TerraformConfig,
    pub state: StateConfig,
    #[serde(rename = "rule")]
    pub rules: Vec<MetricRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Base URL of the Prometheus-compatible backend.
    pub url: String,
    /// Per-query timeout.
    #[serde(with = "serde_str")]
    pub timeout: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9090".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PollConfig {
    #[serde(with = "serde_str")]
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScalingConfig {
    /// Minimum time between successive scale-ups.
    #[serde(with = "serde_str")]
    pub cooldown: Duration,
    /// Ceiling for the desired size.
    pub max_size: u32,
    /// Size assumed when the current size cannot be read.
    pub fallback_size: u32,
    /// Upper bound for one provisioning apply.
    #[serde(with = "serde_str")]
    pub apply_timeout: Duration,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(600),
            max_size: 4,
            fallback_size: 2,
            apply_timeout: Duration::from_secs(15 * 60),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TerraformConfig {
    pub binary: PathBuf,
    pub working_dir: PathBuf,
    /// Resource `type` whose `scaling_config.desired_size` is managed.
    pub resource_type: String,
    /// Terraform variable passed to `apply -var`.
    pub size_var: String,
}

impl Default for TerraformConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("terraform"),
            working_dir: PathBuf::from("terraform"),
            resource_type: "aws_eks_node_group".to_string(),
            size_var: "desired_size".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StateBackend {
    /// `{"last_scale": <unix seconds>}` JSON document.
    #[default]
    File,
    /// redb database keyed by resource group.
    Redb,
}

impl FromStr for StateBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "redb" => Ok(Self::Redb),
            other => Err(format!("unknown state backend {other:?} (expected file or redb)")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StateConfig {
    pub backend: StateBackend,
    /// Defaults to `scale_state.json` (or `scale_state.redb`) inside the
    /// Terraform working directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Stable identifier of the managed resource group.
    pub key: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            backend: StateBackend::File,
            path: None,
            key: "default".to_string(),
        }
    }
}

impl HeadroomConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Build the effective config: optional file, then environment, then
    /// validation.
    pub fn load<F>(path: Option<&Path>, lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides. `lookup` is usually
    /// `|k| std::env::var(k).ok()`.
    pub fn apply_env<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("PROM_URL") {
            self.metrics.url = v;
        }
        if let Some(v) = lookup("METRICS_TIMEOUT") {
            self.metrics.timeout = env_duration("METRICS_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("INTERVAL") {
            self.poll.interval = env_duration("INTERVAL", &v)?;
        }
        if let Some(v) = lookup("COOLDOWN_SECONDS") {
            self.scaling.cooldown = env_duration("COOLDOWN_SECONDS", &v)?;
        }
        if let Some(v) = lookup("MAX_NODES") {
            self.scaling.max_size = env_parse("MAX_NODES", &v)?;
        }
        if let Some(v) = lookup("FALLBACK_NODES") {
            self.scaling.fallback_size = env_parse("FALLBACK_NODES", &v)?;
        }
        if let Some(v) = lookup("APPLY_TIMEOUT") {
            self.scaling.apply_timeout = env_duration("APPLY_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("TERRAFORM_BIN") {
            self.terraform.binary = PathBuf::from(v);
        }
        if let Some(v) = lookup("TERRAFORM_DIR") {
            self.terraform.working_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("TERRAFORM_RESOURCE_TYPE") {
            self.terraform.resource_type = v;
        }
        if let Some(v) = lookup("STATE_BACKEND") {
            self.state.backend = env_parse("STATE_BACKEND", &v)?;
        }
        if let Some(v) = lookup("STATE_FILE") {
            self.state.path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("STATE_KEY") {
            self.state.key = v;
        }
        for rule in &mut self.rules {
            let var = rule.threshold_env_var();
            if let Some(v) = lookup(&var) {
                let threshold: f64 = env_parse(&var, &v)?;
                if !threshold.is_finite() {
                    return Err(ConfigError::InvalidEnv {
                        var,
                        value: v,
                        reason: "threshold must be finite".to_string(),
                    });
                }
                rule.threshold = threshold;
            }
        }
        Ok(())
    }

    /// Reject configurations the poll loop cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        let url = url::Url::parse(&self.metrics.url)
            .map_err(|e| invalid(format!("metrics.url {:?}: {e}", self.metrics.url)))?;
        if url.scheme() != "http" {
            return Err(invalid(format!(
                "metrics.url must use http, got {:?}",
                url.scheme()
            )));
        }
        if self.metrics.timeout.is_zero() {
            return Err(invalid("metrics.timeout must be non-zero"));
        }
        if self.poll.interval.is_zero() {
            return Err(invalid("poll.interval must be non-zero"));
        }
        if self.scaling.max_size == 0 {
            return Err(invalid("scaling.max_size must be at least 1"));
        }
        if self.scaling.fallback_size > self.scaling.max_size {
            return Err(invalid(format!(
                "scaling.fallback_size ({}) exceeds scaling.max_size ({})",
                self.scaling.fallback_size, self.scaling.max_size
            )));
        }
        if self.scaling.apply_timeout.is_zero() {
            return Err(invalid("scaling.apply_timeout must be non-zero"));
        }
        if self.state.key.trim().is_empty() {
            return Err(invalid("state.key must not be empty"));
        }
        if self.rules.is_empty() {
            return Err(invalid("at least one [[rule]] is required"));
        }

        let mut labels = HashSet::new();
        for rule in &self.rules {
            if rule.label.trim().is_empty() {
                return Err(invalid("rule label must not be empty"));
            }
            if !labels.insert(rule.label.as_str()) {
                return Err(invalid(format!("duplicate rule label {:?}", rule.label)));
            }
            if rule.query.trim().is_empty() {
                return Err(invalid(format!("rule {:?} has an empty query", rule.label)));
            }
            if !rule.threshold.is_finite() {
                return Err(invalid(format!(
                    "rule {:?} threshold must be finite",
                    rule.label
                )));
            }
        }
        Ok(())
    }

    /// Location of the persisted scale state.
    pub fn state_path(&self) -> PathBuf {
        match &self.state.path {
            Some(path) => path.clone(),
            None => {
                let file = match self.state.backend {
                    StateBackend::File => "scale_state.json",
                    StateBackend::Redb => "scale_state.redb",
                };
                self.terraform.working_dir.join(file)
            }
        }
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

fn env_parse<T>(var: &str, value: &str) -> ConfigResult<T>
where
    T: FromStr,
    T::Err: Display,
{
    value.trim().parse::<T>().map_err(|e| ConfigError::InvalidEnv {
        var: var.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn env_duration(var: &str, value: &str) -> ConfigResult<Duration> {
    parse_duration(value).ok_or_else(|| ConfigError::InvalidEnv {
        var: var.to_string(),
        value: value.to_string(),
        reason: "expected a duration such as 5s, 10m or a number of seconds".to_string(),
    })
}
