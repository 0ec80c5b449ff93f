//! Terraform CLI provisioner.
//!
//! ```text
//! apply(n):  terraform init -input=false
//!            terraform apply -auto-approve -input=false -var <size_var>=n
//! read:      terraform show -json
//!            -> values.root_module(.child_modules)*.resources[type == T]
//!               .values.scaling_config.desired_size
//! ```

use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, info};

use headroom_core::config::TerraformConfig;

use crate::error::{ProvisionError, StateReadError, Step};
use crate::{ProvisionFuture, Provisioner};

/// Keep the tail of stderr; Terraform puts the actual error last.
const MAX_STDERR: usize = 4096;

/// Drives a Terraform working directory.
#[derive(Debug, Clone)]
pub struct TerraformCli {
    binary: PathBuf,
    working_dir: PathBuf,
    resource_type: String,
    size_var: String,
}

impl TerraformCli {
    pub fn new(binary: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        let defaults = TerraformConfig::default();
        Self {
            binary: binary.into(),
            working_dir: working_dir.into(),
            resource_type: defaults.resource_type,
            size_var: defaults.size_var,
        }
    }

    pub fn from_config(config: &TerraformConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            working_dir: config.working_dir.clone(),
            resource_type: config.resource_type.clone(),
            size_var: config.size_var.clone(),
        }
    }

    pub fn with_resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = resource_type.into();
        self
    }

    pub fn with_size_var(mut self, size_var: impl Into<String>) -> Self {
        self.size_var = size_var.into();
        self
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// `terraform init`. Idempotent; run before every apply.
    pub async fn init(&self) -> Result<(), ProvisionError> {
        self.run(Step::Init, &["init", "-input=false", "-no-color"])
            .await
            .map(|_| ())
    }

    /// `terraform apply` with the new desired size.
    pub async fn apply_desired_size(&self, desired_size: u32) -> Result<(), ProvisionError> {
        let var = format!("{}={desired_size}", self.size_var);
        self.run(
            Step::Apply,
            &["apply", "-auto-approve", "-input=false", "-no-color", "-var", &var],
        )
        .await
        .map(|_| ())
    }

    /// `terraform show -json`, parsed.
    pub async fn show_json(&self) -> Result<Value, StateReadError> {
        let stdout = self.run(Step::Show, &["show", "-json", "-no-color"]).await?;
        serde_json::from_slice(&stdout).map_err(|e| StateReadError::Malformed(e.to_string()))
    }

    async fn run(&self, step: Step, args: &[&str]) -> Result<Vec<u8>, ProvisionError> {
        debug!(%step, binary = ?self.binary, dir = ?self.working_dir, ?args, "running terraform");
        let output = Command::new(&self.binary)
            .args(args)
            .current_dir(&self.working_dir)
            .env("TF_IN_AUTOMATION", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ProvisionError::Spawn { step, source })?;

        if !output.status.success() {
            return Err(ProvisionError::Exit {
                step,
                code: output.status.code(),
                stderr: tail_lossy(&output.stderr, MAX_STDERR),
            });
        }
        debug!(%step, stdout_bytes = output.stdout.len(), "terraform finished");
        Ok(output.stdout)
    }
}

impl Provisioner for TerraformCli {
    fn current_desired_size(&self) -> ProvisionFuture<'_, Result<u32, StateReadError>> {
        Box::pin(async move {
            let state = self.show_json().await?;
            desired_size_from_show(&state, &self.resource_type)
        })
    }

    fn apply(&self, desired_size: u32) -> ProvisionFuture<'_, Result<(), ProvisionError>> {
        Box::pin(async move {
            self.init().await?;
            self.apply_desired_size(desired_size).await?;
            info!(desired_size, dir = ?self.working_dir, "terraform apply succeeded");
            Ok(())
        })
    }
}

/// Locate the first resource of `resource_type` in `terraform show -json`
/// output and return its `scaling_config.desired_size`.
pub fn desired_size_from_show(state: &Value, resource_type: &str) -> Result<u32, StateReadError> {
    let root = state
        .get("values")
        .and_then(|v| v.get("root_module"))
        .ok_or_else(|| StateReadError::ResourceNotFound(resource_type.to_string()))?;

    let resource = find_resource(root, resource_type)
        .ok_or_else(|| StateReadError::ResourceNotFound(resource_type.to_string()))?;

    let missing = || StateReadError::MissingField {
        resource_type: resource_type.to_string(),
        field: "scaling_config.desired_size",
    };

    // The provider encodes nested blocks as single-element lists.
    let scaling = resource
        .get("values")
        .and_then(|v| v.get("scaling_config"))
        .ok_or_else(missing)?;
    let scaling = match scaling {
        Value::Array(items) => items.first().ok_or_else(missing)?,
        other => other,
    };

    scaling
        .get("desired_size")
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(missing)
}

fn find_resource<'a>(module: &'a Value, resource_type: &str) -> Option<&'a Value> {
    let own = module
        .get("resources")
        .and_then(Value::as_array)
        .and_then(|resources| {
            resources
                .iter()
                .find(|r| r.get("type").and_then(Value::as_str) == Some(resource_type))
        });
    if own.is_some() {
        return own;
    }
    module
        .get("child_modules")
        .and_then(Value::as_array)?
        .iter()
        .find_map(|child| find_resource(child, resource_type))
}

fn tail_lossy(bytes: &[u8], max: usize) -> String {
    let start = bytes.len().saturating_sub(max);
    String::from_utf8_lossy(&bytes[start..]).trim().to_string()
}
