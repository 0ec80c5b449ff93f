//! Provisioning error types.

use std::fmt;

use thiserror::Error;

/// Which provisioning tool invocation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Init,
    Apply,
    Show,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Step::Init => "init",
            Step::Apply => "apply",
            Step::Show => "show",
        })
    }
}

/// The provisioning tool could not change the desired size.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("failed to run {step}: {source}")]
    Spawn {
        step: Step,
        #[source]
        source: std::io::Error,
    },

    #[error("{step} exited with {}: {stderr}", exit_label(.code))]
    Exit {
        step: Step,
        code: Option<i32>,
        stderr: String,
    },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

/// The current desired size could not be determined.
#[derive(Debug, Error)]
pub enum StateReadError {
    #[error(transparent)]
    Command(#[from] ProvisionError),

    #[error("state output is not valid JSON: {0}")]
    Malformed(String),

    #[error("no resource of type {0:?} in state")]
    ResourceNotFound(String),

    #[error("resource {resource_type:?} has no usable {field}")]
    MissingField {
        resource_type: String,
        field: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_error_names_step_and_code() {
        let err = ProvisionError::Exit {
            step: Step::Apply,
            code: Some(1),
            stderr: "Error: quota exceeded".to_string(),
        };
        assert_eq!(err.to_string(), "apply exited with status 1: Error: quota exceeded");

        let killed = ProvisionError::Exit {
            step: Step::Init,
            code: None,
            stderr: String::new(),
        };
        assert!(killed.to_string().contains("a signal"));
    }
}
