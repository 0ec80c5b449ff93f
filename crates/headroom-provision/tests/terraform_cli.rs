//! TerraformCli against a fake `terraform` shell script.
#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use headroom_provision::{ProvisionError, Provisioner, StateReadError, Step, TerraformCli};

/// Writing an executable while another test forks can fail with ETXTBSY;
/// keep script tests serial.
static SCRIPT_LOCK: Mutex<()> = Mutex::new(());

const SHOW_JSON: &str = r#"{"format_version":"1.0","values":{"root_module":{"resources":[
  {"type":"aws_eks_node_group","values":{"scaling_config":[{"desired_size":3}]}}
]}}}"#;

/// Fake terraform: logs its arguments, fails `apply` when `fail_apply`
/// exists, prints `show.json` for `show`.
fn fake_terraform(dir: &Path) -> PathBuf {
    let script = dir.join("terraform");
    fs::write(
        &script,
        r#"#!/bin/sh
here="$(dirname "$0")"
echo "$@" >> "$here/calls.log"
case "$1" in
  init) exit 0 ;;
  apply)
    if [ -f "$here/fail_apply" ]; then
      echo "Error: creating node group: quota exceeded" >&2
      exit 1
    fi
    exit 0 ;;
  show)
    if [ -f "$here/show.json" ]; then cat "$here/show.json"; exit 0; fi
    echo "Error: no state" >&2
    exit 1 ;;
esac
exit 2
"#,
    )
    .unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    script
}

fn calls(dir: &Path) -> Vec<String> {
    fs::read_to_string(dir.join("calls.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn apply_runs_init_then_apply_with_size_var() {
    let _guard = SCRIPT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let dir = tempfile::tempdir().unwrap();
    let cli = TerraformCli::new(fake_terraform(dir.path()), dir.path());

    cli.apply(4).await.unwrap();

    assert_eq!(
        calls(dir.path()),
        vec![
            "init -input=false -no-color".to_string(),
            "apply -auto-approve -input=false -no-color -var desired_size=4".to_string(),
        ]
    );
}

#[tokio::test]
async fn failed_apply_captures_stderr() {
    let _guard = SCRIPT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("fail_apply"), b"").unwrap();
    let cli = TerraformCli::new(fake_terraform(dir.path()), dir.path());

    match cli.apply(3).await.unwrap_err() {
        ProvisionError::Exit { step, code, stderr } => {
            assert_eq!(step, Step::Apply);
            assert_eq!(code, Some(1));
            assert!(stderr.contains("quota exceeded"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn reads_desired_size_from_show() {
    let _guard = SCRIPT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("show.json"), SHOW_JSON).unwrap();
    let cli = TerraformCli::new(fake_terraform(dir.path()), dir.path());

    assert_eq!(cli.current_desired_size().await.unwrap(), 3);
    assert_eq!(calls(dir.path()), vec!["show -json -no-color".to_string()]);
}

#[tokio::test]
async fn unreadable_state_is_a_read_error() {
    let _guard = SCRIPT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let dir = tempfile::tempdir().unwrap();
    let cli = TerraformCli::new(fake_terraform(dir.path()), dir.path());

    let err = cli.current_desired_size().await.unwrap_err();
    assert!(matches!(
        err,
        StateReadError::Command(ProvisionError::Exit { step: Step::Show, .. })
    ));
}

#[tokio::test]
async fn missing_binary_is_a_spawn_error() {
    let dir = tempfile::tempdir().unwrap();
    let cli = TerraformCli::new(dir.path().join("no-such-terraform"), dir.path());

    let err = cli.apply(2).await.unwrap_err();
    assert!(matches!(err, ProvisionError::Spawn { step: Step::Init, .. }));
}
