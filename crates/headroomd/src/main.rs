//! headroomd: the Headroom daemon.
//!
//! Polls a Prometheus backend, and when a scale rule is breached, raises
//! the desired size of a Terraform-managed node group by one, at most once
//! per cooldown window.
//!
//! # Usage
//!
//! ```text
//! headroomd --config headroom.toml run
//! headroomd check
//! headroomd status
//! ```

mod commands;
mod daemon;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::warn;

use headroom_core::HeadroomConfig;

#[derive(Parser)]
#[command(name = "headroomd", about = "Metric-driven node group autoscaler", version)]
struct Cli {
    /// TOML configuration file. Environment variables override it.
    #[arg(long, global = true, env = "HEADROOM_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format.
    #[arg(long, global = true, env = "HEADROOM_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the monitoring loop until SIGINT or SIGTERM.
    Run,
    /// Sample and evaluate once. Exits 0 when nominal, 2 when overloaded.
    Check,
    /// Attempt one scale-up, honouring cooldown and capacity.
    ScaleUp,
    /// Show the last scale time and remaining cooldown.
    Status,
    /// Print the effective configuration as TOML.
    ShowConfig,
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,headroomd=debug,headroom_autoscale=debug".into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Effective config: optional file, then the process environment.
fn load_config(path: Option<&Path>) -> anyhow::Result<HeadroomConfig> {
    Ok(HeadroomConfig::load(path, |key| std::env::var(key).ok())?)
}

/// A `.env` failure worth reporting. A missing file is not one.
fn dotenv_problem<T>(result: Result<T, dotenvy::Error>) -> Option<dotenvy::Error> {
    match result {
        Err(e) if !e.not_found() => Some(e),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Already-set variables win over .env.
    let dotenv = dotenv_problem(dotenvy::dotenv());

    let cli = Cli::parse();
    init_tracing(cli.log_format);
    if let Some(e) = dotenv {
        warn!(error = %e, "could not load .env, continuing with the process environment");
    }

    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Run => daemon::run(load_config(config_path)?)
            .await
            .map(|()| ExitCode::SUCCESS),
        Command::Check => commands::check(&load_config(config_path)?).await,
        Command::ScaleUp => commands::scale_up(&load_config(config_path)?).await,
        Command::Status => commands::status(&load_config(config_path)?),
        Command::ShowConfig => commands::show_config(config_path),
    }
}
