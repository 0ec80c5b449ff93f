//! Component assembly and the long-running `run` mode.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{info, warn};

use headroom_autoscale::{Monitor, PollLoop, ProvisioningDriver};
use headroom_core::{HeadroomConfig, format_duration};
use headroom_metrics::PrometheusClient;
use headroom_provision::TerraformCli;
use headroom_state::{CooldownGate, open_store};

/// Everything the subcommands need, built from one config.
pub struct Components {
    pub source: Arc<PrometheusClient>,
    pub gate: CooldownGate,
    pub driver: Arc<ProvisioningDriver>,
}

impl Components {
    pub fn build(config: &HeadroomConfig) -> anyhow::Result<Self> {
        let source = Arc::new(
            PrometheusClient::new(&config.metrics.url, config.metrics.timeout)
                .context("metrics backend")?,
        );

        let state_path = config.state_path();
        let store = open_store(config.state.backend, &state_path, &config.state.key)
            .with_context(|| format!("opening scale state at {}", state_path.display()))?;
        info!(
            backend = ?config.state.backend,
            path = %state_path.display(),
            key = %config.state.key,
            "scale state store opened"
        );

        let gate = CooldownGate::new(store, config.scaling.cooldown);
        let provisioner = Arc::new(TerraformCli::from_config(&config.terraform));
        let driver = Arc::new(ProvisioningDriver::from_config(
            provisioner,
            gate.clone(),
            &config.scaling,
        ));

        Ok(Self {
            source,
            gate,
            driver,
        })
    }
}

/// Run the poll loop until SIGINT or SIGTERM.
pub async fn run(config: HeadroomConfig) -> anyhow::Result<()> {
    info!(
        url = %config.metrics.url,
        interval = %format_duration(config.poll.interval),
        cooldown = %format_duration(config.scaling.cooldown),
        max_size = config.scaling.max_size,
        rules = config.rules.len(),
        "headroom daemon starting"
    );

    let components = Components::build(&config)?;
    let monitor = Monitor::new(components.source, config.rules.clone());
    let mut poll = PollLoop::new(monitor, components.driver, config.poll.interval);

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received, finishing current iteration");
        let _ = shutdown_tx.send(true);
    });

    poll.run(shutdown_rx).await;

    info!("headroom daemon stopped");
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "could not install SIGTERM handler, only Ctrl-C stops the daemon");
            ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    ctrl_c().await;
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "could not install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
}
