//! `armoryd`: the ammunition cabinet controller daemon.
//!
//! Loads a JSON controller configuration, connects both relay boards and
//! runs the monitor and the business machines until Ctrl+C.
//!
//! ```text
//! armoryd --config /etc/armory/controller.json
//! ```
//!
//! The log level follows `RUST_LOG` and falls back to `info`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use armory_core::{ControllerConfig, Endpoint, TransportKind};
use armory_hardware::HardwareManager;
use armory_machines::{
    ApplyAmmoSettings, Effects, MonitorCore, MonitorHandle, MonitorSettings, OrchestratorHandle,
    TracingAnnouncer, forward_transport_events,
};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "armoryd", about = "Ammunition cabinet controller", version)]
struct Cli {
    /// Path to the controller configuration file.
    #[arg(long, short, env = "ARMORY_CONFIG")]
    config: PathBuf,

    /// Open every relay on both boards before starting.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    reset_relays: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = ControllerConfig::from_json_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    let manager = Arc::new(HardwareManager::from_config(&config).context("building hardware manager")?);
    let streams: Vec<_> = TransportKind::ALL
        .into_iter()
        .filter_map(|kind| manager.subscribe(kind))
        .collect();

    manager.initialize().await;
    if cli.reset_relays {
        manager.reset_all_relays().await;
    }

    let effects = Effects::new(manager.clone(), Arc::new(TracingAnnouncer), config.relays);
    let (orchestrator, orchestrator_task) =
        OrchestratorHandle::spawn(effects, ApplyAmmoSettings::from_config(&config));

    let snapshot = manager.connection_status();
    let connected = |endpoint: Endpoint| {
        snapshot
            .get(endpoint.id())
            .is_some_and(|status| status.is_connected())
    };
    let core = MonitorCore::new(
        MonitorSettings::from_config(&config),
        connected(Endpoint::Cabinet),
        connected(Endpoint::Control),
        tokio::time::Instant::now(),
    );
    let (monitor, _) = MonitorHandle::spawn(core, orchestrator.inbox());
    monitor.start().await?;

    for events in streams {
        tokio::spawn(forward_transport_events(events, monitor.clone()));
    }
    info!("armoryd running");

    tokio::signal::ctrl_c().await.context("waiting for Ctrl+C")?;
    info!("shutting down");

    if let Err(e) = monitor.stop().await {
        warn!("Monitor stop failed: {e}");
    }
    if let Err(e) = orchestrator.shutdown().await {
        warn!("Orchestrator shutdown failed: {e}");
    }
    let _ = orchestrator_task.await;
    manager.shutdown().await;
    Ok(())
}
