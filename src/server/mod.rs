// src/server/mod.rs

//! The main server startup function, orchestrating state construction,
//! background-task spawning, and the shutdown sequence — grounded on the
//! teacher's `server::run`, minus the client connection-acceptance loop:
//! this daemon has no wire protocol of its own, spec §1 treats the
//! command-line wrapping and RPC transport as external collaborators.

use crate::config::Config;
use crate::core::state::ServerState;
use crate::core::tasks;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{filter::EnvFilter, reload};

mod metrics_server;

/// Initializes `ServerState`, spawns every background engine, then blocks
/// until `Ctrl-C` (or another `shutdown_tx` trigger) arrives, at which
/// point it asks every task to wind down and releases this machine's
/// master lease if it was holding one.
pub async fn run(
    config: Config,
    _log_reload_handle: Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>,
) -> Result<()> {
    info!(
        host = %config.host,
        port = config.port,
        data_dir = %config.data_dir,
        "starting locusd"
    );

    let metrics_enabled = config.metrics.enabled;
    let state = ServerState::initialize(config).await?;
    info!(machine_id = %state.machine_id, machine_location = %state.machine_location, "server state initialized");

    let (shutdown_tx, _) = broadcast::channel(1);
    let mut background_tasks = tasks::spawn_all(state.clone(), &shutdown_tx);

    if metrics_enabled {
        let metrics_state = state.clone();
        let metrics_shutdown = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            metrics_server::run_metrics_server(metrics_state, metrics_shutdown).await;
        });
    } else {
        info!("Prometheus metrics server is disabled in the configuration.");
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, winding down");

    let _ = shutdown_tx.send(());
    while background_tasks.join_next().await.is_some() {}

    if let Err(e) = state.elector.release_role_if_necessary().await {
        warn!("failed to release master lease during shutdown: {}", e);
    }

    info!("locusd shut down cleanly");
    Ok(())
}
