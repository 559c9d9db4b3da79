// src/core/tasks.rs

//! Spawns the long-running background engines that drive a running
//! machine once `ServerState` has been constructed, grounded on the
//! teacher's `server::spawner::spawn_all`: every task gets its own
//! subscription to a shared `broadcast` shutdown channel and is folded
//! into a `JoinSet` so the caller can wait for (or abort) the whole
//! fleet as a unit.

use crate::core::state::ServerState;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Spawns every periodic engine named in spec §2 — heartbeat-driven role
/// election, cluster-state refresh, checkpoint create/restore,
/// reconciliation, garbage collection, and (when enabled) background
/// proactive replication — all of which `ServerState::heartbeat` already
/// folds into a single cycle, so one ticking task is sufficient here
/// rather than one task per engine.
pub fn spawn_all(state: Arc<ServerState>, shutdown_tx: &broadcast::Sender<()>) -> JoinSet<()> {
    let mut tasks = JoinSet::new();

    let heartbeat_state = state.clone();
    let mut heartbeat_shutdown = shutdown_tx.subscribe();
    tasks.spawn(async move {
        run_heartbeat_loop(heartbeat_state, &mut heartbeat_shutdown).await;
    });

    info!("All background tasks have been spawned.");
    tasks
}

/// Ticks `ServerState::heartbeat` at `config.heartbeat_interval` until the
/// shutdown channel fires. A heartbeat failure is logged and the loop
/// keeps ticking — a transient Global KV or central-store outage should
/// not permanently stop future heartbeats from trying again.
async fn run_heartbeat_loop(state: Arc<ServerState>, shutdown_rx: &mut broadcast::Receiver<()>) {
    let mut interval = tokio::time::interval(state.config.heartbeat_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = state.heartbeat().await {
                    if e.is_transient() {
                        warn!("heartbeat cycle hit a transient error, will retry next tick: {}", e);
                    } else {
                        error!("heartbeat cycle failed: {}", e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("heartbeat loop shutting down");
                break;
            }
        }
    }
}
