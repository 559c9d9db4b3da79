// src/server/metrics_server.rs

//! Exposes `/metrics` over HTTP, grounded on the teacher's
//! `server::metrics_server`: a couple of dynamic gauges are refreshed on
//! every scrape, then the whole Prometheus registry is encoded.

use crate::core::metrics::gather_metrics;
use crate::core::state::ServerState;
use axum::{Router, http::StatusCode, response::IntoResponse, routing::get};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Handles requests to `/metrics`: refreshes the gauges that track
/// current, not cumulative, state before gathering the registry.
async fn metrics_handler(state: Arc<ServerState>) -> impl IntoResponse {
    crate::core::metrics::LOCATION_DB_KEY_COUNT.set(state.location_db.key_count() as f64);
    crate::core::metrics::MASTER_ROLE.set(if state.elector.role() == crate::core::election::Role::Master { 1.0 } else { 0.0 });

    let body = gather_metrics();
    (StatusCode::OK, [("content-type", "text/plain; version=0.0.4")], body)
}

/// Runs the metrics HTTP server until `shutdown_rx` fires.
pub async fn run_metrics_server(state: Arc<ServerState>, mut shutdown_rx: broadcast::Receiver<()>) {
    let port = state.config.metrics.port;
    let app = Router::new().route("/metrics", get(move || metrics_handler(state.clone())));
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!("Prometheus metrics server listening on http://{}/metrics", addr);
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind metrics server on port {}: {}", port, e);
            return;
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.recv().await.ok();
            info!("Metrics server shutting down.");
        })
        .await
        .unwrap();
}
