// Telemetry Forwarder Daemon - Status endpoints
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! HTTP status server: `/metrics`, `/health`, `/ready` and `/status`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use telemetry_forwarder::{ForwarderStats, StatsSnapshot};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::metrics::{encode_metrics, update_from_snapshot};

/// Application state shared across handlers.
pub struct AppState {
    pub stats: Arc<ForwarderStats>,
    pub input: String,
    pub topic_base: String,
    pub start_time: Instant,
}

impl AppState {
    /// Start the uptime clock now
    pub fn new(stats: Arc<ForwarderStats>, input: impl Into<String>, topic_base: impl Into<String>) -> Self {
        Self {
            stats,
            input: input.into(),
            topic_base: topic_base.into(),
            start_time: Instant::now(),
        }
    }
}

/// Build the status router over `state`
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/status", get(status_handler))
        .with_state(state)
}

/// Bind the status listener on all interfaces
pub async fn bind(port: u16) -> std::io::Result<TcpListener> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics endpoint: http://{}/metrics", addr);
    Ok(listener)
}

/// Serve until `shutdown` is cancelled
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

/// Metrics handler - returns Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    update_from_snapshot(&state.stats.snapshot());

    match encode_metrics() {
        Ok(metrics) => (
            StatusCode::OK,
            [("Content-Type", "text/plain; charset=utf-8")],
            metrics,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Ready while the dispatch loop runs.
async fn ready_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.stats.is_running() {
        (StatusCode::OK, "Ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Not ready")
    }
}

/// Status information response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    version: String,
    uptime_secs: u64,
    input: String,
    topic_base: String,
    stats: StatsSnapshot,
}

/// Status handler - returns JSON status information.
async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: telemetry_forwarder::VERSION.to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        input: state.input.clone(),
        topic_base: state.topic_base.clone(),
        stats: state.stats.snapshot(),
    })
}
