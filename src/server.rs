// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! HTTP endpoint exposing Prometheus metrics and a liveness probe.
//!
//! - `GET /metrics` - text exposition of [`crate::metrics::METRICS_REGISTRY`]
//! - `GET /healthz` - always `200 ok` while the process serves requests

use crate::metrics::gather_metrics;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

const TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Router with the metrics and health routes.
pub fn router() -> Router {
    Router::new()
        .route("/metrics", get(serve_metrics))
        .route("/healthz", get(healthz))
}

/// GET /metrics
pub async fn serve_metrics() -> impl IntoResponse {
    match gather_metrics() {
        Ok(body) => (StatusCode::OK, [(header::CONTENT_TYPE, TEXT_CONTENT_TYPE)], body),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, TEXT_CONTENT_TYPE)],
                format!("failed to encode metrics: {e}"),
            )
        }
    }
}

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Serve [`router`] on `addr` until `shutdown` flips to true.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
pub async fn serve(addr: SocketAddr, mut shutdown: watch::Receiver<bool>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(address = %listener.local_addr()?, "Starting metrics server");

    axum::serve(listener, router())
        .with_graceful_shutdown(async move {
            // A dropped sender also means stop
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await?;

    info!("Metrics server stopped");
    Ok(())
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod server_tests;
