//! Prometheus metrics endpoint.
//!
//! Installs the global recorder and serves `/metrics` and `/health` over
//! HTTP for scraping and liveness probes.

use axum::{routing::get, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use snafu::prelude::*;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::error;

use crate::error::{MetricsError, PrometheusInitSnafu};

/// Install the Prometheus recorder and start the scrape endpoint.
///
/// The server runs as a background task for the lifetime of the process;
/// bind or serve failures are logged rather than propagated so a broken
/// metrics port never takes the pipeline down.
pub fn init(addr: SocketAddr) -> Result<(), MetricsError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context(PrometheusInitSnafu)?;

    tokio::spawn(serve(addr, handle));

    Ok(())
}

async fn serve(addr: SocketAddr, handle: PrometheusHandle) {
    let app = Router::new()
        .route(
            "/metrics",
            get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        )
        .route("/health", get(|| async { "ok\n" }));

    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind metrics server to {}: {}", addr, e);
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        error!("Metrics server error: {}", e);
    }
}
