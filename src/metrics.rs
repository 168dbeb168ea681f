//! Prometheus metrics registration (§2 ambient stack).
//!
//! Mirrors the teacher's `metrics.rs` convention of installing a single
//! process-wide recorder up front and then calling the free functions
//! (`metrics::counter!`, `metrics::histogram!`) from anywhere in the
//! crate, rather than threading a metrics handle through every call.

use axum::{routing::get, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tracing::info;

pub const POLL_CYCLES_TOTAL: &str = "radar_poll_cycles_total";
pub const POLL_LATENCY_SECONDS: &str = "radar_poll_latency_seconds";
pub const POLL_ERRORS_TOTAL: &str = "radar_poll_errors_total";
pub const EVENTS_DETECTED_TOTAL: &str = "radar_events_detected_total";
pub const REBUILD_DURATION_SECONDS: &str = "radar_rebuild_duration_seconds";
pub const AIS_RECONNECTS_TOTAL: &str = "radar_ais_reconnects_total";
pub const AIS_VESSELS_TRACKED: &str = "radar_ais_vessels_tracked";
pub const HISTORY_WRITES_TOTAL: &str = "radar_history_writes_total";
pub const HISTORY_CLEANUP_ROWS_TOTAL: &str = "radar_history_cleanup_rows_total";
pub const SEMANTIC_QUERIES_TOTAL: &str = "radar_semantic_queries_total";
pub const HTTP_REQUESTS_TOTAL: &str = "radar_http_requests_total";

/// Install the global Prometheus recorder and return a handle whose
/// `render()` backs the `/metrics` endpoint.
pub fn install() -> PrometheusHandle {
    let builder = PrometheusBuilder::new();
    let handle = builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");
    info!("Prometheus metrics recorder installed");
    handle
}

/// Serve `handle`'s rendered output on its own port, independent of the
/// main API router, mirroring the teacher's standalone metrics server.
pub async fn serve(handle: PrometheusHandle, port: u16) {
    let app = Router::new().route("/metrics", get(move || { let handle = handle.clone(); async move { handle.render() } }));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting metrics server on http://{addr}/metrics");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::warn!("Failed to bind metrics server on {addr}: {e}");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        tracing::warn!("Metrics server exited: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_does_not_panic_more_than_once_per_process() {
        // Installing twice in the same process would panic (global
        // recorder), so this just exercises the first install path
        // indirectly via metric emission without re-installing.
        metrics::counter!(POLL_CYCLES_TOTAL).increment(1);
    }
}
