//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

pub use blockrelay_upstream::metrics::{
    EVENTS_DROPPED_TOTAL, EVENTS_INGESTED_TOTAL, UPSTREAM_FAILURES_TOTAL,
    UPSTREAM_FORCED_STOPS_TOTAL, UPSTREAM_START_FAILURES_TOTAL, UPSTREAM_STARTS_TOTAL,
};

/// Install the Prometheus recorder as the global `metrics` recorder.
///
/// Returns the handle used to render `/metrics`. Call once at startup.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// WebSocket connection duration seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Rejected upgrade requests (counter).
pub const WS_UPGRADE_REJECTIONS_TOTAL: &str = "ws_upgrade_rejections_total";
/// Frames dropped on a full client queue (counter).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// Slow clients evicted (counter).
pub const WS_EVICTIONS_TOTAL: &str = "ws_evictions_total";
/// Events broadcast by the relay loop (counter, labels: kind).
pub const EVENTS_BROADCAST_TOTAL: &str = "events_broadcast_total";
/// Supervisor restarts (counter, labels: trigger).
pub const SESSION_RESTARTS_TOTAL: &str = "session_restarts_total";
/// HTTP API requests (counter, labels: route, status).
pub const API_REQUESTS_TOTAL: &str = "api_requests_total";
