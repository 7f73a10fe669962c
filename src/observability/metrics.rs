//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by route, status
//! - `gateway_request_duration_seconds` (histogram): latency by route
//! - `gateway_upstream_errors_total` (counter): forwarding failures by route, reason
//! - `gateway_active_connections` (gauge): open client connections
//! - `gateway_pool_reused_total` (counter): upstream connections reused from the pool
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed, so tests and
//!   deployments without an exporter pay almost nothing
//! - Label cardinality is bounded by the route table

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Label used when no route matched.
pub const NO_ROUTE: &str = "none";

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Prometheus exporter listening");
    Ok(())
}

/// Record one completed request.
pub fn record_request(route: &str, status: u16, start: Instant) {
    let route = route.to_string();
    counter!("gateway_requests_total", "route" => route.clone(), "status" => status.to_string())
        .increment(1);
    histogram!("gateway_request_duration_seconds", "route" => route)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_upstream_error(route: &str, reason: &'static str) {
    counter!("gateway_upstream_errors_total", "route" => route.to_string(), "reason" => reason)
        .increment(1);
}

pub fn connection_opened() {
    gauge!("gateway_active_connections").increment(1.0);
}

pub fn connection_closed() {
    gauge!("gateway_active_connections").decrement(1.0);
}

pub fn record_pool_reuse() {
    counter!("gateway_pool_reused_total").increment(1);
}
