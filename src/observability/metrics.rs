//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status, backend
//! - `proxy_request_duration_seconds` (histogram): end-to-end latency
//! - `proxy_rate_limited_total` (counter): requests rejected with 429
//! - `proxy_no_backend_total` (counter): requests rejected with 503
//! - `proxy_backend_failures_total` (counter): transport failures per backend
//! - `proxy_backend_health` (gauge): 1=alive, 0=down
//!
//! Recording is a no-op until a recorder is installed.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, backend: &str, start: Instant) {
    counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "backend" => backend.to_string()
    )
    .increment(1);
    histogram!("proxy_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_rate_limited() {
    counter!("proxy_rate_limited_total").increment(1);
}

pub fn record_no_backend() {
    counter!("proxy_no_backend_total").increment(1);
}

pub fn record_backend_failure(backend: &str) {
    counter!("proxy_backend_failures_total", "backend" => backend.to_string()).increment(1);
}

pub fn record_backend_health(backend: &str, alive: bool) {
    gauge!("proxy_backend_health", "backend" => backend.to_string()).set(if alive { 1.0 } else { 0.0 });
}
