//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define relay metrics (requests, verifications, forwards, attestations)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `relay_requests_total` (counter): requests by method, route, status
//! - `relay_request_duration_seconds` (histogram): latency distribution
//! - `relay_verifications_total` (counter): verification outcomes by reason code
//! - `relay_forwards_total` (counter): forward outcomes
//! - `relay_attestations_issued_total` (counter): tokens minted, by source
//! - `relay_watcher_block` (gauge): last block fully scanned by the watcher
//! - `relay_chain_health` (gauge): 1=node reachable, 0=unreachable
//! - `relay_rate_limited_total` (counter): requests refused by the limiter
//!
//! # Design Decisions
//! - The `metrics` facade is a no-op until an exporter is installed, so
//!   library code records unconditionally

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, route: &str, status: u16, start: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("route", route.to_string()),
        ("status", status.to_string()),
    ];
    counter!("relay_requests_total", &labels[..]).increment(1);
    histogram!("relay_request_duration_seconds", &labels[..]).record(start.elapsed().as_secs_f64());
}

/// `outcome` is `verified` or a failure code.
pub fn record_verification(outcome: &str) {
    counter!("relay_verifications_total", "outcome" => outcome.to_string()).increment(1);
}

pub fn record_forward(outcome: &str) {
    counter!("relay_forwards_total", "outcome" => outcome.to_string()).increment(1);
}

/// `source` is `relay` or `watcher`.
pub fn record_attestation(source: &'static str) {
    counter!("relay_attestations_issued_total", "source" => source).increment(1);
}

pub fn record_watcher_block(height: u64) {
    gauge!("relay_watcher_block").set(height as f64);
}

pub fn record_chain_health(healthy: bool) {
    gauge!("relay_chain_health").set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_rate_limited() {
    counter!("relay_rate_limited_total").increment(1);
}
