//! Metrics collection and exposition.
//!
//! # Metrics
//! - `admission_requests_total` (counter): requests entering the pipeline
//! - `admission_rejected_total` (counter): terminal rejections by stage
//! - `sanitized_fields_total` (counter): fields rewritten, by rule
//! - `rate_limit_tracked_clients` (gauge): live rate-limit windows
//!
//! Recording is a no-op until [`init_metrics`] installs the exporter.

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request() {
    counter!("admission_requests_total").increment(1);
}

pub fn record_rejected(stage: &'static str) {
    counter!("admission_rejected_total", "stage" => stage).increment(1);
}

pub fn record_sanitized(rule: &'static str, fields: usize) {
    counter!("sanitized_fields_total", "rule" => rule).increment(fields as u64);
}

pub fn record_tracked_clients(count: usize) {
    gauge!("rate_limit_tracked_clients").set(count as f64);
}
