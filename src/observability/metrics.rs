//! Metrics collection and exposition.
//!
//! # Metrics
//! - `ingest_requests_total` (counter): requests by mode and outcome
//! - `ingest_rejections_total` (counter): rejections by reason code
//! - `ingest_fail_open_total` (counter): guards skipped under the open policy
//! - `ingest_validation_duration_seconds` (histogram): time spent in admission
//! - `ingest_events_total` (counter): events handed to the sink, by kind
//! - `ingest_rate_windows_purged_total` (counter): windows removed by the janitor

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics recorder"),
    }
}

/// Count one finished ingest request. `mode` is `"none"` when the request
/// failed before a mode was chosen.
pub fn record_request(mode: &'static str, outcome: &'static str, start: Instant) {
    metrics::counter!("ingest_requests_total", "mode" => mode, "outcome" => outcome).increment(1);
    metrics::histogram!("ingest_validation_duration_seconds", "mode" => mode)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_rejection(reason: &'static str) {
    metrics::counter!("ingest_rejections_total", "reason" => reason).increment(1);
}

pub fn record_fail_open(mechanism: &'static str) {
    metrics::counter!("ingest_fail_open_total", "mechanism" => mechanism).increment(1);
}

pub fn record_events(kind: &'static str, count: u64) {
    metrics::counter!("ingest_events_total", "kind" => kind).increment(count);
}

pub fn record_windows_purged(count: u64) {
    metrics::counter!("ingest_rate_windows_purged_total").increment(count);
}
