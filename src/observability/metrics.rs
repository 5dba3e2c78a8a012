//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (sessions, bytes, messages, captures, faults)
//! - Expose a Prometheus-compatible scrape endpoint
//!
//! # Metrics
//! - `proxy_sessions_total` (counter), `proxy_active_sessions` (gauge)
//! - `proxy_bytes_forwarded_total` / `proxy_messages_total` by direction
//! - `proxy_commands_captured_total` by operation kind
//! - `proxy_correlation_misses_total`, `proxy_correlation_evictions_total`
//! - `proxy_decode_failures_total` / `proxy_framing_errors_total` by direction
//! - `proxy_audit_records_total`, `proxy_audit_failures_total`,
//!   `proxy_enrichment_skipped_total`
//! - `proxy_upstream_connect_failures_total`
//!
//! # Design Decisions
//! - Recording without an installed exporter is a no-op, so tests and
//!   metrics-disabled deployments pay almost nothing

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_session_opened(active: u64) {
    metrics::counter!("proxy_sessions_total").increment(1);
    metrics::gauge!("proxy_active_sessions").set(active as f64);
}

pub fn record_session_closed(active: u64) {
    metrics::gauge!("proxy_active_sessions").set(active as f64);
}

pub fn record_forwarded(direction: &'static str, bytes: usize) {
    metrics::counter!("proxy_bytes_forwarded_total", "direction" => direction).increment(bytes as u64);
}

pub fn record_message(direction: &'static str) {
    metrics::counter!("proxy_messages_total", "direction" => direction).increment(1);
}

pub fn record_capture(kind: &'static str) {
    metrics::counter!("proxy_commands_captured_total", "kind" => kind).increment(1);
}

pub fn record_correlation_miss() {
    metrics::counter!("proxy_correlation_misses_total").increment(1);
}

pub fn record_correlation_eviction(reason: &'static str) {
    metrics::counter!("proxy_correlation_evictions_total", "reason" => reason).increment(1);
}

pub fn record_decode_failure(direction: &'static str) {
    metrics::counter!("proxy_decode_failures_total", "direction" => direction).increment(1);
}

pub fn record_framing_error(direction: &'static str) {
    metrics::counter!("proxy_framing_errors_total", "direction" => direction).increment(1);
}

pub fn record_audit_delivered() {
    metrics::counter!("proxy_audit_records_total").increment(1);
}

pub fn record_audit_failure() {
    metrics::counter!("proxy_audit_failures_total").increment(1);
}

pub fn record_enrichment_skipped() {
    metrics::counter!("proxy_enrichment_skipped_total").increment(1);
}

pub fn record_upstream_connect_failure() {
    metrics::counter!("proxy_upstream_connect_failures_total").increment(1);
}
