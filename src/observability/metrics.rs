//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by forwarder and outcome
//! - `proxy_state_api_calls_total` (counter): state API calls by outcome
//! - `proxy_header_rule_failures_total` (counter): rules that failed to apply
//! - `proxy_bytes_total` (counter): bytes relayed by direction
//!
//! # Design Decisions
//! - Recording is a no-op until [`init_metrics`] installs the exporter

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Start the Prometheus scrape endpoint on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// `outcome` is one of `forwarded`, `aborted`, `no_forwarder`, `failed`.
pub fn record_request(forwarder: &str, outcome: &'static str) {
    ::metrics::counter!(
        "proxy_requests_total",
        "forwarder" => forwarder.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// `outcome` is one of `called`, `failed`, `skipped`, `aborted`.
pub fn record_state_api_call(outcome: &'static str) {
    ::metrics::counter!("proxy_state_api_calls_total", "outcome" => outcome).increment(1);
}

pub fn record_header_rule_failure() {
    ::metrics::counter!("proxy_header_rule_failures_total").increment(1);
}

/// `direction` is `upstream` (client to backend) or `downstream`.
pub fn record_bytes(direction: &'static str, bytes: u64) {
    ::metrics::counter!("proxy_bytes_total", "direction" => direction).increment(bytes);
}
