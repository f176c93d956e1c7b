//! Metrics collection and exposition.
//!
//! # Metrics
//! - `dispatch_credential_selections_total` (counter): selections by credential, degraded flag
//! - `dispatch_degraded_selections_total` (counter): selections made with every credential cooling down
//! - `dispatch_credential_rate_limited_total` (counter): rate-limit signals by credential
//! - `dispatch_attempts_total` (counter): upstream attempts by service, outcome
//! - `dispatch_retries_total` (counter): scheduled retries by service
//! - `dispatch_circuit_open` (gauge): 1=open, 0=closed, by service
//! - `dispatch_idempotency_lookups_total` (counter): lookups by cache, result
//! - `dispatch_idempotency_entries` (gauge): stored entries by cache
//!
//! Recording goes through the `metrics` facade and is a no-op until a
//! recorder is installed with [`init_metrics`].

use std::net::SocketAddr;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    let builder = PrometheusBuilder::new().with_http_listener(addr);
    match builder.install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_credential_selected(credential: &str, degraded: bool) {
    counter!(
        "dispatch_credential_selections_total",
        "credential" => credential.to_string(),
        "degraded" => if degraded { "true" } else { "false" }
    )
    .increment(1);
    if degraded {
        counter!("dispatch_degraded_selections_total").increment(1);
    }
}

pub fn record_credential_rate_limited(credential: &str) {
    counter!("dispatch_credential_rate_limited_total", "credential" => credential.to_string()).increment(1);
}

pub fn record_attempt(service: &str, outcome: &'static str) {
    counter!(
        "dispatch_attempts_total",
        "service" => service.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_retry(service: &str) {
    counter!("dispatch_retries_total", "service" => service.to_string()).increment(1);
}

pub fn record_circuit_state(service: &str, open: bool) {
    gauge!("dispatch_circuit_open", "service" => service.to_string()).set(if open { 1.0 } else { 0.0 });
}

pub fn record_idempotency_lookup(cache: &str, result: &'static str) {
    counter!(
        "dispatch_idempotency_lookups_total",
        "cache" => cache.to_string(),
        "result" => result
    )
    .increment(1);
}

pub fn record_cache_size(cache: &str, entries: usize) {
    gauge!("dispatch_idempotency_entries", "cache" => cache.to_string()).set(entries as f64);
}
