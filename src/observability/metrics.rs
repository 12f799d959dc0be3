//! Metrics collection and exposition.
//!
//! # Metrics
//! - `guard_calls_total` (counter): finished calls by proxy, outcome
//! - `guard_cache_lookups_total` (counter): cache lookups by proxy, result
//! - `guard_rate_limited_total` (counter): calls rejected by the limiter
//! - `guard_circuit_rejected_total` (counter): calls rejected by an open breaker
//! - `guard_access_denied_total` (counter): calls rejected by a policy
//! - `guard_breaker_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `guard_backend_duration_seconds` (histogram): backend call latency
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Prometheus exposition is opt-in via `init_metrics`

use std::net::SocketAddr;
use std::time::Instant;
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::BreakerState;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Prometheus metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a finished proxy call. `outcome` is a short static label.
pub fn record_call(proxy: &str, outcome: &'static str) {
    metrics::counter!("guard_calls_total", "proxy" => proxy.to_string(), "outcome" => outcome)
        .increment(1);
}

pub fn record_cache_lookup(proxy: &str, hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    metrics::counter!("guard_cache_lookups_total", "proxy" => proxy.to_string(), "result" => result)
        .increment(1);
}

pub fn record_rate_limited(proxy: &str) {
    metrics::counter!("guard_rate_limited_total", "proxy" => proxy.to_string()).increment(1);
}

pub fn record_circuit_rejected(proxy: &str) {
    metrics::counter!("guard_circuit_rejected_total", "proxy" => proxy.to_string()).increment(1);
}

pub fn record_access_denied(proxy: &str, policy: &str) {
    metrics::counter!(
        "guard_access_denied_total",
        "proxy" => proxy.to_string(),
        "policy" => policy.to_string()
    )
    .increment(1);
}

pub fn record_breaker_state(breaker: &str, state: BreakerState) {
    let value = match state {
        BreakerState::Closed => 0.0,
        BreakerState::HalfOpen => 1.0,
        BreakerState::Open => 2.0,
    };
    metrics::gauge!("guard_breaker_state", "proxy" => breaker.to_string()).set(value);
}

pub fn record_backend_duration(proxy: &str, start: Instant) {
    metrics::histogram!("guard_backend_duration_seconds", "proxy" => proxy.to_string())
        .record(start.elapsed().as_secs_f64());
}
