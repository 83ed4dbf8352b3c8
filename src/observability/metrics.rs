//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define BFF metrics (requests, cache, upstream, rate limiting, breakers)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `bff_requests_total` (counter): inbound requests by method, route, status
//! - `bff_request_duration_seconds` (histogram): inbound latency by route
//! - `bff_cache_hits_total` / `bff_cache_misses_total` (counter): by tier
//! - `bff_cache_entries` (gauge): memory tier size
//! - `bff_upstream_requests_total` (counter): by service and outcome
//! - `bff_upstream_duration_seconds` (histogram): by service
//! - `bff_rate_limited_total` (counter): rejections by endpoint
//! - `bff_circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `bff_warm_tasks_total` (counter): warm tasks by outcome
//! - `bff_store_fallbacks_total` (counter): durable store errors by component
//!
//! # Design Decisions
//! - Recording is a no-op until `init_metrics` installs the exporter, so
//!   tests and tools never need a recorder
//! - Route labels come from the matched route template, never the raw path

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::circuit_breaker::CircuitState;

pub mod names {
    pub const REQUESTS_TOTAL: &str = "bff_requests_total";
    pub const REQUEST_DURATION_SECONDS: &str = "bff_request_duration_seconds";
    pub const CACHE_HITS_TOTAL: &str = "bff_cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "bff_cache_misses_total";
    pub const CACHE_ENTRIES: &str = "bff_cache_entries";
    pub const UPSTREAM_REQUESTS_TOTAL: &str = "bff_upstream_requests_total";
    pub const UPSTREAM_DURATION_SECONDS: &str = "bff_upstream_duration_seconds";
    pub const RATE_LIMITED_TOTAL: &str = "bff_rate_limited_total";
    pub const CIRCUIT_STATE: &str = "bff_circuit_state";
    pub const WARM_TASKS_TOTAL: &str = "bff_warm_tasks_total";
    pub const STORE_FALLBACKS_TOTAL: &str = "bff_store_fallbacks_total";
}

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, route: &str, start: Instant) {
    counter!(
        names::REQUESTS_TOTAL,
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!(names::REQUEST_DURATION_SECONDS, "route" => route.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_cache_hit(tier: &'static str) {
    counter!(names::CACHE_HITS_TOTAL, "tier" => tier).increment(1);
}

pub fn record_cache_miss() {
    counter!(names::CACHE_MISSES_TOTAL).increment(1);
}

pub fn record_cache_size(entries: usize) {
    gauge!(names::CACHE_ENTRIES).set(entries as f64);
}

pub fn record_upstream_call(service: &str, success: bool, start: Instant) {
    let outcome = if success { "success" } else { "failure" };
    counter!(
        names::UPSTREAM_REQUESTS_TOTAL,
        "service" => service.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!(names::UPSTREAM_DURATION_SECONDS, "service" => service.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_rate_limited(endpoint: &str) {
    counter!(names::RATE_LIMITED_TOTAL, "endpoint" => endpoint.to_string()).increment(1);
}

pub fn record_breaker_state(service: &str, state: CircuitState) {
    gauge!(names::CIRCUIT_STATE, "service" => service.to_string()).set(state.as_gauge());
}

pub fn record_warm_run(succeeded: usize, failed: usize) {
    counter!(names::WARM_TASKS_TOTAL, "outcome" => "success").increment(succeeded as u64);
    counter!(names::WARM_TASKS_TOTAL, "outcome" => "failure").increment(failed as u64);
}

pub fn record_store_fallback(component: &'static str) {
    counter!(names::STORE_FALLBACKS_TOTAL, "component" => component).increment(1);
}
