// src/metrics.rs

#[cfg(feature = "observability")]
pub use metrics::{counter, describe_counter, describe_gauge, gauge};

// NOTE: When observability feature is disabled, provide stub implementations
#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! counter {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! gauge {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_counter {
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_gauge {
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
use crate::{counter, describe_counter, describe_gauge, gauge};

/// Registers metric descriptions. Call once at startup.
pub fn describe_metrics() {
    describe_counter!("api_requests_total", "HTTP API requests by route and status class.");
    describe_counter!(
        "imbalance_evaluations_total",
        "Pool ratio evaluations by outcome (balanced / imbalanced)."
    );
    describe_counter!(
        "rebalance_decisions_total",
        "Rebalance estimates by decision (not_needed / rejected / allowed)."
    );
    describe_counter!(
        "aggregator_fallbacks_total",
        "Aggregator requests answered by the local mock quote generator."
    );
    describe_counter!("discovery_runs_total", "Pool discovery runs by outcome.");
    describe_gauge!("registered_pools", "Pools currently held by the registry.");
}

/// Installs the Prometheus exporter listening on `addr`.
#[cfg(feature = "observability")]
pub fn install_prometheus(addr: std::net::SocketAddr) -> anyhow::Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    describe_metrics();
    Ok(())
}

pub fn increment_api_request(route: &str, status: u16) {
    let class = match status {
        200..=299 => "2xx",
        400..=499 => "4xx",
        _ => "5xx",
    };
    counter!("api_requests_total", 1, "route" => route.to_string(), "status" => class);
}

pub fn increment_imbalance_evaluation(needs_rebalancing: bool) {
    let outcome = if needs_rebalancing { "imbalanced" } else { "balanced" };
    counter!("imbalance_evaluations_total", 1, "outcome" => outcome);
}

pub fn increment_rebalance_decision(decision: &str) {
    counter!("rebalance_decisions_total", 1, "decision" => decision.to_string());
}

pub fn increment_aggregator_fallback(operation: &str) {
    counter!("aggregator_fallbacks_total", 1, "operation" => operation.to_string());
}

pub fn increment_discovery_run(outcome: &str) {
    counter!("discovery_runs_total", 1, "outcome" => outcome.to_string());
}

pub fn set_registered_pools(count: usize) {
    gauge!("registered_pools", count as f64);
}
