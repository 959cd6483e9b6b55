//! Metrics collection and exposition.
//!
//! # Metrics
//! - `executor_jobs_total` (counter): finished deliveries by outcome
//! - `executor_job_attempts_total` (counter): execution attempts by chain, result
//! - `executor_rpc_calls_total` (counter): RPC calls by chain, method, outcome
//! - `executor_rpc_duration_seconds` (histogram): RPC latency by chain, method
//! - `executor_circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `executor_circuit_rejections_total` (counter): calls refused by an open breaker
//! - `executor_confirmation_wait_seconds` (histogram): submit-to-confirmed time
//! - `executor_dead_letters_total` (counter): messages sent to the dead-letter sink
//! - `executor_transactions_confirmed_total` (counter): promotions by the sweep
//!
//! Recording is a no-op until [`init_metrics`] installs the exporter, so
//! library code and tests can call these helpers unconditionally.

use ::metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

use crate::resilience::circuit_breaker::CircuitState;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Prometheus exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install Prometheus exporter"),
    }
}

/// Record a finished delivery (`completed`, `dead_lettered`, `released`).
pub fn record_job_outcome(outcome: &'static str) {
    counter!("executor_jobs_total", "outcome" => outcome).increment(1);
}

/// Record one execution attempt.
pub fn record_attempt(chain: &str, result: &'static str) {
    counter!(
        "executor_job_attempts_total",
        "chain" => chain.to_string(),
        "result" => result
    )
    .increment(1);
}

/// Record one RPC call and its latency.
pub fn record_rpc_call(chain: &str, method: &'static str, ok: bool, start: Instant) {
    let outcome = if ok { "ok" } else { "error" };
    counter!(
        "executor_rpc_calls_total",
        "chain" => chain.to_string(),
        "method" => method,
        "outcome" => outcome
    )
    .increment(1);
    histogram!(
        "executor_rpc_duration_seconds",
        "chain" => chain.to_string(),
        "method" => method
    )
    .record(start.elapsed().as_secs_f64());
}

/// Publish the current breaker state.
pub fn record_circuit_state(name: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    gauge!("executor_circuit_state", "breaker" => name.to_string()).set(value);
}

pub fn record_circuit_rejection(name: &str) {
    counter!("executor_circuit_rejections_total", "breaker" => name.to_string()).increment(1);
}

pub fn record_confirmation_wait(chain: &str, seconds: f64) {
    histogram!("executor_confirmation_wait_seconds", "chain" => chain.to_string()).record(seconds);
}

pub fn record_dead_letter() {
    counter!("executor_dead_letters_total").increment(1);
}

pub fn record_confirmed(chain: &str) {
    counter!("executor_transactions_confirmed_total", "chain" => chain.to_string()).increment(1);
}
