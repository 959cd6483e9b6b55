//! Circuit breaker for RPC protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: endpoint assumed down, calls fail fast with [`CircuitOpen`]
//! - Half-Open: calls pass while the endpoint proves it recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= failure_threshold
//! Open → Half-Open: timeout elapsed since the last failure (on next state read)
//! Half-Open → Closed: success_count >= success_threshold
//! Half-Open → Open: failure_count >= failure_threshold again
//! ```
//!
//! One breaker per chain, shared by all workers. State reads take the read
//! lock; transitions take the write lock.

use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::RwLock;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::schema::CircuitBreakerConfig;
use crate::observability::metrics;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => f.write_str("closed"),
            CircuitState::Open => f.write_str("open"),
            CircuitState::HalfOpen => f.write_str("half_open"),
        }
    }
}

/// Returned instead of running the call while the breaker is open.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("circuit breaker '{name}' is open")]
pub struct CircuitOpen {
    pub name: String,
}

/// Point-in-time view for the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout_secs: u64,
    /// Seconds since the most recent recorded failure.
    pub last_failure_secs_ago: Option<u64>,
}

#[derive(Debug)]
struct Counters {
    state: CircuitState,
    failures: u32,
    successes: u32,
    last_failure: Option<Instant>,
}

/// Three-state circuit breaker guarding an async operation.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    success_threshold: u32,
    timeout: Duration,
    counters: RwLock<Counters>,
}

impl CircuitBreaker {
    pub fn new(
        name: impl Into<String>,
        failure_threshold: u32,
        success_threshold: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            success_threshold: success_threshold.max(1),
            timeout,
            counters: RwLock::new(Counters {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                last_failure: None,
            }),
        }
    }

    pub fn from_config(name: impl Into<String>, config: &CircuitBreakerConfig) -> Self {
        Self::new(
            name,
            config.failure_threshold,
            config.success_threshold,
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, moving Open to Half-Open once the timeout has elapsed.
    pub fn state(&self) -> CircuitState {
        {
            let counters = self.counters.read().unwrap_or_else(|e| e.into_inner());
            if !self.cooled_down(&counters) {
                return counters.state;
            }
        }

        let mut counters = self.counters.write().unwrap_or_else(|e| e.into_inner());
        if self.cooled_down(&counters) {
            counters.state = CircuitState::HalfOpen;
            counters.successes = 0;
            counters.failures = 0;
            tracing::info!(breaker = %self.name, "Circuit half-open, probing endpoint");
            metrics::record_circuit_state(&self.name, CircuitState::HalfOpen);
        }
        counters.state
    }

    /// Run `fut` through the breaker.
    ///
    /// The future is not polled when the breaker is open; the caller gets
    /// `CircuitOpen` converted into its own error type instead.
    pub async fn call<T, E, F>(&self, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<CircuitOpen>,
    {
        if self.state() == CircuitState::Open {
            metrics::record_circuit_rejection(&self.name);
            return Err(CircuitOpen {
                name: self.name.clone(),
            }
            .into());
        }

        match fut.await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(e)
            }
        }
    }

    pub fn record_success(&self) {
        let mut counters = self.counters.write().unwrap_or_else(|e| e.into_inner());
        match counters.state {
            CircuitState::Closed => counters.failures = 0,
            CircuitState::HalfOpen => {
                counters.successes += 1;
                if counters.successes >= self.success_threshold {
                    counters.state = CircuitState::Closed;
                    counters.failures = 0;
                    counters.successes = 0;
                    tracing::info!(breaker = %self.name, "Circuit closed");
                    metrics::record_circuit_state(&self.name, CircuitState::Closed);
                }
            }
            // A call admitted before the breaker opened finished late.
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut counters = self.counters.write().unwrap_or_else(|e| e.into_inner());
        counters.failures += 1;
        counters.successes = 0;
        counters.last_failure = Some(Instant::now());

        if counters.state != CircuitState::Open && counters.failures >= self.failure_threshold {
            counters.state = CircuitState::Open;
            tracing::warn!(
                breaker = %self.name,
                failures = counters.failures,
                timeout_secs = self.timeout.as_secs(),
                "Circuit opened"
            );
            metrics::record_circuit_state(&self.name, CircuitState::Open);
        }
    }

    /// Force the breaker back to Closed with cleared counters.
    pub fn reset(&self) {
        let mut counters = self.counters.write().unwrap_or_else(|e| e.into_inner());
        counters.state = CircuitState::Closed;
        counters.failures = 0;
        counters.successes = 0;
        counters.last_failure = None;
        metrics::record_circuit_state(&self.name, CircuitState::Closed);
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let state = self.state();
        let counters = self.counters.read().unwrap_or_else(|e| e.into_inner());
        BreakerSnapshot {
            name: self.name.clone(),
            state,
            failure_count: counters.failures,
            success_count: counters.successes,
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            timeout_secs: self.timeout.as_secs(),
            last_failure_secs_ago: counters.last_failure.map(|at| at.elapsed().as_secs()),
        }
    }

    fn cooled_down(&self, counters: &Counters) -> bool {
        counters.state == CircuitState::Open
            && counters
                .last_failure
                .is_some_and(|at| at.elapsed() > self.timeout)
    }
}
