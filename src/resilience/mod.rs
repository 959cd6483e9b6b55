//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Job:
//!     → retries.rs (attempt, back off, dead-letter on exhaustion)
//!         → backoff.rs (exponential schedule with optional jitter)
//! RPC call:
//!     → circuit_breaker.rs (per chain; reject fast while open)
//! ```
//!
//! # Design Decisions
//! - Every RPC call has a deadline (set on the chain's client)
//! - Retries are uniform; the executor's idempotency makes them safe
//! - One breaker per chain, shared by all workers

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;

pub use backoff::Backoff;
pub use circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitOpen, CircuitState};
pub use retries::{RetryError, RetryManager, RetryPolicy};
