//! EVM multi-chain job executor.
//!
//! Turns an at-least-once job stream into exactly-once-effect blockchain
//! execution: idempotent claims in the repository, per-chain circuit
//! breakers around RPC, bounded retries with dead-lettering, and a signer
//! that waits for confirmations before a write counts as done.

pub mod admin;
pub mod blockchain;
pub mod config;
pub mod domain;
pub mod error;
pub mod execution;
pub mod lifecycle;
pub mod observability;
pub mod queue;
pub mod repository;
pub mod resilience;

pub use config::schema::ExecutorConfig;
pub use error::{ErrorKind, ExecutionError};
pub use execution::TransactionExecutor;
pub use lifecycle::Shutdown;
