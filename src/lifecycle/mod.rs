//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → chain registry → repository → executor → worker pool
//!
//! Shutdown (shutdown.rs):
//!     Signal received → cancel token → workers release in-flight jobs → exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Chain id mismatches are logged, not fatal (endpoints may be down at boot)

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{CancelToken, Shutdown};
pub use startup::{build_runtime, Runtime, StartupError};
