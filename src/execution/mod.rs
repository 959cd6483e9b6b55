//! Job execution.
//!
//! # Data Flow
//! ```text
//! Job (queue/worker.rs)
//!     → executor.rs (validate, claim, dispatch, persist)
//!         → params.rs (value / data / gas_limit from the payload)
//!         → blockchain::ChainHandle (guarded RPC + signer)
//!     → repository (Success / Failed)
//! sweeper.rs
//!     → Success writes → Confirmed at finality depth
//! ```

pub mod executor;
pub mod params;
pub mod sweeper;

pub use executor::{ExecutorSettings, TransactionExecutor};
pub use params::TxParams;
pub use sweeper::{ConfirmationSweeper, SweepReport};
