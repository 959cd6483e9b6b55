//! Job intake.
//!
//! # Data Flow
//! ```text
//! transport (JSONL feeder / admin POST /jobs)
//!     → mpsc::Sender<Delivery>
//!     → worker.rs (semaphore-bounded pool)
//!         → RetryManager → TransactionExecutor
//!         → dead_letter.rs on exhaustion or malformed input
//!     → DeliveryOutcome back to the transport
//! ```

pub mod dead_letter;
pub mod feeder;
pub mod job;
pub mod worker;

pub use dead_letter::{
    DeadLetterError, DeadLetterMessage, DeadLetterSink, FileDeadLetterSink, MemoryDeadLetterSink,
};
pub use feeder::feed_lines;
pub use job::{Delivery, DeliveryOutcome, Job};
pub use worker::WorkerPool;
