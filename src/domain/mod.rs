//! Domain model: validated value types and the `Transaction` aggregate.

pub mod transaction;
pub mod types;

pub use transaction::{Inclusion, Transaction, TransactionStatus, TransitionError};
pub use types::{ChainType, EvmAddress, IdempotencyKey, OperationId, OperationKind, ValidationError};
