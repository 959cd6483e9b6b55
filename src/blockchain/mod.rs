//! Blockchain integration subsystem.
//!
//! # Data Flow
//! ```text
//! Environment Variables (signing keys)
//!     → keys.rs (key lookup per sender address)
//! Chain config (RPC URLs, timeouts)
//!     → client.rs (alloy HTTP providers with failover)
//!     → guarded.rs (per-chain circuit breaker)
//!     → signer.rs (sign, broadcast, wait for confirmations)
//!     → registry.rs (immutable chain → handle map)
//! ```
//!
//! # Security Constraints
//! - Private keys ONLY from environment variables
//! - Never log private keys or sensitive data
//! - All RPC calls have configurable timeouts

pub mod client;
pub mod guarded;
pub mod keys;
pub mod registry;
pub mod signer;
pub mod types;

pub use client::{AlloyRpcClient, RpcClient};
pub use guarded::GuardedRpcClient;
pub use keys::{EnvKeySource, KeyError, KeySource, PrivateKey, StaticKeySource};
pub use registry::{ChainHandle, ChainRegistry};
pub use signer::{EvmTransactionSigner, SignerError, TransactionSigner};
pub use types::{BlockchainError, BlockchainResult, ReceiptInfo};
