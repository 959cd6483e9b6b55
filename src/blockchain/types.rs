//! Chain-facing types and error definitions.

use alloy::primitives::TxHash;
use serde::Serialize;
use thiserror::Error;

use crate::resilience::circuit_breaker::CircuitOpen;

/// Errors that can occur during RPC operations.
#[derive(Debug, Clone, Error)]
pub enum BlockchainError {
    /// RPC connection or request failed.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// RPC request timed out.
    #[error("RPC timeout after {0} seconds")]
    Timeout(u64),

    /// Endpoint URL could not be parsed.
    #[error("Invalid RPC endpoint '{url}': {reason}")]
    InvalidEndpoint { url: String, reason: String },

    /// Connected endpoint serves a different chain.
    #[error("Chain ID mismatch: expected {expected}, got {actual}")]
    ChainMismatch { expected: u64, actual: u64 },

    /// The chain's circuit breaker rejected the call.
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpen),
}

/// Result type for RPC operations.
pub type BlockchainResult<T> = Result<T, BlockchainError>;

/// The parts of a transaction receipt the executor cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReceiptInfo {
    pub tx_hash: TxHash,
    /// `None` while the receipt belongs to a pending block.
    pub block_number: Option<u64>,
    pub gas_used: u64,
    pub effective_gas_price: u128,
    /// `true` when execution succeeded, `false` when it reverted.
    pub success: bool,
}

impl ReceiptInfo {
    /// Confirmations at `current_block`, counting the inclusion block as one.
    pub fn confirmations(&self, current_block: u64) -> u64 {
        match self.block_number {
            Some(block) if current_block >= block => current_block - block + 1,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt(block: Option<u64>) -> ReceiptInfo {
        ReceiptInfo {
            tx_hash: TxHash::ZERO,
            block_number: block,
            gas_used: 21_000,
            effective_gas_price: 1,
            success: true,
        }
    }

    #[test]
    fn test_confirmations() {
        assert_eq!(receipt(Some(100)).confirmations(100), 1);
        assert_eq!(receipt(Some(100)).confirmations(111), 12);
        assert_eq!(receipt(Some(100)).confirmations(99), 0);
        assert_eq!(receipt(None).confirmations(100), 0);
    }

    #[test]
    fn test_error_display() {
        let err = BlockchainError::Timeout(10);
        assert_eq!(err.to_string(), "RPC timeout after 10 seconds");

        let err = BlockchainError::from(CircuitOpen {
            name: "ETHEREUM".to_string(),
        });
        assert_eq!(err.to_string(), "circuit breaker 'ETHEREUM' is open");
    }
}
