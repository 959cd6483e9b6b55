//! Execution error taxonomy.

use std::fmt;
use thiserror::Error;

use crate::blockchain::{BlockchainError, SignerError};
use crate::domain::{ChainType, TransitionError, ValidationError};
use crate::repository::RepositoryError;

/// Why a job execution failed.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),

    #[error("chain not supported: {0}")]
    ChainNotSupported(ChainType),

    #[error("{context}: {source}")]
    RpcFailed {
        context: &'static str,
        #[source]
        source: BlockchainError,
    },

    #[error("{context}: {source}")]
    DatabaseError {
        context: &'static str,
        #[source]
        source: RepositoryError,
    },

    #[error("transaction failed: {0}")]
    TransactionFailed(String),

    #[error("execution cancelled")]
    Cancelled,
}

/// Stable error codes for logs, metrics and the admin API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ValidationFailed,
    ChainNotSupported,
    RpcFailed,
    DatabaseError,
    TransactionFailed,
    Cancelled,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::ValidationFailed => "VALIDATION_FAILED",
            ErrorKind::ChainNotSupported => "CHAIN_NOT_SUPPORTED",
            ErrorKind::RpcFailed => "RPC_FAILED",
            ErrorKind::DatabaseError => "DATABASE_ERROR",
            ErrorKind::TransactionFailed => "TRANSACTION_FAILED",
            ErrorKind::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl ExecutionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecutionError::ValidationFailed(_) => ErrorKind::ValidationFailed,
            ExecutionError::ChainNotSupported(_) => ErrorKind::ChainNotSupported,
            ExecutionError::RpcFailed { .. } => ErrorKind::RpcFailed,
            ExecutionError::DatabaseError { .. } => ErrorKind::DatabaseError,
            ExecutionError::TransactionFailed(_) => ErrorKind::TransactionFailed,
            ExecutionError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Message stored on the `Failed` record.
    ///
    /// RPC and storage failures keep only their context; the cause goes to logs.
    pub fn failure_message(&self) -> String {
        match self {
            ExecutionError::RpcFailed { context, .. } | ExecutionError::DatabaseError { context, .. } => {
                (*context).to_string()
            }
            ExecutionError::TransactionFailed(message) => message.clone(),
            other => other.to_string(),
        }
    }

    pub(crate) fn rpc(context: &'static str, source: BlockchainError) -> Self {
        ExecutionError::RpcFailed { context, source }
    }

    pub(crate) fn database(context: &'static str, source: RepositoryError) -> Self {
        ExecutionError::DatabaseError { context, source }
    }
}

impl From<SignerError> for ExecutionError {
    fn from(err: SignerError) -> Self {
        match err {
            SignerError::Transport { source, .. } => {
                ExecutionError::rpc("failed to send transaction", source)
            }
            SignerError::Cancelled => ExecutionError::Cancelled,
            other => ExecutionError::TransactionFailed(other.to_string()),
        }
    }
}

impl From<TransitionError> for ExecutionError {
    fn from(err: TransitionError) -> Self {
        ExecutionError::TransactionFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::TxHash;

    #[test]
    fn test_kind_codes() {
        let err = ExecutionError::ChainNotSupported(ChainType::Avalanche);
        assert_eq!(err.kind().code(), "CHAIN_NOT_SUPPORTED");
        assert_eq!(err.to_string(), "chain not supported: AVALANCHE");

        let err = ExecutionError::rpc("failed to get nonce", BlockchainError::Timeout(10));
        assert_eq!(err.kind(), ErrorKind::RpcFailed);
        assert_eq!(err.to_string(), "failed to get nonce: RPC timeout after 10 seconds");
    }

    #[test]
    fn test_failure_messages() {
        let err = ExecutionError::rpc("failed to get nonce", BlockchainError::Rpc("connection refused".into()));
        assert_eq!(err.failure_message(), "failed to get nonce");

        let err = ExecutionError::TransactionFailed("transaction 0x01 reverted".into());
        assert_eq!(err.failure_message(), "transaction 0x01 reverted");

        assert_eq!(ExecutionError::Cancelled.failure_message(), "execution cancelled");
    }

    #[test]
    fn test_signer_error_mapping() {
        let err: ExecutionError = SignerError::Transport {
            hash: TxHash::ZERO,
            source: BlockchainError::Rpc("nonce too low".into()),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::RpcFailed);
        assert!(err.to_string().starts_with("failed to send transaction"));

        let err: ExecutionError = SignerError::Timeout {
            hash: TxHash::ZERO,
            waited_secs: 300,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::TransactionFailed);
        assert!(err.to_string().contains("confirmation timeout"));

        let err: ExecutionError = SignerError::Cancelled.into();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
}
