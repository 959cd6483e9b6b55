//! Transaction signing, submission and confirmation monitoring.
//!
//! # Responsibilities
//! - Sign EIP-155 transactions for the chain's id
//! - Broadcast the raw bytes through the chain's RPC client
//! - Poll for the receipt until the required depth or a deadline
//!
//! Transient RPC errors while polling are tolerated until the deadline.

use alloy::eips::eip2718::Encodable2718;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, TxHash};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};

use crate::blockchain::client::RpcClient;
use crate::blockchain::keys::PrivateKey;
use crate::blockchain::types::{BlockchainError, ReceiptInfo};
use crate::domain::ChainType;
use crate::lifecycle::shutdown::CancelToken;
use crate::observability::metrics;

/// Default interval between receipt polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("invalid private key: {0}")]
    InvalidKey(String),

    #[error("signing key belongs to {actual}, transaction is from {expected}")]
    KeyMismatch { expected: Address, actual: Address },

    #[error("failed to sign transaction: {0}")]
    Signing(String),

    /// Broadcast failed. The signed transaction may still have reached a node.
    #[error("failed to send transaction {hash}: {source}")]
    Transport {
        hash: TxHash,
        #[source]
        source: BlockchainError,
    },

    #[error("transaction {0} reverted")]
    Reverted(TxHash),

    #[error("confirmation timeout for {hash} after {waited_secs}s")]
    Timeout { hash: TxHash, waited_secs: u64 },

    #[error("confirmation wait cancelled")]
    Cancelled,
}

impl SignerError {
    /// Hash of a transaction that was signed and possibly broadcast.
    pub fn broadcast_hash(&self) -> Option<TxHash> {
        match self {
            SignerError::Transport { hash, .. } => Some(*hash),
            _ => None,
        }
    }
}

#[async_trait]
pub trait TransactionSigner: Send + Sync {
    /// Sign `request` with `key` and broadcast it.
    async fn sign_and_send(
        &self,
        request: TransactionRequest,
        key: &PrivateKey,
    ) -> Result<TxHash, SignerError>;

    /// Block until `hash` has `confirmations` blocks on top (inclusion counts as one).
    async fn wait_for_confirmations(
        &self,
        hash: TxHash,
        confirmations: u64,
        cancel: &CancelToken,
    ) -> Result<ReceiptInfo, SignerError>;
}

/// Signer backed by a local private key and a chain's RPC client.
pub struct EvmTransactionSigner {
    rpc: Arc<dyn RpcClient>,
    chain: ChainType,
    chain_id: u64,
    poll_interval: Duration,
    confirmation_timeout: Duration,
}

impl EvmTransactionSigner {
    pub fn new(
        rpc: Arc<dyn RpcClient>,
        chain: ChainType,
        chain_id: u64,
        confirmation_timeout: Duration,
    ) -> Self {
        Self {
            rpc,
            chain,
            chain_id,
            poll_interval: DEFAULT_POLL_INTERVAL,
            confirmation_timeout,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    /// One poll. `Ok(None)` means keep waiting.
    async fn check(&self, hash: TxHash, required: u64) -> Result<Option<ReceiptInfo>, SignerError> {
        let receipt = match self.rpc.get_transaction_receipt(hash).await {
            Ok(Some(receipt)) => receipt,
            Ok(None) => {
                tracing::debug!(chain = %self.chain, tx_hash = %hash, "Transaction pending");
                return Ok(None);
            }
            Err(e) => {
                tracing::warn!(chain = %self.chain, tx_hash = %hash, error = %e, "Receipt lookup failed");
                return Ok(None);
            }
        };

        if !receipt.success {
            return Err(SignerError::Reverted(hash));
        }

        let current = match self.rpc.get_block_number().await {
            Ok(current) => current,
            Err(e) => {
                tracing::warn!(chain = %self.chain, error = %e, "Block number lookup failed");
                return Ok(None);
            }
        };

        let confirmations = receipt.confirmations(current);
        if confirmations >= required {
            return Ok(Some(receipt));
        }

        tracing::debug!(
            chain = %self.chain,
            tx_hash = %hash,
            confirmations = confirmations,
            required = required,
            "Waiting for confirmations"
        );
        Ok(None)
    }
}

#[async_trait]
impl TransactionSigner for EvmTransactionSigner {
    async fn sign_and_send(
        &self,
        request: TransactionRequest,
        key: &PrivateKey,
    ) -> Result<TxHash, SignerError> {
        let key_hex = key.expose().strip_prefix("0x").unwrap_or(key.expose());
        let signer: PrivateKeySigner = key_hex
            .parse()
            .map_err(|e| SignerError::InvalidKey(format!("{}", e)))?;

        let actual = signer.address();
        if let Some(expected) = request.from {
            if expected != actual {
                return Err(SignerError::KeyMismatch { expected, actual });
            }
        }

        let request = request.with_from(actual).with_chain_id(self.chain_id);
        let wallet = EthereumWallet::from(signer);
        let envelope = request
            .build(&wallet)
            .await
            .map_err(|e| SignerError::Signing(e.to_string()))?;

        let signed_hash = *envelope.tx_hash();
        let raw = Bytes::from(envelope.encoded_2718());
        let hash = self
            .rpc
            .send_raw_transaction(raw)
            .await
            .map_err(|source| SignerError::Transport {
                hash: signed_hash,
                source,
            })?;

        if hash != signed_hash {
            tracing::warn!(
                chain = %self.chain,
                signed = %signed_hash,
                reported = %hash,
                "Node reported a different transaction hash"
            );
        }

        tracing::info!(
            chain = %self.chain,
            from = %actual,
            tx_hash = %hash,
            "Transaction submitted"
        );
        Ok(hash)
    }

    async fn wait_for_confirmations(
        &self,
        hash: TxHash,
        confirmations: u64,
        cancel: &CancelToken,
    ) -> Result<ReceiptInfo, SignerError> {
        let required = confirmations.max(1);
        let started = Instant::now();
        let deadline = started + self.confirmation_timeout;

        let poll = async {
            let mut ticker = interval(self.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Some(receipt) = self.check(hash, required).await? {
                    return Ok(receipt);
                }
            }
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SignerError::Cancelled),
            _ = sleep_until(deadline) => Err(SignerError::Timeout {
                hash,
                waited_secs: self.confirmation_timeout.as_secs(),
            }),
            result = poll => result,
        };

        if result.is_ok() {
            metrics::record_confirmation_wait(self.chain.as_str(), started.elapsed().as_secs_f64());
        }
        result
    }
}
