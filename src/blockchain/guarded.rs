//! RPC client decorator that routes every call through a circuit breaker.

use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;
use std::sync::Arc;

use crate::blockchain::client::RpcClient;
use crate::blockchain::types::{BlockchainResult, ReceiptInfo};
use crate::resilience::circuit_breaker::CircuitBreaker;

/// Wraps an [`RpcClient`] so failures trip the chain's breaker.
///
/// "Not mined yet" (`Ok(None)` receipts) counts as a success.
pub struct GuardedRpcClient {
    inner: Arc<dyn RpcClient>,
    breaker: Arc<CircuitBreaker>,
}

impl GuardedRpcClient {
    pub fn new(inner: Arc<dyn RpcClient>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { inner, breaker }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }
}

#[async_trait]
impl RpcClient for GuardedRpcClient {
    async fn get_balance(&self, address: Address) -> BlockchainResult<U256> {
        self.breaker.call(self.inner.get_balance(address)).await
    }

    async fn get_pending_nonce(&self, address: Address) -> BlockchainResult<u64> {
        self.breaker.call(self.inner.get_pending_nonce(address)).await
    }

    async fn get_gas_price(&self) -> BlockchainResult<u128> {
        self.breaker.call(self.inner.get_gas_price()).await
    }

    async fn estimate_gas(&self, request: TransactionRequest) -> BlockchainResult<u64> {
        self.breaker.call(self.inner.estimate_gas(request)).await
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> BlockchainResult<TxHash> {
        self.breaker.call(self.inner.send_raw_transaction(raw)).await
    }

    async fn get_transaction_receipt(&self, hash: TxHash) -> BlockchainResult<Option<ReceiptInfo>> {
        self.breaker.call(self.inner.get_transaction_receipt(hash)).await
    }

    async fn get_chain_id(&self) -> BlockchainResult<u64> {
        self.breaker.call(self.inner.get_chain_id()).await
    }

    async fn get_block_number(&self) -> BlockchainResult<u64> {
        self.breaker.call(self.inner.get_block_number()).await
    }
}
