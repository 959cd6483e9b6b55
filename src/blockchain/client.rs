//! Per-chain JSON-RPC client with timeout and failover.
//!
//! # Responsibilities
//! - Connect to the primary endpoint plus any failover endpoints
//! - Query chain state (balances, pending nonce, gas price, receipts)
//! - Submit signed raw transactions
//! - Bound every request with the chain's RPC timeout

use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{TransactionReceipt, TransactionRequest};
use alloy::transports::TransportResult;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

use crate::blockchain::types::{BlockchainError, BlockchainResult, ReceiptInfo};
use crate::config::schema::ChainConfig;
use crate::domain::ChainType;
use crate::observability::metrics;

/// The RPC surface the executor needs from a chain.
#[async_trait]
pub trait RpcClient: Send + Sync {
    async fn get_balance(&self, address: Address) -> BlockchainResult<U256>;

    /// Transaction count including the pending block.
    async fn get_pending_nonce(&self, address: Address) -> BlockchainResult<u64>;

    /// Suggested legacy gas price in wei.
    async fn get_gas_price(&self) -> BlockchainResult<u128>;

    async fn estimate_gas(&self, request: TransactionRequest) -> BlockchainResult<u64>;

    async fn send_raw_transaction(&self, raw: Bytes) -> BlockchainResult<TxHash>;

    /// `Ok(None)` while the transaction is not mined.
    async fn get_transaction_receipt(&self, hash: TxHash) -> BlockchainResult<Option<ReceiptInfo>>;

    async fn get_chain_id(&self) -> BlockchainResult<u64>;

    async fn get_block_number(&self) -> BlockchainResult<u64>;
}

type SharedProvider = Arc<dyn Provider + Send + Sync>;

/// Alloy HTTP client with failover across configured endpoints.
#[derive(Clone)]
pub struct AlloyRpcClient {
    chain: ChainType,
    /// Primary first, then failovers in configured order.
    providers: Vec<SharedProvider>,
    timeout_duration: Duration,
}

impl AlloyRpcClient {
    pub fn new(chain: ChainType, config: &ChainConfig) -> BlockchainResult<Self> {
        let primary: url::Url =
            config
                .rpc_url
                .parse()
                .map_err(|e: url::ParseError| BlockchainError::InvalidEndpoint {
                    url: config.rpc_url.clone(),
                    reason: e.to_string(),
                })?;

        let mut providers: Vec<SharedProvider> =
            vec![Arc::new(ProviderBuilder::new().connect_http(primary))];

        for url_str in &config.failover_urls {
            match url_str.parse::<url::Url>() {
                Ok(url) => providers.push(Arc::new(ProviderBuilder::new().connect_http(url))),
                Err(e) => {
                    tracing::warn!(chain = %chain, url = %url_str, error = %e, "Ignoring invalid failover RPC URL")
                }
            }
        }

        tracing::info!(
            chain = %chain,
            rpc_url = %config.rpc_url,
            failovers = providers.len() - 1,
            "RPC client initialized"
        );

        Ok(Self {
            chain,
            providers,
            timeout_duration: Duration::from_secs(config.rpc_timeout_secs),
        })
    }

    pub fn chain(&self) -> ChainType {
        self.chain
    }

    /// Check the endpoint serves `expected`.
    pub async fn verify_chain_id(&self, expected: u64) -> BlockchainResult<()> {
        let actual = self.get_chain_id().await?;
        if actual != expected {
            return Err(BlockchainError::ChainMismatch { expected, actual });
        }
        Ok(())
    }

    /// Try each provider in order until one answers within the timeout.
    async fn with_failover<T, F, Fut>(&self, method: &'static str, op: F) -> BlockchainResult<T>
    where
        F: Fn(SharedProvider) -> Fut,
        Fut: Future<Output = TransportResult<T>>,
    {
        let start = Instant::now();
        let mut all_timed_out = true;

        for (i, provider) in self.providers.iter().enumerate() {
            match timeout(self.timeout_duration, op(provider.clone())).await {
                Ok(Ok(result)) => {
                    metrics::record_rpc_call(self.chain.as_str(), method, true, start);
                    return Ok(result);
                }
                Ok(Err(e)) => {
                    all_timed_out = false;
                    tracing::warn!(chain = %self.chain, method, provider_idx = i, error = %e, "RPC error, trying next provider");
                }
                Err(_) => {
                    tracing::warn!(chain = %self.chain, method, provider_idx = i, "RPC timeout, trying next provider");
                }
            }
        }

        metrics::record_rpc_call(self.chain.as_str(), method, false, start);
        if all_timed_out {
            Err(BlockchainError::Timeout(self.timeout_duration.as_secs()))
        } else {
            Err(BlockchainError::Rpc(format!(
                "all {} providers failed: {}",
                self.chain, method
            )))
        }
    }
}

impl fmt::Debug for AlloyRpcClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlloyRpcClient")
            .field("chain", &self.chain)
            .field("providers_count", &self.providers.len())
            .field("timeout_duration", &self.timeout_duration)
            .finish()
    }
}

fn to_receipt_info(receipt: TransactionReceipt) -> ReceiptInfo {
    ReceiptInfo {
        tx_hash: receipt.transaction_hash,
        block_number: receipt.block_number,
        gas_used: receipt.gas_used,
        effective_gas_price: receipt.effective_gas_price,
        success: receipt.status(),
    }
}

#[async_trait]
impl RpcClient for AlloyRpcClient {
    async fn get_balance(&self, address: Address) -> BlockchainResult<U256> {
        self.with_failover("get_balance", |p| async move { p.get_balance(address).await })
            .await
    }

    async fn get_pending_nonce(&self, address: Address) -> BlockchainResult<u64> {
        self.with_failover("get_transaction_count", |p| async move {
            p.get_transaction_count(address).pending().await
        })
        .await
    }

    async fn get_gas_price(&self) -> BlockchainResult<u128> {
        self.with_failover("gas_price", |p| async move { p.get_gas_price().await })
            .await
    }

    async fn estimate_gas(&self, request: TransactionRequest) -> BlockchainResult<u64> {
        self.with_failover("estimate_gas", |p| {
            let request = request.clone();
            async move { p.estimate_gas(request).await }
        })
        .await
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> BlockchainResult<TxHash> {
        self.with_failover("send_raw_transaction", |p| {
            let raw = raw.clone();
            async move {
                p.send_raw_transaction(&raw)
                    .await
                    .map(|pending| *pending.tx_hash())
            }
        })
        .await
    }

    async fn get_transaction_receipt(&self, hash: TxHash) -> BlockchainResult<Option<ReceiptInfo>> {
        self.with_failover("get_transaction_receipt", |p| async move {
            p.get_transaction_receipt(hash).await
        })
        .await
        .map(|receipt| receipt.map(to_receipt_info))
    }

    async fn get_chain_id(&self) -> BlockchainResult<u64> {
        self.with_failover("chain_id", |p| async move { p.get_chain_id().await })
            .await
    }

    async fn get_block_number(&self) -> BlockchainResult<u64> {
        self.with_failover("block_number", |p| async move { p.get_block_number().await })
            .await
    }
}
