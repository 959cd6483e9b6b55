//! Shared fakes and builders for integration tests.

#![allow(dead_code)]

use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use evm_executor::blockchain::{
    BlockchainError, BlockchainResult, ChainHandle, ChainRegistry, EvmTransactionSigner, GuardedRpcClient,
    PrivateKey, ReceiptInfo, RpcClient, StaticKeySource,
};
use evm_executor::domain::ChainType;
use evm_executor::execution::{ExecutorSettings, TransactionExecutor};
use evm_executor::queue::{Job, MemoryDeadLetterSink};
use evm_executor::repository::{InMemoryTransactionRepository, TransactionRepository};
use evm_executor::resilience::{Backoff, CircuitBreaker, RetryManager, RetryPolicy};

/// Anvil's first development account.
pub const SENDER: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";
pub const SENDER_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
pub const RECIPIENT: &str = "0x70997970c51812dc3a010c7d01b50e0d17dc79c8";

pub const MINED_BLOCK: u64 = 100;

/// RPC double with switchable failures and per-method call counters.
pub struct ScriptedRpc {
    pub balance: U256,
    pub head: u64,
    /// Artificial latency on balance lookups.
    pub balance_delay: Duration,
    pub fail_nonce: AtomicBool,
    pub fail_balance: AtomicBool,
    /// When false, sent transactions never get a receipt.
    pub mine: AtomicBool,
    pub balance_calls: AtomicU32,
    pub nonce_calls: AtomicU32,
    pub gas_price_calls: AtomicU32,
    pub estimate_calls: AtomicU32,
    pub sent: Mutex<Vec<Bytes>>,
}

impl Default for ScriptedRpc {
    fn default() -> Self {
        Self {
            balance: U256::from(1_000u64),
            head: MINED_BLOCK + 20,
            balance_delay: Duration::ZERO,
            fail_nonce: AtomicBool::new(false),
            fail_balance: AtomicBool::new(false),
            mine: AtomicBool::new(true),
            balance_calls: AtomicU32::new(0),
            nonce_calls: AtomicU32::new(0),
            gas_price_calls: AtomicU32::new(0),
            estimate_calls: AtomicU32::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedRpc {
    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn calls(counter: &AtomicU32) -> u32 {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RpcClient for ScriptedRpc {
    async fn get_balance(&self, _address: Address) -> BlockchainResult<U256> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        if !self.balance_delay.is_zero() {
            tokio::time::sleep(self.balance_delay).await;
        }
        if self.fail_balance.load(Ordering::SeqCst) {
            return Err(BlockchainError::Rpc("balance unavailable".to_string()));
        }
        Ok(self.balance)
    }

    async fn get_pending_nonce(&self, _address: Address) -> BlockchainResult<u64> {
        self.nonce_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_nonce.load(Ordering::SeqCst) {
            return Err(BlockchainError::Rpc("connection refused".to_string()));
        }
        Ok(7)
    }

    async fn get_gas_price(&self) -> BlockchainResult<u128> {
        self.gas_price_calls.fetch_add(1, Ordering::SeqCst);
        Ok(2_000_000_000)
    }

    async fn estimate_gas(&self, _request: TransactionRequest) -> BlockchainResult<u64> {
        self.estimate_calls.fetch_add(1, Ordering::SeqCst);
        Ok(21_000)
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> BlockchainResult<TxHash> {
        self.sent.lock().unwrap().push(raw);
        Ok(TxHash::repeat_byte(0xab))
    }

    async fn get_transaction_receipt(&self, hash: TxHash) -> BlockchainResult<Option<ReceiptInfo>> {
        if !self.mine.load(Ordering::SeqCst) || self.sent_count() == 0 {
            return Ok(None);
        }
        Ok(Some(ReceiptInfo {
            tx_hash: hash,
            block_number: Some(MINED_BLOCK),
            gas_used: 21_000,
            effective_gas_price: 1_500_000_000,
            success: true,
        }))
    }

    async fn get_chain_id(&self) -> BlockchainResult<u64> {
        Ok(1)
    }

    async fn get_block_number(&self) -> BlockchainResult<u64> {
        Ok(self.head)
    }
}

pub struct Harness {
    pub rpc: Arc<ScriptedRpc>,
    pub repository: Arc<InMemoryTransactionRepository>,
    pub registry: Arc<ChainRegistry>,
    pub executor: Arc<TransactionExecutor>,
    pub dead_letters: Arc<MemoryDeadLetterSink>,
}

impl Harness {
    pub fn new(rpc: ScriptedRpc) -> Self {
        Self::with_settings(rpc, settings())
    }

    pub fn with_settings(rpc: ScriptedRpc, settings: ExecutorSettings) -> Self {
        let rpc = Arc::new(rpc);
        let registry = Arc::new(ethereum_registry(rpc.clone()));
        let repository = Arc::new(InMemoryTransactionRepository::new());
        let executor = Arc::new(executor(repository.clone(), registry.clone(), settings));

        Self {
            rpc,
            repository,
            registry,
            executor,
            dead_letters: Arc::new(MemoryDeadLetterSink::new()),
        }
    }

    /// Retry manager with `max_retries` and a 100ms doubling backoff.
    pub fn retries(&self, max_retries: u32) -> RetryManager {
        RetryManager::new(
            RetryPolicy {
                max_retries,
                backoff: Backoff {
                    initial: Duration::from_millis(100),
                    max: Duration::from_secs(5),
                    multiplier: 2.0,
                    jitter_ratio: 0.0,
                },
            },
            self.dead_letters.clone(),
        )
    }

    pub fn repository(&self) -> Arc<dyn TransactionRepository> {
        self.repository.clone()
    }
}

/// Five second settle window; records only count as abandoned after a minute.
pub fn settings() -> ExecutorSettings {
    ExecutorSettings {
        settle_timeout: Duration::from_secs(5),
        settle_poll: Duration::from_millis(10),
        stale_after: Duration::from_secs(60),
    }
}

/// Executor holding the key for [`SENDER`].
pub fn executor(
    repository: Arc<dyn TransactionRepository>,
    registry: Arc<ChainRegistry>,
    settings: ExecutorSettings,
) -> TransactionExecutor {
    let keys = StaticKeySource::new().with_key(Address::from_str(SENDER).unwrap(), PrivateKey::new(SENDER_KEY));
    TransactionExecutor::new(repository, registry, Arc::new(keys), settings)
}

/// Registry with only Ethereum, guarded by a breaker, signing with the real signer.
pub fn ethereum_registry(rpc: Arc<ScriptedRpc>) -> ChainRegistry {
    let breaker = Arc::new(CircuitBreaker::new("ETHEREUM", 5, 2, Duration::from_secs(30)));
    let guarded: Arc<dyn RpcClient> = Arc::new(GuardedRpcClient::new(rpc, breaker.clone()));
    let signer = EvmTransactionSigner::new(guarded.clone(), ChainType::Ethereum, 1, Duration::from_secs(300))
        .with_poll_interval(Duration::from_secs(3));

    ChainRegistry::new([ChainHandle {
        chain: ChainType::Ethereum,
        chain_id: 1,
        rpc: guarded,
        signer: Arc::new(signer),
        breaker,
        confirmation_blocks: 3,
        finality_blocks: 12,
    }])
}

pub fn job(operation_type: &str, idempotency_key: &str) -> Job {
    Job {
        operation_id: uuid::Uuid::new_v4().to_string(),
        chain_type: "ETHEREUM".to_string(),
        operation_type: operation_type.to_string(),
        from_address: SENDER.to_string(),
        to_address: RECIPIENT.to_string(),
        payload: Map::new(),
        idempotency_key: idempotency_key.to_string(),
    }
}

pub fn transfer(idempotency_key: &str) -> Job {
    let mut job = job("TRANSFER", idempotency_key);
    job.payload = payload(json!({ "value": "1000000000000000" }));
    job
}

pub fn payload(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

pub fn job_json(job: &Job) -> String {
    serde_json::to_string(job).unwrap()
}
