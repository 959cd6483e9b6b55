//! Startup orchestration.
//!
//! # Responsibilities
//! - Build one guarded RPC client, breaker and signer per configured chain
//! - Open the transaction store and the dead-letter sink
//! - Wire executor, retry manager and worker pool together
//!
//! # Design Decisions
//! - Fail fast on invalid endpoints or an unreadable store
//! - Subsystems initialize in order, not concurrently

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::blockchain::{
    AlloyRpcClient, BlockchainError, ChainHandle, ChainRegistry, EnvKeySource, EvmTransactionSigner,
    GuardedRpcClient, KeySource, RpcClient,
};
use crate::config::schema::{ExecutorConfig, RepositoryBackend};
use crate::domain::ChainType;
use crate::execution::{ExecutorSettings, TransactionExecutor};
use crate::queue::{Delivery, DeadLetterSink, FileDeadLetterSink, WorkerPool};
use crate::repository::{
    FileTransactionRepository, InMemoryTransactionRepository, RepositoryError, TransactionRepository,
};
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::retries::{RetryManager, RetryPolicy};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("chain {chain}: {source}")]
    Chain {
        chain: ChainType,
        #[source]
        source: BlockchainError,
    },

    #[error("failed to open transaction store: {0}")]
    Repository(#[from] RepositoryError),
}

/// Everything the binary runs, wired and ready.
pub struct Runtime {
    pub config: ExecutorConfig,
    pub repository: Arc<dyn TransactionRepository>,
    pub registry: Arc<ChainRegistry>,
    pub executor: Arc<TransactionExecutor>,
    pub workers: Arc<WorkerPool>,
    /// Producer side of the worker pool's inbox.
    pub jobs: mpsc::Sender<Delivery>,
    pub inbox: mpsc::Receiver<Delivery>,
}

pub async fn build_runtime(config: ExecutorConfig) -> Result<Runtime, StartupError> {
    let registry = Arc::new(build_registry(&config).await?);
    let repository = open_repository(&config).await?;
    let keys: Arc<dyn KeySource> = Arc::new(EnvKeySource);
    let dead_letter: Arc<dyn DeadLetterSink> = Arc::new(FileDeadLetterSink::new(&config.dead_letter.path));

    let executor = Arc::new(TransactionExecutor::new(
        repository.clone(),
        registry.clone(),
        keys,
        ExecutorSettings::from_config(&config.worker),
    ));
    let retries = Arc::new(RetryManager::new(
        RetryPolicy::from_config(&config.retries),
        dead_letter,
    ));
    let workers = Arc::new(WorkerPool::new(
        executor.clone(),
        retries,
        config.worker.concurrency,
    ));
    let (jobs, inbox) = mpsc::channel(config.worker.queue_capacity.max(1));

    tracing::info!(
        chains = registry.len(),
        concurrency = config.worker.concurrency,
        max_retries = config.retries.max_retries,
        dead_letter = %config.dead_letter.path,
        "Runtime initialized"
    );

    Ok(Runtime {
        config,
        repository,
        registry,
        executor,
        workers,
        jobs,
        inbox,
    })
}

/// One handle per configured chain: alloy client → breaker → signer.
pub async fn build_registry(config: &ExecutorConfig) -> Result<ChainRegistry, StartupError> {
    let confirmation_timeout = Duration::from_secs(config.confirmations.timeout_secs);
    let poll_interval = Duration::from_millis(config.confirmations.poll_interval_ms);
    let mut handles = Vec::with_capacity(config.chains.len());

    for chain_config in &config.chains {
        let chain = chain_config.chain;
        let chain_id = chain_config.chain_id();

        let client = AlloyRpcClient::new(chain, chain_config)
            .map_err(|source| StartupError::Chain { chain, source })?;
        if let Err(e) = client.verify_chain_id(chain_id).await {
            tracing::warn!(chain = %chain, chain_id = chain_id, error = %e, "Could not verify chain id");
        }

        let breaker = Arc::new(CircuitBreaker::from_config(chain.as_str(), &config.circuit_breaker));
        let rpc: Arc<dyn RpcClient> = Arc::new(GuardedRpcClient::new(Arc::new(client), breaker.clone()));
        let signer = EvmTransactionSigner::new(rpc.clone(), chain, chain_id, confirmation_timeout)
            .with_poll_interval(poll_interval);

        handles.push(ChainHandle {
            chain,
            chain_id,
            rpc,
            signer: Arc::new(signer),
            breaker,
            confirmation_blocks: chain_config.confirmation_blocks,
            finality_blocks: chain_config.finality_blocks(),
        });
    }

    Ok(ChainRegistry::new(handles))
}

async fn open_repository(config: &ExecutorConfig) -> Result<Arc<dyn TransactionRepository>, StartupError> {
    let settings = &config.repository;
    let repository: Arc<dyn TransactionRepository> = match settings.backend {
        RepositoryBackend::Memory => {
            tracing::warn!("Using in-memory transaction store; records are lost on restart");
            Arc::new(InMemoryTransactionRepository::with_retention_days(settings.retention_days))
        }
        RepositoryBackend::File => {
            Arc::new(FileTransactionRepository::open(&settings.path, settings.retention_days).await?)
        }
    };
    Ok(repository)
}
