//! Confirmation sweep.
//!
//! Periodically promotes `Success` writes to `Confirmed` once they are buried
//! under the chain's finality depth. A missing receipt is only logged; the
//! record stays `Success` and is checked again on a later sweep. Every record
//! examined without being promoted is touched, which moves it behind the rest
//! of the backlog so a full batch of stuck records cannot starve newer ones.

use std::sync::Arc;
use std::time::Duration;
use tokio::time;

use crate::blockchain::ChainRegistry;
use crate::config::schema::SweeperConfig;
use crate::domain::{Transaction, TransactionStatus};
use crate::lifecycle::shutdown::CancelToken;
use crate::observability::metrics;
use crate::repository::{RepositoryError, TransactionRepository};

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub confirmed: usize,
    /// Receipt found but not deep enough yet.
    pub pending: usize,
    /// No receipt, no chain handle, or an RPC error.
    pub skipped: usize,
}

pub struct ConfirmationSweeper {
    repository: Arc<dyn TransactionRepository>,
    registry: Arc<ChainRegistry>,
    batch_size: usize,
}

impl ConfirmationSweeper {
    pub fn new(
        repository: Arc<dyn TransactionRepository>,
        registry: Arc<ChainRegistry>,
        batch_size: usize,
    ) -> Self {
        Self {
            repository,
            registry,
            batch_size: batch_size.max(1),
        }
    }

    pub fn from_config(
        repository: Arc<dyn TransactionRepository>,
        registry: Arc<ChainRegistry>,
        config: &SweeperConfig,
    ) -> Self {
        Self::new(repository, registry, config.batch_size)
    }

    /// Sweep every `interval` until `cancel` fires.
    pub async fn run(self, interval: Duration, cancel: CancelToken) {
        tracing::info!(interval_secs = interval.as_secs(), batch_size = self.batch_size, "Confirmation sweeper starting");

        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep_once().await {
                        Ok(report) if report.examined > 0 => {
                            tracing::debug!(
                                examined = report.examined,
                                confirmed = report.confirmed,
                                pending = report.pending,
                                skipped = report.skipped,
                                "Confirmation sweep finished"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "Confirmation sweep failed"),
                    }
                }
                _ = cancel.cancelled() => {
                    tracing::info!("Confirmation sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    pub async fn sweep_once(&self) -> Result<SweepReport, RepositoryError> {
        let candidates = self
            .repository
            .list_writes_by_status(TransactionStatus::Success, self.batch_size)
            .await?;

        let mut report = SweepReport {
            examined: candidates.len(),
            ..SweepReport::default()
        };

        let mut unresolved = Vec::new();
        for tx in candidates {
            match self.check(&tx).await {
                Check::Final => {
                    self.repository
                        .update_status(tx.operation_id(), TransactionStatus::Confirmed, None)
                        .await?;
                    metrics::record_confirmed(tx.chain().as_str());
                    tracing::info!(
                        operation_id = %tx.operation_id(),
                        chain = %tx.chain(),
                        tx_hash = ?tx.tx_hash(),
                        "Transaction confirmed"
                    );
                    report.confirmed += 1;
                }
                Check::NotYet => {
                    report.pending += 1;
                    unresolved.push(tx.operation_id());
                }
                Check::Skipped => {
                    report.skipped += 1;
                    unresolved.push(tx.operation_id());
                }
            }
        }

        self.repository.touch(&unresolved).await?;
        Ok(report)
    }

    async fn check(&self, tx: &Transaction) -> Check {
        let (Some(hash), Some(handle)) = (tx.tx_hash(), self.registry.get(tx.chain())) else {
            return Check::Skipped;
        };

        let receipt = match handle.rpc.get_transaction_receipt(hash).await {
            Ok(Some(receipt)) => receipt,
            Ok(None) => {
                tracing::warn!(
                    operation_id = %tx.operation_id(),
                    tx_hash = %hash,
                    "Receipt missing for successful transaction"
                );
                return Check::Skipped;
            }
            Err(e) => {
                tracing::warn!(operation_id = %tx.operation_id(), error = %e, "Receipt lookup failed");
                return Check::Skipped;
            }
        };

        let current = match handle.rpc.get_block_number().await {
            Ok(current) => current,
            Err(e) => {
                tracing::warn!(chain = %tx.chain(), error = %e, "Block number lookup failed");
                return Check::Skipped;
            }
        };

        if receipt.confirmations(current) >= handle.finality_blocks.max(1) {
            Check::Final
        } else {
            Check::NotYet
        }
    }
}

enum Check {
    Final,
    NotYet,
    Skipped,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::{
        BlockchainResult, ChainHandle, PrivateKey, ReceiptInfo, RpcClient, SignerError,
        TransactionSigner,
    };
    use crate::domain::{ChainType, EvmAddress, IdempotencyKey, Inclusion, OperationId, OperationKind};
    use crate::repository::InMemoryTransactionRepository;
    use crate::resilience::circuit_breaker::CircuitBreaker;
    use alloy::primitives::{Address, Bytes, TxHash, U256};
    use alloy::rpc::types::TransactionRequest;
    use async_trait::async_trait;
    use serde_json::Map;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct Chain {
        head: AtomicU64,
    }

    #[async_trait]
    impl RpcClient for Chain {
        async fn get_balance(&self, _address: Address) -> BlockchainResult<U256> {
            Ok(U256::ZERO)
        }
        async fn get_pending_nonce(&self, _address: Address) -> BlockchainResult<u64> {
            Ok(0)
        }
        async fn get_gas_price(&self) -> BlockchainResult<u128> {
            Ok(1)
        }
        async fn estimate_gas(&self, _request: TransactionRequest) -> BlockchainResult<u64> {
            Ok(21_000)
        }
        async fn send_raw_transaction(&self, _raw: Bytes) -> BlockchainResult<TxHash> {
            Ok(TxHash::ZERO)
        }
        async fn get_transaction_receipt(&self, hash: TxHash) -> BlockchainResult<Option<ReceiptInfo>> {
            if hash == TxHash::repeat_byte(0xee) {
                return Ok(None);
            }
            Ok(Some(ReceiptInfo {
                tx_hash: hash,
                block_number: Some(100),
                gas_used: 21_000,
                effective_gas_price: 1,
                success: true,
            }))
        }
        async fn get_chain_id(&self) -> BlockchainResult<u64> {
            Ok(1)
        }
        async fn get_block_number(&self) -> BlockchainResult<u64> {
            Ok(self.head.load(Ordering::SeqCst))
        }
    }

    struct NoSigner;

    #[async_trait]
    impl TransactionSigner for NoSigner {
        async fn sign_and_send(&self, _r: TransactionRequest, _k: &PrivateKey) -> Result<TxHash, SignerError> {
            Err(SignerError::Signing("unused".into()))
        }
        async fn wait_for_confirmations(
            &self,
            _hash: TxHash,
            _confirmations: u64,
            _cancel: &CancelToken,
        ) -> Result<ReceiptInfo, SignerError> {
            Err(SignerError::Cancelled)
        }
    }

    fn registry(rpc: Arc<Chain>) -> Arc<ChainRegistry> {
        Arc::new(ChainRegistry::new([ChainHandle {
            chain: ChainType::Ethereum,
            chain_id: 1,
            rpc,
            signer: Arc::new(NoSigner),
            breaker: Arc::new(CircuitBreaker::new("ETHEREUM", 5, 2, Duration::from_secs(30))),
            confirmation_blocks: 1,
            finality_blocks: 12,
        }]))
    }

    fn succeeded(n: u8, hash: TxHash) -> Transaction {
        let mut tx = Transaction::new(
            OperationId::parse(&format!("00000000-0000-4000-8000-0000000000{:02x}", n)).unwrap(),
            ChainType::Ethereum,
            OperationKind::Transfer,
            EvmAddress::from(Address::repeat_byte(0x11)),
            EvmAddress::from(Address::repeat_byte(0x22)),
            Map::new(),
            IdempotencyKey::parse(&format!("10000000-0000-4000-8000-0000000000{:02x}", n)).unwrap(),
        );
        tx.mark_processing().unwrap();
        tx.record_fee_params(0, 1).unwrap();
        tx.mark_write_success(Inclusion {
            tx_hash: hash,
            block_number: 100,
            gas_used: 21_000,
            effective_gas_price: 1,
        })
        .unwrap();
        tx
    }

    #[tokio::test]
    async fn test_promotes_at_finality_depth() {
        let repo = Arc::new(InMemoryTransactionRepository::new());
        let tx = succeeded(1, TxHash::repeat_byte(0x01));
        repo.save(&tx).await.unwrap();

        let rpc = Arc::new(Chain { head: AtomicU64::new(110) });
        let sweeper = ConfirmationSweeper::new(repo.clone(), registry(rpc.clone()), 10);

        // 11 confirmations of 12.
        let report = sweeper.sweep_once().await.unwrap();
        assert_eq!(report, SweepReport { examined: 1, confirmed: 0, pending: 1, skipped: 0 });

        rpc.head.store(111, Ordering::SeqCst);
        let report = sweeper.sweep_once().await.unwrap();
        assert_eq!(report.confirmed, 1);

        let stored = repo.get_by_operation_id(tx.operation_id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), TransactionStatus::Confirmed);
        assert_eq!(stored.tx_hash(), tx.tx_hash());
    }

    #[tokio::test]
    async fn test_missing_receipt_is_left_alone() {
        let repo = Arc::new(InMemoryTransactionRepository::new());
        let tx = succeeded(2, TxHash::repeat_byte(0xee));
        repo.save(&tx).await.unwrap();

        let rpc = Arc::new(Chain { head: AtomicU64::new(500) });
        let report = ConfirmationSweeper::new(repo.clone(), registry(rpc), 10)
            .sweep_once()
            .await
            .unwrap();

        assert_eq!(report.skipped, 1);
        let stored = repo.get_by_operation_id(tx.operation_id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), TransactionStatus::Success);
    }

    #[tokio::test]
    async fn test_reads_are_not_swept() {
        let repo = Arc::new(InMemoryTransactionRepository::new());
        let mut read = Transaction::new(
            OperationId::new_v4(),
            ChainType::Ethereum,
            OperationKind::GetBalance,
            EvmAddress::from(Address::repeat_byte(0x11)),
            EvmAddress::from(Address::repeat_byte(0x22)),
            Map::new(),
            IdempotencyKey::parse("20000000-0000-4000-8000-000000000001").unwrap(),
        );
        read.mark_processing().unwrap();
        read.mark_read_success(Some("0".into())).unwrap();
        repo.save(&read).await.unwrap();

        let rpc = Arc::new(Chain { head: AtomicU64::new(500) });
        let report = ConfirmationSweeper::new(repo, registry(rpc), 10).sweep_once().await.unwrap();
        assert_eq!(report, SweepReport::default());
    }

    #[tokio::test]
    async fn test_stuck_records_rotate_behind_the_backlog() {
        let repo = Arc::new(InMemoryTransactionRepository::new());
        for n in 1..=3 {
            repo.save(&succeeded(n, TxHash::repeat_byte(0xee))).await.unwrap();
        }
        let good = succeeded(4, TxHash::repeat_byte(0x04));
        repo.save(&good).await.unwrap();

        let rpc = Arc::new(Chain { head: AtomicU64::new(500) });
        let sweeper = ConfirmationSweeper::new(repo.clone(), registry(rpc), 2);

        let first = sweeper.sweep_once().await.unwrap();
        assert_eq!(first, SweepReport { examined: 2, confirmed: 0, pending: 0, skipped: 2 });

        let second = sweeper.sweep_once().await.unwrap();
        assert_eq!(second, SweepReport { examined: 2, confirmed: 1, pending: 0, skipped: 1 });

        let stored = repo.get_by_operation_id(good.operation_id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), TransactionStatus::Confirmed);
    }
}
