//! Idempotent transaction execution.
//!
//! # Flow
//! ```text
//! Job
//!   → validate every field (no side effects on failure)
//!   → idempotency lookup ──hit──► resolve stored record
//!   → claim: create_if_absent(Processing)
//!   → dispatch
//!       write: nonce, gas price, checkpoint, gas limit, key, sign + send,
//!              checkpoint, wait
//!       read:  balance / nonce / no-op
//!   → persist Success, or Failed with a message
//! ```
//!
//! A stored record is only executed again when it failed before anything was
//! signed, or when its `Processing` owner vanished before choosing a nonce.
//! Once a nonce or hash is stored the record is never re-run.

use alloy::network::TransactionBuilder;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::blockchain::{BlockchainResult, ChainHandle, ChainRegistry, KeySource};
use crate::config::schema::WorkerConfig;
use crate::domain::{
    ChainType, EvmAddress, IdempotencyKey, Inclusion, OperationId, OperationKind, Transaction,
    TransactionStatus, ValidationError,
};
use crate::error::ExecutionError;
use crate::execution::params::TxParams;
use crate::lifecycle::shutdown::CancelToken;
use crate::observability::metrics;
use crate::queue::Job;
use crate::repository::{RepositoryError, TransactionRepository};

/// Timing knobs for duplicate deliveries.
#[derive(Debug, Clone, Copy)]
pub struct ExecutorSettings {
    /// How long a duplicate waits for an in-flight execution to settle.
    pub settle_timeout: Duration,
    pub settle_poll: Duration,
    /// Age at which an unattended `Processing` record may be taken over.
    pub stale_after: Duration,
}

impl ExecutorSettings {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            settle_timeout: Duration::from_secs(config.settle_timeout_secs),
            settle_poll: Duration::from_millis(config.settle_poll_ms.max(1)),
            stale_after: Duration::from_secs(config.stale_after_secs),
        }
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self::from_config(&WorkerConfig::default())
    }
}

/// Job fields after validation.
#[derive(Debug)]
struct ValidatedJob {
    operation_id: OperationId,
    chain: ChainType,
    operation: OperationKind,
    from: EvmAddress,
    to: EvmAddress,
    payload: Map<String, Value>,
    idempotency_key: IdempotencyKey,
}

impl ValidatedJob {
    fn parse(job: &Job) -> Result<Self, ValidationError> {
        let operation_id = OperationId::parse(&job.operation_id)?;
        let chain: ChainType = job.chain_type.parse()?;
        let operation: OperationKind = job.operation_type.parse()?;
        let from = EvmAddress::parse("from_address", &job.from_address)?;
        let to = EvmAddress::parse("to_address", &job.to_address)?;
        let idempotency_key = IdempotencyKey::parse(&job.idempotency_key)?;

        if operation.is_write() {
            TxParams::from_payload(operation, &job.payload)?;
        }

        Ok(Self {
            operation_id,
            chain,
            operation,
            from,
            to,
            payload: job.payload.clone(),
            idempotency_key,
        })
    }

    fn into_transaction(self) -> Transaction {
        Transaction::new(
            self.operation_id,
            self.chain,
            self.operation,
            self.from,
            self.to,
            self.payload,
            self.idempotency_key,
        )
    }
}

/// Result of a dispatched operation, applied to the record once it succeeded.
enum Outcome {
    Write(Inclusion),
    Read(Option<String>),
}

/// What to do with a stored record found under the job's idempotency key.
enum Resolution {
    /// Return the record as-is.
    Settled(Transaction),
    /// This delivery owns the record and executes it.
    Resume(Transaction),
}

pub struct TransactionExecutor {
    repository: Arc<dyn TransactionRepository>,
    registry: Arc<ChainRegistry>,
    keys: Arc<dyn KeySource>,
    settings: ExecutorSettings,
}

impl TransactionExecutor {
    pub fn new(
        repository: Arc<dyn TransactionRepository>,
        registry: Arc<ChainRegistry>,
        keys: Arc<dyn KeySource>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            repository,
            registry,
            keys,
            settings,
        }
    }

    pub fn registry(&self) -> &ChainRegistry {
        &self.registry
    }

    /// Execute `job` at most once per idempotency key.
    pub async fn execute(&self, job: &Job, cancel: &CancelToken) -> Result<Transaction, ExecutionError> {
        let validated = ValidatedJob::parse(job).inspect_err(|e| {
            tracing::warn!(operation_id = %job.operation_id, error = %e, "Job rejected");
        })?;

        let tx = match self.claim(validated, cancel).await? {
            Resolution::Settled(tx) => return Ok(tx),
            Resolution::Resume(tx) => tx,
        };
        self.run(tx, cancel).await
    }

    async fn claim(&self, job: ValidatedJob, cancel: &CancelToken) -> Result<Resolution, ExecutionError> {
        let existing = self
            .repository
            .get_by_idempotency_key(job.idempotency_key)
            .await
            .map_err(|e| ExecutionError::database("failed to check idempotency", e))?;

        if let Some(existing) = existing {
            tracing::debug!(
                operation_id = %existing.operation_id(),
                idempotency_key = %existing.idempotency_key(),
                status = %existing.status(),
                "Idempotency hit"
            );
            return self.resolve_existing(existing, cancel).await;
        }

        let mut tx = job.into_transaction();
        tx.mark_processing()?;

        match self.repository.create_if_absent(&tx).await {
            Ok(None) => Ok(Resolution::Resume(tx)),
            Ok(Some(existing)) => {
                tracing::debug!(
                    operation_id = %existing.operation_id(),
                    idempotency_key = %existing.idempotency_key(),
                    "Lost idempotency claim to a concurrent delivery"
                );
                self.resolve_existing(existing, cancel).await
            }
            Err(e) => {
                tracing::error!(operation_id = %tx.operation_id(), error = %e, "Failed to persist transaction");
                if tx.mark_failed("failed to persist transaction").is_ok() {
                    if let Err(second) = self.repository.save(&tx).await {
                        tracing::error!(
                            operation_id = %tx.operation_id(),
                            error = %second,
                            "Failed to persist failed transaction"
                        );
                    }
                }
                Err(ExecutionError::database("failed to persist transaction", e))
            }
        }
    }

    async fn resolve_existing(
        &self,
        mut existing: Transaction,
        cancel: &CancelToken,
    ) -> Result<Resolution, ExecutionError> {
        let deadline = Instant::now() + self.settings.settle_timeout;

        loop {
            match existing.status() {
                TransactionStatus::Success | TransactionStatus::Confirmed => {
                    return Ok(Resolution::Settled(existing));
                }
                TransactionStatus::Failed if existing.tx_hash().is_some() => {
                    return Err(ExecutionError::TransactionFailed(
                        existing
                            .error_message()
                            .unwrap_or("previous attempt failed after broadcast")
                            .to_string(),
                    ));
                }
                TransactionStatus::Failed => {
                    match self
                        .repository
                        .update_status(existing.operation_id(), TransactionStatus::Processing, None)
                        .await
                    {
                        Ok(reclaimed) => {
                            tracing::info!(
                                operation_id = %reclaimed.operation_id(),
                                previous_error = existing.error_message().unwrap_or_default(),
                                "Retrying failed transaction"
                            );
                            return Ok(Resolution::Resume(reclaimed));
                        }
                        // Another delivery reclaimed it first.
                        Err(RepositoryError::InvalidTransition(_)) => {}
                        Err(e) => return Err(ExecutionError::database("failed to reclaim transaction", e)),
                    }
                }
                TransactionStatus::Pending | TransactionStatus::Processing => {
                    if let Some(stale_before) = self.stale_before() {
                        match self.repository.reclaim_stale(existing.operation_id(), stale_before).await {
                            Ok(Some(reclaimed)) => {
                                tracing::warn!(
                                    operation_id = %reclaimed.operation_id(),
                                    last_update = %existing.updated_at(),
                                    "Taking over abandoned transaction"
                                );
                                return Ok(Resolution::Resume(reclaimed));
                            }
                            Ok(None) => {}
                            Err(e) => return Err(ExecutionError::database("failed to reclaim transaction", e)),
                        }
                    }
                    if Instant::now() >= deadline {
                        tracing::warn!(
                            operation_id = %existing.operation_id(),
                            status = %existing.status(),
                            "Transaction still in flight"
                        );
                        return Err(ExecutionError::TransactionFailed(format!(
                            "transaction {} still in flight",
                            existing.operation_id()
                        )));
                    }
                    if cancel
                        .run_until_cancelled(sleep(self.settings.settle_poll))
                        .await
                        .is_none()
                    {
                        return Err(ExecutionError::Cancelled);
                    }
                }
            }

            existing = match self.repository.get_by_operation_id(existing.operation_id()).await {
                Ok(Some(latest)) => latest,
                Ok(None) => return Ok(Resolution::Settled(existing)),
                Err(e) => return Err(ExecutionError::database("failed to check idempotency", e)),
            };
        }
    }

    /// Cutoff for [`TransactionRepository::reclaim_stale`]; `None` disables takeover.
    fn stale_before(&self) -> Option<DateTime<Utc>> {
        let age = chrono::Duration::from_std(self.settings.stale_after).ok()?;
        Utc::now().checked_sub_signed(age)
    }

    async fn run(&self, mut tx: Transaction, cancel: &CancelToken) -> Result<Transaction, ExecutionError> {
        let chain = tx.chain();

        match self.complete(&mut tx, cancel).await {
            Ok(done) => {
                metrics::record_attempt(chain.as_str(), "SUCCESS");
                tracing::info!(
                    operation_id = %done.operation_id(),
                    chain = %chain,
                    operation = %done.operation(),
                    tx_hash = ?done.tx_hash(),
                    block_number = ?done.block_number(),
                    "Transaction executed"
                );
                Ok(done)
            }
            Err(err) => {
                metrics::record_attempt(chain.as_str(), err.kind().code());
                self.persist_failure(&mut tx, &err).await;
                Err(err)
            }
        }
    }

    /// Dispatch and persist the settled record.
    ///
    /// `tx` stays `Processing` (with any recorded nonce and hash) so that a
    /// failure at any step, the final save included, can still be marked
    /// `Failed` on it.
    async fn complete(&self, tx: &mut Transaction, cancel: &CancelToken) -> Result<Transaction, ExecutionError> {
        let outcome = self.dispatch(tx, cancel).await?;

        let mut done = tx.clone();
        match outcome {
            Outcome::Write(inclusion) => done.mark_write_success(inclusion)?,
            Outcome::Read(result) => done.mark_read_success(result)?,
        }
        self.repository
            .save(&done)
            .await
            .map_err(|e| ExecutionError::database("failed to persist result", e))?;
        Ok(done)
    }

    async fn persist_failure(&self, tx: &mut Transaction, err: &ExecutionError) {
        tracing::warn!(
            operation_id = %tx.operation_id(),
            chain = %tx.chain(),
            kind = %err.kind(),
            error = %err,
            "Transaction failed"
        );

        if let Err(e) = tx.mark_failed(err.failure_message()) {
            tracing::error!(operation_id = %tx.operation_id(), error = %e, "Cannot mark transaction failed");
            return;
        }
        if let Err(e) = self.repository.save(tx).await {
            tracing::error!(
                operation_id = %tx.operation_id(),
                error = %e,
                "Failed to persist failed transaction"
            );
        }
    }

    async fn dispatch(&self, tx: &mut Transaction, cancel: &CancelToken) -> Result<Outcome, ExecutionError> {
        let handle = self
            .registry
            .get(tx.chain())
            .ok_or(ExecutionError::ChainNotSupported(tx.chain()))?;

        if tx.is_write() {
            self.execute_write(handle, tx, cancel).await.map(Outcome::Write)
        } else {
            execute_read(handle, tx, cancel).await.map(Outcome::Read)
        }
    }

    async fn execute_write(
        &self,
        handle: &ChainHandle,
        tx: &mut Transaction,
        cancel: &CancelToken,
    ) -> Result<Inclusion, ExecutionError> {
        let params = TxParams::from_payload(tx.operation(), tx.payload())?;
        let from = tx.from_address().address();

        let nonce = rpc_call(cancel, "failed to get nonce", handle.rpc.get_pending_nonce(from)).await?;
        let gas_price = rpc_call(cancel, "failed to get gas price", handle.rpc.get_gas_price()).await?;
        tx.record_fee_params(nonce, gas_price)?;

        // Nothing is signed unless the chosen nonce is stored.
        self.repository
            .save(tx)
            .await
            .map_err(|e| ExecutionError::database("failed to persist transaction", e))?;

        let request = params
            .to_request(tx.operation(), from, tx.to_address().address())
            .with_nonce(nonce)
            .with_gas_price(gas_price);

        let gas_limit = match params.gas_limit {
            Some(limit) => limit,
            None => {
                rpc_call(cancel, "failed to estimate gas", handle.rpc.estimate_gas(request.clone())).await?
            }
        };
        let request = request.with_gas_limit(gas_limit);

        let key = self
            .keys
            .signing_key(from)
            .await
            .map_err(|e| ExecutionError::TransactionFailed(format!("failed to load signing key: {}", e)))?;

        // Broadcasting is not raced against cancellation so a sent hash is never lost.
        if cancel.is_cancelled() {
            return Err(ExecutionError::Cancelled);
        }

        let hash = match handle.signer.sign_and_send(request, &key).await {
            Ok(hash) => hash,
            Err(err) => {
                if let Some(hash) = err.broadcast_hash() {
                    tx.record_submission(hash)?;
                }
                return Err(err.into());
            }
        };
        tx.record_submission(hash)?;

        if let Err(e) = self.repository.save(tx).await {
            tracing::warn!(
                operation_id = %tx.operation_id(),
                tx_hash = %hash,
                error = %e,
                "Failed to checkpoint submitted transaction"
            );
        }

        tracing::info!(
            operation_id = %tx.operation_id(),
            chain = %handle.chain,
            tx_hash = %hash,
            nonce = nonce,
            gas_limit = gas_limit,
            confirmations = handle.confirmation_blocks,
            "Waiting for confirmations"
        );

        let receipt = handle
            .signer
            .wait_for_confirmations(hash, handle.confirmation_blocks, cancel)
            .await?;
        let block_number = receipt.block_number.ok_or_else(|| {
            ExecutionError::TransactionFailed(format!("receipt for {} has no block number", hash))
        })?;

        Ok(Inclusion {
            tx_hash: receipt.tx_hash,
            block_number,
            gas_used: receipt.gas_used,
            effective_gas_price: receipt.effective_gas_price,
        })
    }
}

async fn execute_read(
    handle: &ChainHandle,
    tx: &Transaction,
    cancel: &CancelToken,
) -> Result<Option<String>, ExecutionError> {
    let result = match tx.operation() {
        OperationKind::GetBalance => {
            let balance = rpc_call(
                cancel,
                "failed to get balance",
                handle.rpc.get_balance(tx.to_address().address()),
            )
            .await?;
            Some(balance.to_string())
        }
        OperationKind::GetNonce => {
            let nonce = rpc_call(
                cancel,
                "failed to get nonce",
                handle.rpc.get_pending_nonce(tx.from_address().address()),
            )
            .await?;
            Some(nonce.to_string())
        }
        _ => None,
    };
    Ok(result)
}

/// Await an RPC call unless `cancel` fires first.
async fn rpc_call<T, Fut>(cancel: &CancelToken, context: &'static str, call: Fut) -> Result<T, ExecutionError>
where
    Fut: Future<Output = BlockchainResult<T>>,
{
    match cancel.run_until_cancelled(call).await {
        Some(result) => result.map_err(|e| ExecutionError::rpc(context, e)),
        None => Err(ExecutionError::Cancelled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job() -> Job {
        Job {
            operation_id: "6f1c1b5e-8a3d-4c1e-9b4f-2d7e8a9c0b1d".to_string(),
            chain_type: "POLYGON".to_string(),
            operation_type: "TRANSFER".to_string(),
            from_address: "0x1111111111111111111111111111111111111111".to_string(),
            to_address: "2222222222222222222222222222222222222222".to_string(),
            payload: json!({"value": "1"}).as_object().cloned().unwrap(),
            idempotency_key: "0b1d6f1c-8a3d-4c1e-9b4f-2d7e8a9c1b5e".to_string(),
        }
    }

    #[test]
    fn test_validated_job() {
        let validated = ValidatedJob::parse(&job()).unwrap();
        assert_eq!(validated.chain, ChainType::Polygon);
        assert_eq!(validated.operation, OperationKind::Transfer);

        let tx = validated.into_transaction();
        assert_eq!(tx.status(), TransactionStatus::Pending);
        assert_eq!(tx.payload().get("value"), Some(&json!("1")));
    }

    fn rejects(mutate: impl FnOnce(&mut Job)) -> ValidationError {
        let mut job = job();
        mutate(&mut job);
        ValidatedJob::parse(&job).unwrap_err()
    }

    #[test]
    fn test_every_field_is_checked() {
        assert!(matches!(
            rejects(|j| j.operation_id = "nope".into()),
            ValidationError::InvalidOperationId(_)
        ));
        assert!(matches!(
            rejects(|j| j.chain_type = "SOLANA".into()),
            ValidationError::InvalidChain(_)
        ));
        assert!(matches!(
            rejects(|j| j.operation_type = "transfer".into()),
            ValidationError::InvalidOperationType(_)
        ));
        assert!(matches!(
            rejects(|j| j.from_address = "0x12".into()),
            ValidationError::InvalidAddress { field: "from_address", .. }
        ));
        assert!(matches!(
            rejects(|j| j.to_address = String::new()),
            ValidationError::InvalidAddress { field: "to_address", .. }
        ));
        assert!(matches!(
            rejects(|j| j.idempotency_key = "key-1".into()),
            ValidationError::InvalidIdempotencyKey(_)
        ));
        assert!(matches!(
            rejects(|j| {
                j.payload.insert("value".into(), json!("lots"));
            }),
            ValidationError::InvalidPayload { field: "value", .. }
        ));
    }

    #[test]
    fn test_read_payload_is_not_parsed() {
        let mut job = job();
        job.operation_type = "GET_BALANCE".into();
        job.payload.insert("value".into(), json!({"nested": true}));
        assert!(ValidatedJob::parse(&job).is_ok());
    }

    #[test]
    fn test_settings_from_config() {
        let settings = ExecutorSettings::from_config(&WorkerConfig {
            settle_timeout_secs: 5,
            settle_poll_ms: 0,
            stale_after_secs: 90,
            ..WorkerConfig::default()
        });
        assert_eq!(settings.settle_timeout, Duration::from_secs(5));
        assert_eq!(settings.settle_poll, Duration::from_millis(1));
        assert_eq!(settings.stale_after, Duration::from_secs(90));
    }
}
