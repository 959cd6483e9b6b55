//! Bounded worker pool.
//!
//! # Responsibilities
//! - Pull deliveries from the inbound channel
//! - Enforce the concurrency limit via semaphore
//! - Run each job through the retry manager and the executor
//! - Report the delivery outcome back to the transport

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::execution::TransactionExecutor;
use crate::lifecycle::shutdown::CancelToken;
use crate::observability::metrics;
use crate::queue::dead_letter::DeadLetterMessage;
use crate::queue::job::{Delivery, DeliveryOutcome, Job};
use crate::resilience::retries::{RetryError, RetryManager};

pub struct WorkerPool {
    executor: Arc<TransactionExecutor>,
    retries: Arc<RetryManager>,
    /// Limits jobs in flight.
    permits: Arc<Semaphore>,
    concurrency: usize,
}

impl WorkerPool {
    pub fn new(executor: Arc<TransactionExecutor>, retries: Arc<RetryManager>, concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            executor,
            retries,
            permits: Arc::new(Semaphore::new(concurrency)),
            concurrency,
        }
    }

    /// Consume deliveries until the channel closes or `shutdown` fires.
    ///
    /// In-flight jobs share the shutdown token, so they stop at their next
    /// cancellation point and report `Released`.
    pub async fn run(self: Arc<Self>, mut deliveries: mpsc::Receiver<Delivery>, shutdown: CancelToken) {
        tracing::info!(concurrency = self.concurrency, "Worker pool starting");
        let mut tasks = JoinSet::new();

        loop {
            let delivery = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                delivery = deliveries.recv() => match delivery {
                    Some(delivery) => delivery,
                    None => break,
                },
            };

            let permit = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                permit = self.permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let pool = self.clone();
            let cancel = shutdown.clone();
            tasks.spawn(async move {
                let _permit = permit;
                pool.handle(delivery, &cancel).await;
            });

            // Reap finished tasks so the set does not grow unbounded.
            while tasks.try_join_next().is_some() {}
        }

        tracing::info!(in_flight = tasks.len(), "Worker pool draining");
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Worker task panicked");
            }
        }
        tracing::info!("Worker pool stopped");
    }

    async fn handle(&self, delivery: Delivery, cancel: &CancelToken) {
        let outcome = self.process(&delivery.body, cancel).await;
        if let Some(ack) = delivery.ack {
            // The transport may have stopped listening; the outcome is already logged.
            let _ = ack.send(outcome);
        }
    }

    /// Process one raw message and decide what the transport does with it.
    pub async fn process(&self, body: &str, cancel: &CancelToken) -> DeliveryOutcome {
        let outcome = match serde_json::from_str::<Job>(body) {
            Ok(job) => self.process_job(&job, cancel).await,
            Err(e) => self.reject_malformed(body, e).await,
        };
        metrics::record_job_outcome(outcome.as_str());
        outcome
    }

    async fn process_job(&self, job: &Job, cancel: &CancelToken) -> DeliveryOutcome {
        let started = Instant::now();
        let executor = &self.executor;

        let result = self
            .retries
            .process_with_retry(job, cancel, move |_attempt| executor.execute(job, cancel))
            .await;

        match result {
            Ok(tx) => {
                tracing::info!(
                    operation_id = %tx.operation_id(),
                    status = %tx.status(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Job completed"
                );
                DeliveryOutcome::Completed
            }
            Err(RetryError::Exhausted { attempts, reason }) => {
                tracing::warn!(
                    operation_id = %job.operation_id,
                    attempts = attempts,
                    reason = %reason,
                    "Job dead-lettered"
                );
                DeliveryOutcome::DeadLettered
            }
            Err(e @ RetryError::DeadLetterFailed { .. }) => {
                tracing::error!(operation_id = %job.operation_id, error = %e, "Job released for redelivery");
                DeliveryOutcome::Released
            }
            Err(RetryError::Cancelled { attempts }) => {
                tracing::info!(
                    operation_id = %job.operation_id,
                    attempts = attempts,
                    "Job cancelled, released for redelivery"
                );
                DeliveryOutcome::Released
            }
        }
    }

    async fn reject_malformed(&self, body: &str, err: serde_json::Error) -> DeliveryOutcome {
        tracing::warn!(error = %err, "Malformed job message");
        let message = DeadLetterMessage::new(Value::String(body.to_string()), format!("malformed job: {}", err));

        match self.retries.dead_letter(message).await {
            Ok(()) => DeliveryOutcome::DeadLettered,
            Err(e) => {
                tracing::error!(error = %e, "Dead-letter delivery failed for malformed job");
                DeliveryOutcome::Released
            }
        }
    }
}
