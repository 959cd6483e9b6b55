//! Retry manager with dead-letter fallback.
//!
//! A job gets `max_retries + 1` attempts. Between attempts the manager sleeps
//! on the [`Backoff`] schedule; once attempts run out the job goes to the
//! dead-letter sink exactly once with the last error as its reason.
//! Cancellation is checked around every attempt and during every sleep, and
//! a cancelled job is never dead-lettered.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

use crate::config::schema::RetryConfig;
use crate::lifecycle::shutdown::CancelToken;
use crate::queue::dead_letter::{DeadLetterError, DeadLetterMessage, DeadLetterSink};
use crate::queue::job::Job;
use crate::resilience::backoff::Backoff;

#[derive(Debug, Error)]
pub enum RetryError {
    /// All attempts failed and the job was dead-lettered.
    #[error("{reason} (after {attempts} attempts)")]
    Exhausted { attempts: u32, reason: String },

    /// All attempts failed and the dead-letter sink refused the job too.
    #[error("failed to send to DLQ: {source} ({reason})")]
    DeadLetterFailed {
        reason: String,
        #[source]
        source: DeadLetterError,
    },

    /// Cancelled before the attempts ran out; nothing was dead-lettered.
    #[error("retry cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

/// Attempts and spacing for one job.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: Backoff::from_config(config),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

pub struct RetryManager {
    policy: RetryPolicy,
    dead_letter: Arc<dyn DeadLetterSink>,
}

impl RetryManager {
    pub fn new(policy: RetryPolicy, dead_letter: Arc<dyn DeadLetterSink>) -> Self {
        Self {
            policy,
            dead_letter,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Send a message straight to the dead-letter sink, bypassing retries.
    pub async fn dead_letter(&self, message: DeadLetterMessage) -> Result<(), DeadLetterError> {
        self.dead_letter.send(message).await
    }

    /// Run `process` until it succeeds, attempts run out, or `cancel` fires.
    ///
    /// `process` receives the 0-based attempt number.
    pub async fn process_with_retry<F, Fut, T, E>(
        &self,
        job: &Job,
        cancel: &CancelToken,
        mut process: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let max_attempts = self.policy.max_retries.saturating_add(1);
        let mut last_error = String::new();

        for attempt in 0..max_attempts {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled { attempts: attempt });
            }

            match process(attempt).await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::info!(
                            operation_id = %job.operation_id,
                            attempt = attempt,
                            "Job succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(e) => {
                    last_error = e.to_string();
                    tracing::warn!(
                        operation_id = %job.operation_id,
                        attempt = attempt,
                        max_attempts = max_attempts,
                        error = %last_error,
                        "Job attempt failed"
                    );
                }
            }

            // Shutdown interrupted the attempt; leave the job for redelivery.
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled {
                    attempts: attempt + 1,
                });
            }

            if attempt + 1 < max_attempts {
                let delay = self.policy.backoff.delay(attempt);
                tracing::debug!(
                    operation_id = %job.operation_id,
                    delay_ms = delay.as_millis() as u64,
                    "Backing off before retry"
                );
                if cancel
                    .run_until_cancelled(tokio::time::sleep(delay))
                    .await
                    .is_none()
                {
                    return Err(RetryError::Cancelled {
                        attempts: attempt + 1,
                    });
                }
            }
        }

        let reason = format!("max retries exceeded: {}", last_error);
        let original = serde_json::to_value(job).unwrap_or_else(|_| serde_json::Value::Null);
        let message = DeadLetterMessage::new(original, reason.clone());

        match self.dead_letter.send(message).await {
            Ok(()) => Err(RetryError::Exhausted {
                attempts: max_attempts,
                reason,
            }),
            Err(source) => {
                tracing::error!(
                    operation_id = %job.operation_id,
                    error = %source,
                    "Dead-letter delivery failed"
                );
                Err(RetryError::DeadLetterFailed { reason, source })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::dead_letter::MemoryDeadLetterSink;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct BrokenSink;

    #[async_trait]
    impl DeadLetterSink for BrokenSink {
        async fn send(&self, _message: DeadLetterMessage) -> Result<(), DeadLetterError> {
            Err(DeadLetterError::Unavailable("queue down".to_string()))
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff: Backoff {
                initial: Duration::from_millis(100),
                max: Duration::from_secs(5),
                multiplier: 2.0,
                jitter_ratio: 0.0,
            },
        }
    }

    fn job() -> Job {
        Job {
            operation_id: "6f1c1b5e-8a3d-4c1e-9b4f-2d7e8a9c0b1d".to_string(),
            ..Job::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_dead_letters_once() {
        let sink = Arc::new(MemoryDeadLetterSink::new());
        let manager = RetryManager::new(policy(3), sink.clone());
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = manager
            .process_with_retry(&job(), &CancelToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>("rpc unreachable") }
            })
            .await;

        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 4, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        let letters = sink.messages();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].failure_reason, "max retries exceeded: rpc unreachable");
        assert_eq!(
            letters[0].operation_id.as_deref(),
            Some("6f1c1b5e-8a3d-4c1e-9b4f-2d7e8a9c0b1d")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let sink = Arc::new(MemoryDeadLetterSink::new());
        let manager = RetryManager::new(policy(3), sink.clone());

        let result = manager
            .process_with_retry(&job(), &CancelToken::new(), |attempt| async move {
                if attempt < 2 {
                    Err("transient")
                } else {
                    Ok(attempt)
                }
            })
            .await
            .unwrap();

        assert_eq!(result, 2);
        assert!(sink.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_schedule_is_followed() {
        let manager = RetryManager::new(policy(3), Arc::new(MemoryDeadLetterSink::new()));
        let start = tokio::time::Instant::now();
        let mut stamps = Vec::new();

        let _ = manager
            .process_with_retry(&job(), &CancelToken::new(), |_| {
                stamps.push(start.elapsed());
                async { Err::<(), _>("x") }
            })
            .await;

        assert_eq!(
            stamps,
            vec![
                Duration::ZERO,
                Duration::from_millis(100),
                Duration::from_millis(300),
                Duration::from_millis(700),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_letter_failure_is_reported() {
        let manager = RetryManager::new(policy(0), Arc::new(BrokenSink));
        let result: Result<(), _> = manager
            .process_with_retry(&job(), &CancelToken::new(), |_| async { Err::<(), _>("boom") })
            .await;

        match result {
            Err(RetryError::DeadLetterFailed { reason, .. }) => {
                assert_eq!(reason, "max retries exceeded: boom");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let sink = Arc::new(MemoryDeadLetterSink::new());
        let manager = RetryManager::new(policy(5), sink.clone());
        let cancel = CancelToken::new();

        let result: Result<(), _> = manager
            .process_with_retry(&job(), &cancel, |_| {
                cancel.cancel();
                async { Err::<(), _>("down") }
            })
            .await;

        assert!(matches!(result, Err(RetryError::Cancelled { attempts: 1 })));
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_during_last_attempt_is_not_dead_lettered() {
        let sink = Arc::new(MemoryDeadLetterSink::new());
        let manager = RetryManager::new(policy(0), sink.clone());
        let cancel = CancelToken::new();

        let result: Result<(), _> = manager
            .process_with_retry(&job(), &cancel, |_| {
                cancel.cancel();
                async { Err::<(), _>("execution cancelled") }
            })
            .await;

        assert!(matches!(result, Err(RetryError::Cancelled { attempts: 1 })));
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let manager = RetryManager::new(policy(2), Arc::new(MemoryDeadLetterSink::new()));
        let cancel = CancelToken::new();
        cancel.cancel();

        let mut called = false;
        let result: Result<(), _> = manager
            .process_with_retry(&job(), &cancel, |_| {
                called = true;
                async { Ok::<(), String>(()) }
            })
            .await;

        assert!(matches!(result, Err(RetryError::Cancelled { attempts: 0 })));
        assert!(!called);
    }
}
