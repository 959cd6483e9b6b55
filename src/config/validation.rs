//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, thresholds ≥ 1, ratios in range)
//! - Check endpoint URLs and bind addresses parse
//! - Detect duplicate chain entries
//!
//! Returns all validation errors, not just the first.

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{ExecutorConfig, RepositoryBackend};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field, e.g. `chains[0].rpc_url`.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub fn validate_config(config: &ExecutorConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.worker.concurrency == 0 {
        errors.push(ValidationError::new("worker.concurrency", "must be at least 1"));
    }
    if config.worker.queue_capacity == 0 {
        errors.push(ValidationError::new("worker.queue_capacity", "must be at least 1"));
    }
    if config.worker.settle_poll_ms == 0 {
        errors.push(ValidationError::new("worker.settle_poll_ms", "must be greater than 0"));
    }
    if config.worker.stale_after_secs < config.worker.settle_timeout_secs {
        errors.push(ValidationError::new(
            "worker.stale_after_secs",
            "must be at least worker.settle_timeout_secs",
        ));
    }

    let retries = &config.retries;
    if retries.multiplier < 1.0 || !retries.multiplier.is_finite() {
        errors.push(ValidationError::new("retries.multiplier", "must be a finite value >= 1.0"));
    }
    if !(0.0..=1.0).contains(&retries.jitter_ratio) {
        errors.push(ValidationError::new("retries.jitter_ratio", "must be between 0.0 and 1.0"));
    }
    if retries.initial_backoff_ms > retries.max_backoff_ms {
        errors.push(ValidationError::new(
            "retries.initial_backoff_ms",
            "must not exceed retries.max_backoff_ms",
        ));
    }

    let breaker = &config.circuit_breaker;
    if breaker.failure_threshold == 0 {
        errors.push(ValidationError::new("circuit_breaker.failure_threshold", "must be at least 1"));
    }
    if breaker.success_threshold == 0 {
        errors.push(ValidationError::new("circuit_breaker.success_threshold", "must be at least 1"));
    }
    if breaker.timeout_secs == 0 {
        errors.push(ValidationError::new("circuit_breaker.timeout_secs", "must be greater than 0"));
    }

    if config.confirmations.timeout_secs == 0 {
        errors.push(ValidationError::new("confirmations.timeout_secs", "must be greater than 0"));
    }
    if config.confirmations.poll_interval_ms == 0 {
        errors.push(ValidationError::new("confirmations.poll_interval_ms", "must be greater than 0"));
    }

    if config.repository.backend == RepositoryBackend::File && config.repository.path.trim().is_empty() {
        errors.push(ValidationError::new("repository.path", "required for the file backend"));
    }
    if config.repository.retention_days == 0 {
        errors.push(ValidationError::new("repository.retention_days", "must be at least 1"));
    }
    if config.dead_letter.path.trim().is_empty() {
        errors.push(ValidationError::new("dead_letter.path", "must not be empty"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("invalid socket address '{}'", config.observability.metrics_address),
        ));
    }

    if config.admin.enabled {
        if config.admin.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new(
                "admin.bind_address",
                format!("invalid socket address '{}'", config.admin.bind_address),
            ));
        }
        if config.admin.api_key.as_deref().is_some_and(|k| k.trim().is_empty()) {
            errors.push(ValidationError::new("admin.api_key", "must not be empty when set"));
        }
    }

    if config.sweeper.enabled && config.sweeper.interval_secs == 0 {
        errors.push(ValidationError::new("sweeper.interval_secs", "must be greater than 0"));
    }

    if config.chains.is_empty() {
        errors.push(ValidationError::new("chains", "at least one chain must be configured"));
    }

    let mut seen = HashSet::new();
    for (i, chain) in config.chains.iter().enumerate() {
        let prefix = format!("chains[{}]", i);
        if !seen.insert(chain.chain) {
            errors.push(ValidationError::new(
                format!("{}.chain", prefix),
                format!("duplicate entry for {}", chain.chain),
            ));
        }
        if let Err(e) = chain.rpc_url.parse::<url::Url>() {
            errors.push(ValidationError::new(
                format!("{}.rpc_url", prefix),
                format!("invalid URL '{}': {}", chain.rpc_url, e),
            ));
        }
        if chain.rpc_timeout_secs == 0 {
            errors.push(ValidationError::new(
                format!("{}.rpc_timeout_secs", prefix),
                "must be greater than 0",
            ));
        }
        if chain.confirmation_blocks == 0 {
            errors.push(ValidationError::new(
                format!("{}.confirmation_blocks", prefix),
                "must be at least 1",
            ));
        }
        if chain.finality_blocks() < chain.confirmation_blocks {
            errors.push(ValidationError::new(
                format!("{}.finality_blocks", prefix),
                "must not be lower than confirmation_blocks",
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
