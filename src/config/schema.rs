//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the executor.
//! All types derive Serde traits for deserialization from config files, and
//! every section has defaults so a minimal file only lists its chains.

use serde::{Deserialize, Serialize};

use crate::domain::ChainType;

/// Root configuration for the executor.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Worker pool sizing.
    pub worker: WorkerConfig,

    /// Retry and backoff policy for failed jobs.
    pub retries: RetryConfig,

    /// Per-chain circuit breaker thresholds.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Confirmation waiting.
    pub confirmations: ConfirmationConfig,

    /// Transaction store.
    pub repository: RepositoryConfig,

    /// Dead-letter sink.
    pub dead_letter: DeadLetterConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,

    /// Admin HTTP API.
    pub admin: AdminConfig,

    /// Background promotion of `Success` writes to `Confirmed`.
    pub sweeper: SweeperConfig,

    /// Supported chains. A chain missing here is rejected at execution time.
    pub chains: Vec<ChainConfig>,
}

/// Worker pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Maximum jobs processed concurrently.
    pub concurrency: usize,

    /// Capacity of the inbound delivery channel.
    pub queue_capacity: usize,

    /// How long a duplicate delivery waits for an in-flight execution to settle.
    pub settle_timeout_secs: u64,

    /// Repository poll interval while waiting to settle, in milliseconds.
    pub settle_poll_ms: u64,

    /// A `Processing` record untouched this long, with no nonce chosen yet,
    /// is taken over by the next delivery.
    pub stale_after_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            queue_capacity: 1000,
            settle_timeout_secs: 30,
            settle_poll_ms: 500,
            stale_after_secs: 600,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt; a job runs at most `max_retries + 1` times.
    pub max_retries: u32,

    /// Delay before the first retry in milliseconds.
    pub initial_backoff_ms: u64,

    /// Upper bound on any delay in milliseconds.
    pub max_backoff_ms: u64,

    /// Growth factor between consecutive delays.
    pub multiplier: f64,

    /// Fraction of each delay that may be randomly removed. 0 disables jitter.
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 5000,
            multiplier: 2.0,
            jitter_ratio: 0.0,
        }
    }
}

/// Circuit breaker configuration, applied to every chain.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// Consecutive half-open successes that close it again.
    pub success_threshold: u32,

    /// Seconds the circuit stays open after the last failure.
    pub timeout_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout_secs: 30,
        }
    }
}

/// Confirmation waiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConfirmationConfig {
    /// Deadline for a submitted transaction to reach its depth.
    pub timeout_secs: u64,

    /// Receipt poll interval in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            poll_interval_ms: 3000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryBackend {
    Memory,
    File,
}

/// Transaction store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RepositoryConfig {
    pub backend: RepositoryBackend,

    /// JSON snapshot path for the file backend.
    pub path: String,

    /// Records older than this are dropped.
    pub retention_days: u32,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            backend: RepositoryBackend::File,
            path: "data/transactions.json".to_string(),
            retention_days: 90,
        }
    }
}

/// Dead-letter sink configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeadLetterConfig {
    /// JSON-lines file receiving dead-lettered jobs.
    pub path: String,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            path: "data/dead_letter.jsonl".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// Bearer token required on every route except `/health`. `None` disables auth.
    pub api_key: Option<String>,

    /// Admin API bind address.
    pub bind_address: String,

    /// Per-request timeout.
    pub request_timeout_secs: u64,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: None,
            bind_address: "127.0.0.1:8081".to_string(),
            request_timeout_secs: 10,
        }
    }
}

/// Confirmation sweep configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SweeperConfig {
    pub enabled: bool,

    /// Seconds between sweeps.
    pub interval_secs: u64,

    /// Maximum transactions examined per sweep.
    pub batch_size: usize,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            batch_size: 100,
        }
    }
}

/// One supported chain.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChainConfig {
    pub chain: ChainType,

    /// Primary JSON-RPC endpoint URL.
    pub rpc_url: String,

    /// Fallback RPC URLs tried in order when the primary fails.
    pub failover_urls: Vec<String>,

    /// EIP-155 chain id; defaults to the chain's mainnet id.
    pub chain_id: Option<u64>,

    /// RPC request timeout in seconds.
    pub rpc_timeout_secs: u64,

    /// Confirmations awaited before a write is `Success`.
    pub confirmation_blocks: u64,

    /// Confirmations before the sweep marks a write `Confirmed`; defaults to
    /// `confirmation_blocks`.
    pub finality_blocks: Option<u64>,
}

impl ChainConfig {
    pub fn chain_id(&self) -> u64 {
        self.chain_id.unwrap_or_else(|| self.chain.default_chain_id())
    }

    pub fn finality_blocks(&self) -> u64 {
        self.finality_blocks.unwrap_or(self.confirmation_blocks)
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain: ChainType::Ethereum,
            rpc_url: String::new(),
            failover_urls: Vec::new(),
            chain_id: None,
            rpc_timeout_secs: 10,
            confirmation_blocks: 12,
            finality_blocks: None,
        }
    }
}
