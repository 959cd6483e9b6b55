//! Configuration loading from disk.
//!
//! Order: parse TOML, apply environment overrides, then validate. Overrides
//! use `EVM_EXECUTOR_RPC_URL_<CHAIN>` (e.g. `EVM_EXECUTOR_RPC_URL_POLYGON`)
//! and replace the primary RPC URL of an existing chain entry, or add the
//! chain with defaults when it is not listed.

use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::config::schema::{ChainConfig, ExecutorConfig};
use crate::config::validation::{validate_config, ValidationError};
use crate::domain::ChainType;

/// Environment variable prefix for RPC URL overrides.
pub const RPC_URL_ENV_PREFIX: &str = "EVM_EXECUTOR_RPC_URL_";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load, override and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ExecutorConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    load_config_str(&content)
}

/// Same as [`load_config`] for an in-memory document.
pub fn load_config_str(content: &str) -> Result<ExecutorConfig, ConfigError> {
    let mut config: ExecutorConfig = toml::from_str(content)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Apply RPC URL overrides read through `lookup`.
pub fn apply_env_overrides<F>(config: &mut ExecutorConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    for chain in ChainType::ALL {
        let key = format!("{}{}", RPC_URL_ENV_PREFIX, chain.as_str());
        let Some(url) = lookup(&key).filter(|u| !u.trim().is_empty()) else {
            continue;
        };

        match config.chains.iter_mut().find(|c| c.chain == chain) {
            Some(entry) => entry.rpc_url = url,
            None => config.chains.push(ChainConfig {
                chain,
                rpc_url: url,
                ..ChainConfig::default()
            }),
        }
        tracing::debug!(chain = %chain, env = %key, "RPC URL overridden from environment");
    }
}
