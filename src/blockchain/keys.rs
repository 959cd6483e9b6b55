//! Signing-key lookup.
//!
//! # Security
//! - Production keys are loaded ONLY from environment variables
//! - Keys are never logged or serialized; `Debug` is redacted
//! - The executor asks for a key per sender address and drops it after signing

use alloy::primitives::Address;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Environment variable prefix for per-address keys: `EVM_EXECUTOR_KEY_<ADDRESS HEX>`.
pub const KEY_ENV_PREFIX: &str = "EVM_EXECUTOR_KEY_";

/// Fallback environment variable used when no per-address key is set.
pub const DEFAULT_KEY_ENV_VAR: &str = "EVM_EXECUTOR_PRIVATE_KEY";

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("no signing key available for {0}")]
    NotFound(Address),
}

/// Hex-encoded private key material.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey(String);

impl PrivateKey {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// The raw hex string, with or without `0x`.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}

/// Where signing keys come from.
#[async_trait]
pub trait KeySource: Send + Sync {
    async fn signing_key(&self, address: Address) -> Result<PrivateKey, KeyError>;
}

/// Reads keys from the process environment on every lookup.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvKeySource;

impl EnvKeySource {
    /// Variable holding the key for `address`.
    pub fn var_name(address: Address) -> String {
        let hex = address.to_string();
        format!(
            "{}{}",
            KEY_ENV_PREFIX,
            hex.trim_start_matches("0x").to_uppercase()
        )
    }
}

#[async_trait]
impl KeySource for EnvKeySource {
    async fn signing_key(&self, address: Address) -> Result<PrivateKey, KeyError> {
        std::env::var(Self::var_name(address))
            .or_else(|_| std::env::var(DEFAULT_KEY_ENV_VAR))
            .ok()
            .filter(|key| !key.trim().is_empty())
            .map(|key| PrivateKey::new(key.trim()))
            .ok_or(KeyError::NotFound(address))
    }
}

/// Fixed address → key map.
#[derive(Debug, Default, Clone)]
pub struct StaticKeySource {
    keys: HashMap<Address, PrivateKey>,
}

impl StaticKeySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, address: Address, key: PrivateKey) -> Self {
        self.keys.insert(address, key);
        self
    }
}

#[async_trait]
impl KeySource for StaticKeySource {
    async fn signing_key(&self, address: Address) -> Result<PrivateKey, KeyError> {
        self.keys
            .get(&address)
            .cloned()
            .ok_or(KeyError::NotFound(address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    // Well-known test private key (Anvil's first account)
    const TEST_PRIVATE_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn anvil_address() -> Address {
        Address::from_str("0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266").unwrap()
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = PrivateKey::new(TEST_PRIVATE_KEY);
        assert!(!format!("{:?}", key).contains("ac09"));
    }

    #[test]
    fn test_env_var_name() {
        assert_eq!(
            EnvKeySource::var_name(anvil_address()),
            "EVM_EXECUTOR_KEY_F39FD6E51AAD88F6F4CE6AB8827279CFFFB92266"
        );
    }

    #[tokio::test]
    async fn test_env_key_source_per_address() {
        let address = anvil_address();
        std::env::set_var(EnvKeySource::var_name(address), TEST_PRIVATE_KEY);
        let key = EnvKeySource.signing_key(address).await.unwrap();
        assert_eq!(key.expose(), TEST_PRIVATE_KEY);
        std::env::remove_var(EnvKeySource::var_name(address));
    }

    #[tokio::test]
    async fn test_static_key_source() {
        let source = StaticKeySource::new().with_key(anvil_address(), PrivateKey::new(TEST_PRIVATE_KEY));
        assert!(source.signing_key(anvil_address()).await.is_ok());
        assert!(matches!(
            source.signing_key(Address::ZERO).await,
            Err(KeyError::NotFound(_))
        ));
    }
}
