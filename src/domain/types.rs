//! Validated value types for execution jobs.
//!
//! Every raw string that arrives on a job is parsed into one of these types
//! before a [`Transaction`](crate::domain::Transaction) can be built. Parsing
//! is the only constructor, so holding a value means it passed validation.

use alloy::primitives::Address;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;
use uuid::Uuid;

static ADDRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(0x)?[0-9a-fA-F]{40}$").expect("static address regex"));

/// Errors produced while validating job fields.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid chain type: {0}")]
    InvalidChain(String),

    #[error("invalid operation type: {0}")]
    InvalidOperationType(String),

    #[error("invalid operation id: {0}")]
    InvalidOperationId(String),

    #[error("invalid idempotency key: {0}")]
    InvalidIdempotencyKey(String),

    #[error("invalid EVM address for {field}: {value}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("invalid payload field '{field}': {reason}")]
    InvalidPayload { field: &'static str, reason: String },
}

/// Supported EVM chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChainType {
    Ethereum,
    Polygon,
    Bsc,
    Arbitrum,
    Optimism,
    Avalanche,
}

impl ChainType {
    pub const ALL: [ChainType; 6] = [
        ChainType::Ethereum,
        ChainType::Polygon,
        ChainType::Bsc,
        ChainType::Arbitrum,
        ChainType::Optimism,
        ChainType::Avalanche,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChainType::Ethereum => "ETHEREUM",
            ChainType::Polygon => "POLYGON",
            ChainType::Bsc => "BSC",
            ChainType::Arbitrum => "ARBITRUM",
            ChainType::Optimism => "OPTIMISM",
            ChainType::Avalanche => "AVALANCHE",
        }
    }

    /// Mainnet chain id, used when a chain entry omits one.
    pub fn default_chain_id(&self) -> u64 {
        match self {
            ChainType::Ethereum => 1,
            ChainType::Polygon => 137,
            ChainType::Bsc => 56,
            ChainType::Arbitrum => 42161,
            ChainType::Optimism => 10,
            ChainType::Avalanche => 43114,
        }
    }
}

impl fmt::Display for ChainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChainType::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| ValidationError::InvalidChain(s.to_string()))
    }
}

/// Kind of operation requested by a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    Transfer,
    Deploy,
    Call,
    Approve,
    Swap,
    Stake,
    Unstake,
    Withdraw,
    Mint,
    Burn,
    Query,
    GetBalance,
    GetNonce,
    EstimateGas,
}

impl OperationKind {
    pub const ALL: [OperationKind; 14] = [
        OperationKind::Transfer,
        OperationKind::Deploy,
        OperationKind::Call,
        OperationKind::Approve,
        OperationKind::Swap,
        OperationKind::Stake,
        OperationKind::Unstake,
        OperationKind::Withdraw,
        OperationKind::Mint,
        OperationKind::Burn,
        OperationKind::Query,
        OperationKind::GetBalance,
        OperationKind::GetNonce,
        OperationKind::EstimateGas,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Transfer => "TRANSFER",
            OperationKind::Deploy => "DEPLOY",
            OperationKind::Call => "CALL",
            OperationKind::Approve => "APPROVE",
            OperationKind::Swap => "SWAP",
            OperationKind::Stake => "STAKE",
            OperationKind::Unstake => "UNSTAKE",
            OperationKind::Withdraw => "WITHDRAW",
            OperationKind::Mint => "MINT",
            OperationKind::Burn => "BURN",
            OperationKind::Query => "QUERY",
            OperationKind::GetBalance => "GET_BALANCE",
            OperationKind::GetNonce => "GET_NONCE",
            OperationKind::EstimateGas => "ESTIMATE_GAS",
        }
    }

    /// Whether the operation changes chain state and therefore needs signing.
    pub fn is_write(&self) -> bool {
        !matches!(
            self,
            OperationKind::Query
                | OperationKind::GetBalance
                | OperationKind::GetNonce
                | OperationKind::EstimateGas
        )
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperationKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ValidationError::InvalidOperationType(s.to_string()))
    }
}

/// Parse a canonical hyphenated UUID (36 chars), case-insensitive.
fn parse_hyphenated_uuid(value: &str) -> Option<Uuid> {
    if value.len() != 36 {
        return None;
    }
    Uuid::try_parse(value).ok()
}

/// Operation identifier (aggregate identity).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OperationId(Uuid);

impl OperationId {
    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        parse_hyphenated_uuid(value)
            .map(Self)
            .ok_or_else(|| ValidationError::InvalidOperationId(value.to_string()))
    }

    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

impl TryFrom<String> for OperationId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<OperationId> for String {
    fn from(id: OperationId) -> Self {
        id.to_string()
    }
}

/// Caller-supplied deduplication token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdempotencyKey(Uuid);

impl IdempotencyKey {
    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        parse_hyphenated_uuid(value)
            .map(Self)
            .ok_or_else(|| ValidationError::InvalidIdempotencyKey(value.to_string()))
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

impl TryFrom<String> for IdempotencyKey {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<IdempotencyKey> for String {
    fn from(key: IdempotencyKey) -> Self {
        key.to_string()
    }
}

/// A syntactically valid EVM account address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EvmAddress(Address);

impl EvmAddress {
    /// Validate `value` as 40 hex characters with an optional `0x` prefix.
    ///
    /// `field` names the job field in the error message.
    pub fn parse(field: &'static str, value: &str) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        };
        if !ADDRESS_RE.is_match(value) {
            return Err(invalid());
        }
        let hex = value.strip_prefix("0x").unwrap_or(value);
        Address::from_str(hex).map(Self).map_err(|_| invalid())
    }

    pub fn address(&self) -> Address {
        self.0
    }
}

impl From<Address> for EvmAddress {
    fn from(address: Address) -> Self {
        Self(address)
    }
}

impl fmt::Display for EvmAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for EvmAddress {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse("address", &value)
    }
}

impl From<EvmAddress> for String {
    fn from(address: EvmAddress) -> Self {
        address.to_string()
    }
}
