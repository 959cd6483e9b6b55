//! The `Transaction` aggregate and its status state machine.
//!
//! Status only moves forward:
//!
//! ```text
//! Pending ──► Processing ──► Success ──► Confirmed
//!    │          ▲   │
//!    │          │   ▼
//!    └─────────────► Failed
//! ```
//!
//! Transition methods are the only way to change status, so a successful
//! write always carries a transaction hash. `Failed → Processing` is the retry
//! path and is refused once a transaction was broadcast.

use alloy::primitives::TxHash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::domain::types::{ChainType, EvmAddress, IdempotencyKey, OperationId, OperationKind};

/// Lifecycle status of a transaction record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Success,
    Failed,
    Confirmed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Processing => "PROCESSING",
            TransactionStatus::Success => "SUCCESS",
            TransactionStatus::Failed => "FAILED",
            TransactionStatus::Confirmed => "CONFIRMED",
        }
    }

    /// No further transition is possible, except a retry of an unbroadcast failure.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Failed | TransactionStatus::Confirmed)
    }

    /// Execution has finished, successfully or not.
    pub fn is_settled(&self) -> bool {
        !matches!(self, TransactionStatus::Pending | TransactionStatus::Processing)
    }

    fn can_move_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Failed)
                | (Processing, Success)
                | (Processing, Failed)
                | (Failed, Processing)
                | (Success, Confirmed)
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TransactionStatus::Pending),
            "PROCESSING" => Ok(TransactionStatus::Processing),
            "SUCCESS" => Ok(TransactionStatus::Success),
            "FAILED" => Ok(TransactionStatus::Failed),
            "CONFIRMED" => Ok(TransactionStatus::Confirmed),
            other => Err(format!("unknown transaction status: {}", other)),
        }
    }
}

/// Rejected status change.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("invalid status transition from {from} to {to}")]
    Invalid {
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error("write operation cannot reach {0} without a transaction hash")]
    MissingHash(TransactionStatus),

    #[error("transaction {0} was already broadcast and cannot be retried")]
    AlreadyBroadcast(TxHash),
}

/// On-chain inclusion details of a confirmed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inclusion {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub gas_used: u64,
    pub effective_gas_price: u128,
}

/// A blockchain operation tracked from acceptance to a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    operation_id: OperationId,
    chain: ChainType,
    operation: OperationKind,
    from_address: EvmAddress,
    to_address: EvmAddress,
    payload: Map<String, Value>,
    status: TransactionStatus,
    idempotency_key: IdempotencyKey,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    executed_at: Option<DateTime<Utc>>,
    tx_hash: Option<TxHash>,
    block_number: Option<u64>,
    gas_used: Option<u64>,
    gas_price: Option<u128>,
    nonce: Option<u64>,
    query_result: Option<String>,
    error_message: Option<String>,
}

impl Transaction {
    /// Create a `Pending` transaction from validated job fields.
    pub fn new(
        operation_id: OperationId,
        chain: ChainType,
        operation: OperationKind,
        from_address: EvmAddress,
        to_address: EvmAddress,
        payload: Map<String, Value>,
        idempotency_key: IdempotencyKey,
    ) -> Self {
        let now = Utc::now();
        Self {
            operation_id,
            chain,
            operation,
            from_address,
            to_address,
            payload,
            status: TransactionStatus::Pending,
            idempotency_key,
            created_at: now,
            updated_at: now,
            executed_at: None,
            tx_hash: None,
            block_number: None,
            gas_used: None,
            gas_price: None,
            nonce: None,
            query_result: None,
            error_message: None,
        }
    }

    pub fn operation_id(&self) -> OperationId {
        self.operation_id
    }

    pub fn chain(&self) -> ChainType {
        self.chain
    }

    pub fn operation(&self) -> OperationKind {
        self.operation
    }

    pub fn from_address(&self) -> EvmAddress {
        self.from_address
    }

    pub fn to_address(&self) -> EvmAddress {
        self.to_address
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn idempotency_key(&self) -> IdempotencyKey {
        self.idempotency_key
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn executed_at(&self) -> Option<DateTime<Utc>> {
        self.executed_at
    }

    pub fn tx_hash(&self) -> Option<TxHash> {
        self.tx_hash
    }

    pub fn block_number(&self) -> Option<u64> {
        self.block_number
    }

    pub fn gas_used(&self) -> Option<u64> {
        self.gas_used
    }

    pub fn gas_price(&self) -> Option<u128> {
        self.gas_price
    }

    pub fn nonce(&self) -> Option<u64> {
        self.nonce
    }

    pub fn query_result(&self) -> Option<&str> {
        self.query_result.as_deref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn is_write(&self) -> bool {
        self.operation.is_write()
    }

    /// `Pending → Processing`, or `Failed → Processing` to retry a failure
    /// that never reached the chain.
    pub fn mark_processing(&mut self) -> Result<(), TransitionError> {
        self.move_to(TransactionStatus::Processing)
    }

    /// Attach the nonce and gas price chosen for a write.
    pub fn record_fee_params(&mut self, nonce: u64, gas_price: u128) -> Result<(), TransitionError> {
        self.require(TransactionStatus::Processing)?;
        self.nonce = Some(nonce);
        self.gas_price = Some(gas_price);
        self.touch();
        Ok(())
    }

    /// Remember the hash of a submitted but not yet confirmed write.
    pub fn record_submission(&mut self, tx_hash: TxHash) -> Result<(), TransitionError> {
        self.require(TransactionStatus::Processing)?;
        self.tx_hash = Some(tx_hash);
        self.touch();
        Ok(())
    }

    /// `Processing → Success` for a write included on chain.
    pub fn mark_write_success(&mut self, inclusion: Inclusion) -> Result<(), TransitionError> {
        self.require(TransactionStatus::Processing)?;
        self.check_move(TransactionStatus::Success, Some(inclusion.tx_hash))?;
        self.tx_hash = Some(inclusion.tx_hash);
        self.block_number = Some(inclusion.block_number);
        self.gas_used = Some(inclusion.gas_used);
        self.gas_price = Some(inclusion.effective_gas_price);
        self.executed_at = Some(Utc::now());
        self.set_status(TransactionStatus::Success);
        Ok(())
    }

    /// `Processing → Success` for a read; reads never carry a hash.
    pub fn mark_read_success(&mut self, result: Option<String>) -> Result<(), TransitionError> {
        self.require(TransactionStatus::Processing)?;
        self.check_move(TransactionStatus::Success, self.tx_hash)?;
        self.query_result = result;
        self.executed_at = Some(Utc::now());
        self.set_status(TransactionStatus::Success);
        Ok(())
    }

    /// `Success → Confirmed`.
    pub fn mark_confirmed(&mut self) -> Result<(), TransitionError> {
        self.move_to(TransactionStatus::Confirmed)
    }

    /// `Pending | Processing → Failed` with a reason.
    pub fn mark_failed(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.move_to(TransactionStatus::Failed)?;
        self.error_message = Some(reason.into());
        Ok(())
    }

    /// Apply a status change coming from storage-level updates.
    ///
    /// Same rules as the named transitions: forward only, and a write
    /// cannot reach `Success` or `Confirmed` without a hash.
    pub fn apply_status(
        &mut self,
        status: TransactionStatus,
        error_message: Option<String>,
    ) -> Result<(), TransitionError> {
        self.move_to(status)?;
        if error_message.is_some() {
            self.error_message = error_message;
        }
        Ok(())
    }

    fn require(&self, expected: TransactionStatus) -> Result<(), TransitionError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(TransitionError::Invalid {
                from: self.status,
                to: expected,
            })
        }
    }

    /// Whether `next` is reachable, given the hash the record will carry.
    fn check_move(&self, next: TransactionStatus, tx_hash: Option<TxHash>) -> Result<(), TransitionError> {
        if !self.status.can_move_to(next) {
            return Err(TransitionError::Invalid {
                from: self.status,
                to: next,
            });
        }
        if matches!(next, TransactionStatus::Success | TransactionStatus::Confirmed)
            && self.is_write()
            && tx_hash.is_none()
        {
            return Err(TransitionError::MissingHash(next));
        }
        if self.status == TransactionStatus::Failed {
            if let Some(hash) = self.tx_hash {
                return Err(TransitionError::AlreadyBroadcast(hash));
            }
        }
        Ok(())
    }

    fn move_to(&mut self, next: TransactionStatus) -> Result<(), TransitionError> {
        self.check_move(next, self.tx_hash)?;
        self.set_status(next);
        Ok(())
    }

    fn set_status(&mut self, next: TransactionStatus) {
        if self.status == TransactionStatus::Failed {
            self.error_message = None;
        }
        self.status = next;
        self.touch();
    }

    /// Bump `updated_at` without changing anything else.
    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
