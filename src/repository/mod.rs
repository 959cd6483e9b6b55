//! Transaction persistence.
//!
//! # Data Flow
//! ```text
//! executor / sweeper / admin
//!     → TransactionRepository (trait)
//!         → memory.rs (DashMap, atomic claims per idempotency key)
//!         → file.rs (memory store + JSON snapshot on every write)
//! ```
//!
//! Records are keyed by operation id with a secondary index on the
//! idempotency key. Each record expires `retention_days` after creation.

pub mod file;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{IdempotencyKey, OperationId, Transaction, TransactionStatus, TransitionError};

pub use file::FileTransactionRepository;
pub use memory::InMemoryTransactionRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("transaction {0} not found")]
    NotFound(OperationId),

    /// The idempotency key is already bound to another operation.
    #[error("idempotency key {key} already belongs to operation {existing}")]
    KeyConflict {
        key: IdempotencyKey,
        existing: OperationId,
    },

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait TransactionRepository: Send + Sync {
    /// Insert or overwrite the record for `tx.operation_id()`.
    async fn save(&self, tx: &Transaction) -> Result<(), RepositoryError>;

    async fn get_by_operation_id(&self, id: OperationId) -> Result<Option<Transaction>, RepositoryError>;

    async fn get_by_idempotency_key(
        &self,
        key: IdempotencyKey,
    ) -> Result<Option<Transaction>, RepositoryError>;

    /// Move a stored record to `status`, enforcing forward-only transitions.
    async fn update_status(
        &self,
        id: OperationId,
        status: TransactionStatus,
        error_message: Option<String>,
    ) -> Result<Transaction, RepositoryError>;

    /// Atomically claim `tx.idempotency_key()`.
    ///
    /// Returns `None` when `tx` was inserted, or the record that already
    /// holds the key.
    async fn create_if_absent(&self, tx: &Transaction) -> Result<Option<Transaction>, RepositoryError>;

    /// Up to `limit` records in `status`, oldest first.
    async fn list_by_status(
        &self,
        status: TransactionStatus,
        limit: usize,
    ) -> Result<Vec<Transaction>, RepositoryError>;

    /// Up to `limit` write records in `status`, least recently updated first.
    async fn list_writes_by_status(
        &self,
        status: TransactionStatus,
        limit: usize,
    ) -> Result<Vec<Transaction>, RepositoryError>;

    /// Bump `updated_at` on each live record in `ids`.
    async fn touch(&self, ids: &[OperationId]) -> Result<(), RepositoryError>;

    /// Take over a `Processing` record whose owner went away before choosing fees.
    ///
    /// Only a record with neither nonce nor hash, last updated at or before
    /// `stale_before`, qualifies. The record's `updated_at` is bumped, so of
    /// several concurrent callers exactly one gets `Some`.
    async fn reclaim_stale(
        &self,
        id: OperationId,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<Transaction>, RepositoryError>;
}
