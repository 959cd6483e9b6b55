//! JSON-file transaction store.
//!
//! Keeps the working set in an [`InMemoryTransactionRepository`] and writes a
//! full snapshot after every mutation (temp file + rename, so a crash never
//! leaves a torn file). Expired records are dropped on load and on each write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::domain::{IdempotencyKey, OperationId, Transaction, TransactionStatus};
use crate::repository::memory::{InMemoryTransactionRepository, StoredRecord};
use crate::repository::{RepositoryError, TransactionRepository};

#[derive(Debug)]
pub struct FileTransactionRepository {
    memory: InMemoryTransactionRepository,
    path: PathBuf,
    /// Serializes snapshot writes.
    write_lock: Mutex<()>,
}

impl FileTransactionRepository {
    /// Open the store at `path`, loading an existing snapshot if present.
    pub async fn open(path: impl AsRef<Path>, retention_days: u32) -> Result<Self, RepositoryError> {
        let path = path.as_ref().to_path_buf();
        let memory = InMemoryTransactionRepository::with_retention_days(retention_days);

        match tokio::fs::read(&path).await {
            Ok(bytes) if !bytes.is_empty() => {
                let records: Vec<StoredRecord> = serde_json::from_slice(&bytes)?;
                memory.restore(records);
                let purged = memory.purge_expired();
                tracing::info!(
                    path = %path.display(),
                    records = memory.len(),
                    purged = purged,
                    "Loaded transaction store"
                );
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "Starting new transaction store");
            }
            Err(e) => return Err(e.into()),
        }

        Ok(Self {
            memory,
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self) -> Result<(), RepositoryError> {
        let _guard = self.write_lock.lock().await;
        self.memory.purge_expired();
        let bytes = serde_json::to_vec_pretty(&self.memory.snapshot())?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl TransactionRepository for FileTransactionRepository {
    async fn save(&self, tx: &Transaction) -> Result<(), RepositoryError> {
        self.memory.save_sync(tx)?;
        self.persist().await
    }

    async fn get_by_operation_id(&self, id: OperationId) -> Result<Option<Transaction>, RepositoryError> {
        self.memory.get_by_operation_id(id).await
    }

    async fn get_by_idempotency_key(
        &self,
        key: IdempotencyKey,
    ) -> Result<Option<Transaction>, RepositoryError> {
        self.memory.get_by_idempotency_key(key).await
    }

    async fn update_status(
        &self,
        id: OperationId,
        status: TransactionStatus,
        error_message: Option<String>,
    ) -> Result<Transaction, RepositoryError> {
        let updated = self.memory.update_status_sync(id, status, error_message)?;
        self.persist().await?;
        Ok(updated)
    }

    async fn create_if_absent(&self, tx: &Transaction) -> Result<Option<Transaction>, RepositoryError> {
        let existing = self.memory.create_if_absent_sync(tx)?;
        if existing.is_none() {
            self.persist().await?;
        }
        Ok(existing)
    }

    async fn list_by_status(
        &self,
        status: TransactionStatus,
        limit: usize,
    ) -> Result<Vec<Transaction>, RepositoryError> {
        Ok(self.memory.list_by_status_sync(status, limit))
    }

    async fn list_writes_by_status(
        &self,
        status: TransactionStatus,
        limit: usize,
    ) -> Result<Vec<Transaction>, RepositoryError> {
        Ok(self.memory.list_writes_by_status_sync(status, limit))
    }

    async fn touch(&self, ids: &[OperationId]) -> Result<(), RepositoryError> {
        if ids.is_empty() {
            return Ok(());
        }
        self.memory.touch_sync(ids);
        self.persist().await
    }

    async fn reclaim_stale(
        &self,
        id: OperationId,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<Transaction>, RepositoryError> {
        let reclaimed = self.memory.reclaim_stale_sync(id, stale_before)?;
        if reclaimed.is_some() {
            self.persist().await?;
        }
        Ok(reclaimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChainType, EvmAddress, Inclusion, OperationKind};
    use alloy::primitives::TxHash;
    use serde_json::{json, Map};

    fn transfer() -> Transaction {
        let mut payload = Map::new();
        payload.insert("value".to_string(), json!("1000"));
        Transaction::new(
            OperationId::parse("6f1c1b5e-8a3d-4c1e-9b4f-2d7e8a9c0b1d").unwrap(),
            ChainType::Arbitrum,
            OperationKind::Transfer,
            EvmAddress::parse("from_address", "0x1111111111111111111111111111111111111111").unwrap(),
            EvmAddress::parse("to_address", "0x2222222222222222222222222222222222222222").unwrap(),
            payload,
            IdempotencyKey::parse("0b1d6f1c-8a3d-4c1e-9b4f-2d7e8a9c1b5e").unwrap(),
        )
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store").join("transactions.json");

        let mut tx = transfer();
        tx.mark_processing().unwrap();
        tx.record_fee_params(4, 10).unwrap();
        tx.mark_write_success(Inclusion {
            tx_hash: TxHash::repeat_byte(0xcd),
            block_number: 55,
            gas_used: 21_000,
            effective_gas_price: 12,
        })
        .unwrap();

        {
            let repo = FileTransactionRepository::open(&path, 90).await.unwrap();
            assert!(repo.create_if_absent(&tx).await.unwrap().is_none());
        }

        let reopened = FileTransactionRepository::open(&path, 90).await.unwrap();
        let loaded = reopened
            .get_by_idempotency_key(tx.idempotency_key())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded, tx);
        assert!(reopened.create_if_absent(&tx).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_status_updates_are_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transactions.json");

        let mut tx = transfer();
        tx.mark_processing().unwrap();
        let repo = FileTransactionRepository::open(&path, 90).await.unwrap();
        repo.save(&tx).await.unwrap();
        repo.update_status(tx.operation_id(), TransactionStatus::Failed, Some("boom".into()))
            .await
            .unwrap();
        drop(repo);

        let reopened = FileTransactionRepository::open(&path, 90).await.unwrap();
        let loaded = reopened.get_by_operation_id(tx.operation_id()).await.unwrap().unwrap();
        assert_eq!(loaded.status(), TransactionStatus::Failed);
        assert_eq!(loaded.error_message(), Some("boom"));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transactions.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();
        assert!(matches!(
            FileTransactionRepository::open(&path, 90).await,
            Err(RepositoryError::Encode(_))
        ));
    }
}
