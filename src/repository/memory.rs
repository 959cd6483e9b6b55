//! In-memory transaction store.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::domain::{IdempotencyKey, OperationId, Transaction, TransactionStatus};
use crate::repository::{RepositoryError, TransactionRepository};

/// Default record lifetime.
pub const DEFAULT_RETENTION_DAYS: u32 = 90;

/// A transaction plus its store-level expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    pub transaction: Transaction,
    pub expires_at: DateTime<Utc>,
}

impl StoredRecord {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Thread-safe store backed by two `DashMap`s.
///
/// The idempotency index is always locked before the record map, which
/// makes `create_if_absent` atomic per key without a global lock.
#[derive(Debug, Clone)]
pub struct InMemoryTransactionRepository {
    by_id: Arc<DashMap<OperationId, StoredRecord>>,
    by_key: Arc<DashMap<IdempotencyKey, OperationId>>,
    retention: Duration,
}

impl InMemoryTransactionRepository {
    pub fn new() -> Self {
        Self::with_retention_days(DEFAULT_RETENTION_DAYS)
    }

    pub fn with_retention_days(days: u32) -> Self {
        Self::with_retention(Duration::days(i64::from(days)))
    }

    pub fn with_retention(retention: Duration) -> Self {
        Self {
            by_id: Arc::new(DashMap::new()),
            by_key: Arc::new(DashMap::new()),
            retention,
        }
    }

    /// Number of stored records, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    fn record_for(&self, tx: &Transaction) -> StoredRecord {
        StoredRecord {
            transaction: tx.clone(),
            expires_at: tx.created_at() + self.retention,
        }
    }

    fn live(&self, id: OperationId) -> Option<Transaction> {
        let now = Utc::now();
        self.by_id
            .get(&id)
            .filter(|r| r.is_live(now))
            .map(|r| r.transaction.clone())
    }

    pub(crate) fn save_sync(&self, tx: &Transaction) -> Result<(), RepositoryError> {
        let id = tx.operation_id();
        let key = tx.idempotency_key();

        match self.by_key.entry(key) {
            Entry::Occupied(mut entry) => {
                let existing = *entry.get();
                if existing != id {
                    if self.live(existing).is_some() {
                        return Err(RepositoryError::KeyConflict { key, existing });
                    }
                    entry.insert(id);
                }
                self.by_id.insert(id, self.record_for(tx));
            }
            Entry::Vacant(entry) => {
                entry.insert(id);
                self.by_id.insert(id, self.record_for(tx));
            }
        }
        Ok(())
    }

    pub(crate) fn create_if_absent_sync(
        &self,
        tx: &Transaction,
    ) -> Result<Option<Transaction>, RepositoryError> {
        let id = tx.operation_id();

        match self.by_key.entry(tx.idempotency_key()) {
            Entry::Occupied(mut entry) => {
                if let Some(existing) = self.live(*entry.get()) {
                    return Ok(Some(existing));
                }
                if let Some(existing) = self.live(id) {
                    return Ok(Some(existing));
                }
                // Index pointed at an expired record.
                entry.insert(id);
                self.by_id.insert(id, self.record_for(tx));
            }
            Entry::Vacant(entry) => {
                if let Some(existing) = self.live(id) {
                    return Ok(Some(existing));
                }
                self.by_id.insert(id, self.record_for(tx));
                entry.insert(id);
            }
        }
        Ok(None)
    }

    pub(crate) fn update_status_sync(
        &self,
        id: OperationId,
        status: TransactionStatus,
        error_message: Option<String>,
    ) -> Result<Transaction, RepositoryError> {
        let now = Utc::now();
        let mut record = self
            .by_id
            .get_mut(&id)
            .filter(|r| r.is_live(now))
            .ok_or(RepositoryError::NotFound(id))?;
        record.transaction.apply_status(status, error_message)?;
        Ok(record.transaction.clone())
    }

    pub(crate) fn list_by_status_sync(&self, status: TransactionStatus, limit: usize) -> Vec<Transaction> {
        let now = Utc::now();
        let mut matches: Vec<Transaction> = self
            .by_id
            .iter()
            .filter(|r| r.is_live(now) && r.transaction.status() == status)
            .map(|r| r.transaction.clone())
            .collect();
        matches.sort_by_key(|tx| tx.created_at());
        matches.truncate(limit);
        matches
    }

    pub(crate) fn list_writes_by_status_sync(&self, status: TransactionStatus, limit: usize) -> Vec<Transaction> {
        let now = Utc::now();
        let mut matches: Vec<Transaction> = self
            .by_id
            .iter()
            .filter(|r| r.is_live(now) && r.transaction.status() == status && r.transaction.is_write())
            .map(|r| r.transaction.clone())
            .collect();
        matches.sort_by_key(|tx| (tx.updated_at(), tx.operation_id()));
        matches.truncate(limit);
        matches
    }

    pub(crate) fn touch_sync(&self, ids: &[OperationId]) {
        let now = Utc::now();
        for id in ids {
            if let Some(mut record) = self.by_id.get_mut(id).filter(|r| r.is_live(now)) {
                record.transaction.touch();
            }
        }
    }

    pub(crate) fn reclaim_stale_sync(
        &self,
        id: OperationId,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<Transaction>, RepositoryError> {
        let now = Utc::now();
        let mut record = self
            .by_id
            .get_mut(&id)
            .filter(|r| r.is_live(now))
            .ok_or(RepositoryError::NotFound(id))?;

        let tx = &mut record.transaction;
        let abandoned = tx.status() == TransactionStatus::Processing
            && tx.nonce().is_none()
            && tx.tx_hash().is_none()
            && tx.updated_at() <= stale_before;
        if !abandoned {
            return Ok(None);
        }
        tx.touch();
        Ok(Some(tx.clone()))
    }

    /// Drop expired records and their index entries. Returns how many went.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<(OperationId, IdempotencyKey)> = self
            .by_id
            .iter()
            .filter(|r| !r.is_live(now))
            .map(|r| (*r.key(), r.transaction.idempotency_key()))
            .collect();

        for (id, key) in &expired {
            self.by_key.remove_if(key, |_, owner| owner == id);
            self.by_id.remove(id);
        }
        expired.len()
    }

    pub(crate) fn snapshot(&self) -> Vec<StoredRecord> {
        let mut records: Vec<StoredRecord> = self.by_id.iter().map(|r| r.value().clone()).collect();
        records.sort_by_key(|r| r.transaction.created_at());
        records
    }

    pub(crate) fn restore(&self, records: Vec<StoredRecord>) {
        for record in records {
            let id = record.transaction.operation_id();
            self.by_key.insert(record.transaction.idempotency_key(), id);
            self.by_id.insert(id, record);
        }
    }
}

impl Default for InMemoryTransactionRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransactionRepository for InMemoryTransactionRepository {
    async fn save(&self, tx: &Transaction) -> Result<(), RepositoryError> {
        self.save_sync(tx)
    }

    async fn get_by_operation_id(&self, id: OperationId) -> Result<Option<Transaction>, RepositoryError> {
        Ok(self.live(id))
    }

    async fn get_by_idempotency_key(
        &self,
        key: IdempotencyKey,
    ) -> Result<Option<Transaction>, RepositoryError> {
        let id = self.by_key.get(&key).map(|r| *r.value());
        Ok(id.and_then(|id| self.live(id)))
    }

    async fn update_status(
        &self,
        id: OperationId,
        status: TransactionStatus,
        error_message: Option<String>,
    ) -> Result<Transaction, RepositoryError> {
        self.update_status_sync(id, status, error_message)
    }

    async fn create_if_absent(&self, tx: &Transaction) -> Result<Option<Transaction>, RepositoryError> {
        self.create_if_absent_sync(tx)
    }

    async fn list_by_status(
        &self,
        status: TransactionStatus,
        limit: usize,
    ) -> Result<Vec<Transaction>, RepositoryError> {
        Ok(self.list_by_status_sync(status, limit))
    }

    async fn list_writes_by_status(
        &self,
        status: TransactionStatus,
        limit: usize,
    ) -> Result<Vec<Transaction>, RepositoryError> {
        Ok(self.list_writes_by_status_sync(status, limit))
    }

    async fn touch(&self, ids: &[OperationId]) -> Result<(), RepositoryError> {
        self.touch_sync(ids);
        Ok(())
    }

    async fn reclaim_stale(
        &self,
        id: OperationId,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<Transaction>, RepositoryError> {
        self.reclaim_stale_sync(id, stale_before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChainType, EvmAddress, Inclusion, OperationKind};
    use alloy::primitives::TxHash;
    use serde_json::{json, Map};

    const KEY: &str = "0b1d6f1c-8a3d-4c1e-9b4f-2d7e8a9c1b5e";

    fn tx_with(id: &str, key: &str) -> Transaction {
        Transaction::new(
            OperationId::parse(id).unwrap(),
            ChainType::Ethereum,
            OperationKind::GetBalance,
            EvmAddress::parse("from_address", "0x1111111111111111111111111111111111111111").unwrap(),
            EvmAddress::parse("to_address", "0x2222222222222222222222222222222222222222").unwrap(),
            Map::new(),
            IdempotencyKey::parse(key).unwrap(),
        )
    }

    fn tx() -> Transaction {
        tx_with("6f1c1b5e-8a3d-4c1e-9b4f-2d7e8a9c0b1d", KEY)
    }

    fn transfer(id: &str, key: &str) -> Transaction {
        let mut payload = Map::new();
        payload.insert("value".to_string(), json!("1"));
        Transaction::new(
            OperationId::parse(id).unwrap(),
            ChainType::Ethereum,
            OperationKind::Transfer,
            EvmAddress::parse("from_address", "0x1111111111111111111111111111111111111111").unwrap(),
            EvmAddress::parse("to_address", "0x2222222222222222222222222222222222222222").unwrap(),
            payload,
            IdempotencyKey::parse(key).unwrap(),
        )
    }

    fn settled_transfer(id: &str, key: &str) -> Transaction {
        let mut tx = transfer(id, key);
        tx.mark_processing().unwrap();
        tx.mark_write_success(Inclusion {
            tx_hash: TxHash::repeat_byte(0xcd),
            block_number: 10,
            gas_used: 21_000,
            effective_gas_price: 1,
        })
        .unwrap();
        tx
    }

    #[tokio::test]
    async fn test_save_and_lookup() {
        let repo = InMemoryTransactionRepository::new();
        let tx = tx();
        repo.save(&tx).await.unwrap();

        assert_eq!(repo.get_by_operation_id(tx.operation_id()).await.unwrap(), Some(tx.clone()));
        assert_eq!(repo.get_by_idempotency_key(tx.idempotency_key()).await.unwrap(), Some(tx));
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let repo = InMemoryTransactionRepository::new();
        let first = tx();
        let second = tx_with("11111111-2222-4333-8444-555555555555", KEY);

        assert!(repo.create_if_absent(&first).await.unwrap().is_none());
        let holder = repo.create_if_absent(&second).await.unwrap().unwrap();
        assert_eq!(holder.operation_id(), first.operation_id());
        assert_eq!(repo.get_by_operation_id(second.operation_id()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_concurrent_claims_have_one_winner() {
        let repo = InMemoryTransactionRepository::new();
        let mut handles = Vec::new();
        for i in 0..32u32 {
            let repo = repo.clone();
            let id = format!("00000000-0000-4000-8000-{:012}", i);
            handles.push(tokio::spawn(async move {
                repo.create_if_absent(&tx_with(&id, KEY)).await.unwrap().is_none()
            }));
        }
        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn test_save_rejects_foreign_key_owner() {
        let repo = InMemoryTransactionRepository::new();
        repo.save(&tx()).await.unwrap();
        let other = tx_with("11111111-2222-4333-8444-555555555555", KEY);
        assert!(matches!(
            repo.save(&other).await,
            Err(RepositoryError::KeyConflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_status_is_forward_only() {
        let repo = InMemoryTransactionRepository::new();
        let mut tx = tx();
        tx.mark_processing().unwrap();
        repo.save(&tx).await.unwrap();

        let failed = repo
            .update_status(tx.operation_id(), TransactionStatus::Failed, Some("rpc down".into()))
            .await
            .unwrap();
        assert_eq!(failed.error_message(), Some("rpc down"));

        assert!(matches!(
            repo.update_status(tx.operation_id(), TransactionStatus::Pending, None).await,
            Err(RepositoryError::InvalidTransition(_))
        ));
        assert!(matches!(
            repo.update_status(OperationId::new_v4(), TransactionStatus::Failed, None).await,
            Err(RepositoryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_record_can_be_reclaimed_once() {
        let repo = InMemoryTransactionRepository::new();
        let mut tx = tx();
        tx.mark_processing().unwrap();
        tx.mark_failed("failed to get nonce").unwrap();
        repo.save(&tx).await.unwrap();

        let reclaimed = repo
            .update_status(tx.operation_id(), TransactionStatus::Processing, None)
            .await
            .unwrap();
        assert_eq!(reclaimed.status(), TransactionStatus::Processing);
        assert_eq!(reclaimed.error_message(), None);

        assert!(matches!(
            repo.update_status(tx.operation_id(), TransactionStatus::Processing, None).await,
            Err(RepositoryError::InvalidTransition(_))
        ));
    }

    #[tokio::test]
    async fn test_list_by_status() {
        let repo = InMemoryTransactionRepository::new();
        let mut done = tx();
        done.mark_processing().unwrap();
        done.mark_read_success(Some("1".into())).unwrap();
        repo.save(&done).await.unwrap();
        repo.save(&tx_with("11111111-2222-4333-8444-555555555555", "22222222-2222-4333-8444-555555555555"))
            .await
            .unwrap();

        let listed = repo.list_by_status(TransactionStatus::Success, 10).await.unwrap();
        assert_eq!(listed, vec![done]);
        assert!(repo.list_by_status(TransactionStatus::Success, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_writes_rotates_after_touch() {
        let repo = InMemoryTransactionRepository::new();
        let first = settled_transfer("00000000-0000-4000-8000-000000000001", KEY);
        let second = settled_transfer(
            "00000000-0000-4000-8000-000000000002",
            "22222222-2222-4333-8444-555555555555",
        );
        let mut read = tx_with(
            "00000000-0000-4000-8000-000000000003",
            "33333333-2222-4333-8444-555555555555",
        );
        read.mark_processing().unwrap();
        read.mark_read_success(None).unwrap();
        for tx in [&first, &second, &read] {
            repo.save(tx).await.unwrap();
        }

        let listed = repo.list_writes_by_status(TransactionStatus::Success, 10).await.unwrap();
        let ids: Vec<OperationId> = listed.iter().map(|tx| tx.operation_id()).collect();
        assert_eq!(ids, vec![first.operation_id(), second.operation_id()]);

        repo.touch(&[first.operation_id()]).await.unwrap();
        let next = repo.list_writes_by_status(TransactionStatus::Success, 1).await.unwrap();
        assert_eq!(next[0].operation_id(), second.operation_id());
    }

    #[tokio::test]
    async fn test_stale_processing_record_is_reclaimed_once() {
        let repo = InMemoryTransactionRepository::new();
        let mut tx = tx();
        tx.mark_processing().unwrap();
        repo.save(&tx).await.unwrap();
        let cutoff = Utc::now();

        let long_ago = cutoff - Duration::days(1);
        assert_eq!(repo.reclaim_stale(tx.operation_id(), long_ago).await.unwrap(), None);

        let reclaimed = repo.reclaim_stale(tx.operation_id(), cutoff).await.unwrap().unwrap();
        assert_eq!(reclaimed.status(), TransactionStatus::Processing);
        assert!(reclaimed.updated_at() >= tx.updated_at());
        assert_eq!(repo.reclaim_stale(tx.operation_id(), cutoff).await.unwrap(), None);

        assert!(matches!(
            repo.reclaim_stale(OperationId::new_v4(), cutoff).await,
            Err(RepositoryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_record_with_fees_is_never_reclaimed() {
        let repo = InMemoryTransactionRepository::new();
        let mut tx = transfer("6f1c1b5e-8a3d-4c1e-9b4f-2d7e8a9c0b1d", KEY);
        tx.mark_processing().unwrap();
        tx.record_fee_params(7, 1).unwrap();
        repo.save(&tx).await.unwrap();

        assert_eq!(repo.reclaim_stale(tx.operation_id(), Utc::now()).await.unwrap(), None);
        let stored = repo.get_by_operation_id(tx.operation_id()).await.unwrap().unwrap();
        assert_eq!(stored, tx);
    }

    #[tokio::test]
    async fn test_expired_records_are_invisible_and_purged() {
        let repo = InMemoryTransactionRepository::with_retention(Duration::zero());
        let tx = tx();
        repo.save(&tx).await.unwrap();

        assert_eq!(repo.get_by_operation_id(tx.operation_id()).await.unwrap(), None);
        assert_eq!(repo.get_by_idempotency_key(tx.idempotency_key()).await.unwrap(), None);
        assert_eq!(repo.purge_expired(), 1);
        assert!(repo.is_empty());
    }
}
