use chrono::Utc;
use ethers::types::{Address, H256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::constants::MAX_TX_RECORDS;
use crate::error::AppError;
use crate::models::{TxKind, TxRecord, TxStatus};

/// Lifecycle log of the writes this session has attempted.
///
/// Holds at most `capacity` records. Finished ones are dropped oldest first;
/// pending writes are never evicted.
#[derive(Clone)]
pub struct TransactionTracker {
    records: Arc<RwLock<Vec<TxRecord>>>,
    next_id: Arc<AtomicU64>,
    capacity: usize,
}

impl Default for TransactionTracker {
    fn default() -> Self {
        Self::with_capacity(MAX_TX_RECORDS)
    }
}

impl TransactionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Arc::new(RwLock::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(0)),
            capacity,
        }
    }

    pub async fn begin(&self, kind: TxKind, from: Address) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut records = self.records.write().await;
        if records.len() >= self.capacity {
            let excess = records.len() + 1 - self.capacity;
            evict_finished(&mut records, excess);
        }
        records.push(TxRecord {
            id,
            kind,
            from,
            tx_hash: None,
            status: TxStatus::Pending,
            error_code: None,
            error_message: None,
            block_number: None,
            submitted_at: Utc::now(),
            finished_at: None,
        });
        id
    }

    pub async fn mark_submitted(&self, id: u64, tx_hash: H256) {
        self.update(id, |record| record.tx_hash = Some(tx_hash)).await;
    }

    pub async fn mark_settled(&self, id: u64, block_number: Option<u64>) {
        self.update(id, |record| {
            record.status = TxStatus::Settled;
            record.block_number = block_number;
            record.finished_at = Some(Utc::now());
        })
        .await;
    }

    pub async fn mark_failed(&self, id: u64, error: &AppError) {
        let code = error.code().to_string();
        let message = error.to_string();
        self.update(id, |record| {
            record.status = TxStatus::Failed;
            record.error_code = Some(code);
            record.error_message = Some(message);
            record.finished_at = Some(Utc::now());
        })
        .await;
    }

    /// The write stays `Pending`: it may still land.
    pub async fn mark_stalled(&self, id: u64, error: &AppError) {
        let code = error.code().to_string();
        let message = error.to_string();
        self.update(id, |record| {
            record.error_code = Some(code);
            record.error_message = Some(message);
        })
        .await;
    }

    pub async fn get(&self, id: u64) -> Option<TxRecord> {
        self.records
            .read()
            .await
            .iter()
            .find(|record| record.id == id)
            .cloned()
    }

    /// Newest first.
    pub async fn list(&self) -> Vec<TxRecord> {
        let mut records = self.records.read().await.clone();
        records.reverse();
        records
    }

    pub async fn pending_count(&self) -> usize {
        self.records
            .read()
            .await
            .iter()
            .filter(|record| record.status == TxStatus::Pending)
            .count()
    }

    async fn update<F>(&self, id: u64, apply: F)
    where
        F: FnOnce(&mut TxRecord),
    {
        let mut records = self.records.write().await;
        match records.iter_mut().find(|record| record.id == id) {
            Some(record) => apply(record),
            None => tracing::warn!("Transaction record {} not found", id),
        }
    }
}

// Oldest first, skipping anything still pending.
fn evict_finished(records: &mut Vec<TxRecord>, mut excess: usize) {
    records.retain(|record| {
        if excess > 0 && record.status != TxStatus::Pending {
            excess -= 1;
            return false;
        }
        true
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lifecycle_moves_from_pending_to_settled() {
        let tracker = TransactionTracker::new();
        let from = Address::from_low_u64_be(9);
        let id = tracker.begin(TxKind::JoinWorld, from).await;
        assert_eq!(tracker.pending_count().await, 1);

        tracker.mark_submitted(id, H256::repeat_byte(0xab)).await;
        tracker.mark_settled(id, Some(12)).await;

        let record = tracker.get(id).await.expect("record");
        assert_eq!(record.status, TxStatus::Settled);
        assert_eq!(record.block_number, Some(12));
        assert_eq!(record.tx_hash, Some(H256::repeat_byte(0xab)));
        assert!(record.finished_at.is_some());
        assert_eq!(tracker.pending_count().await, 0);
    }

    #[tokio::test]
    async fn failures_keep_error_code() {
        let tracker = TransactionTracker::new();
        let id = tracker
            .begin(TxKind::RegisterUser, Address::from_low_u64_be(1))
            .await;
        tracker.mark_failed(id, &AppError::DuplicateRegistration).await;

        let record = tracker.get(id).await.expect("record");
        assert_eq!(record.status, TxStatus::Failed);
        assert_eq!(record.error_code.as_deref(), Some("DUPLICATE_REGISTRATION"));
    }

    #[tokio::test]
    async fn stalled_writes_remain_pending() {
        let tracker = TransactionTracker::new();
        let id = tracker
            .begin(TxKind::CreateWorld, Address::from_low_u64_be(1))
            .await;
        let err = AppError::PendingTooLong {
            tx_hash: "0x01".into(),
            waited_secs: 30,
        };
        tracker.mark_stalled(id, &err).await;

        let record = tracker.get(id).await.expect("record");
        assert_eq!(record.status, TxStatus::Pending);
        assert_eq!(record.error_code.as_deref(), Some("PENDING_TOO_LONG"));
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let tracker = TransactionTracker::new();
        let from = Address::from_low_u64_be(1);
        let first = tracker.begin(TxKind::RegisterUser, from).await;
        let second = tracker.begin(TxKind::JoinWorld, from).await;

        let ids: Vec<u64> = tracker.list().await.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![second, first]);
    }

    #[tokio::test]
    async fn finished_records_are_evicted_oldest_first() {
        let tracker = TransactionTracker::with_capacity(3);
        let from = Address::from_low_u64_be(1);

        let stalled = tracker.begin(TxKind::CreateWorld, from).await;
        let first = tracker.begin(TxKind::RegisterUser, from).await;
        tracker.mark_settled(first, Some(1)).await;
        let second = tracker.begin(TxKind::JoinWorld, from).await;
        tracker.mark_failed(second, &AppError::InsufficientFee).await;

        let third = tracker.begin(TxKind::ScoutCity, from).await;
        tracker.mark_settled(third, Some(2)).await;
        let fourth = tracker.begin(TxKind::AttackCity, from).await;

        assert!(tracker.get(first).await.is_none());
        assert!(tracker.get(second).await.is_none());
        assert_eq!(
            tracker.get(stalled).await.map(|r| r.status),
            Some(TxStatus::Pending)
        );
        let ids: Vec<u64> = tracker.list().await.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![fourth, third, stalled]);
    }
}
