//! Thread-safe in-memory transaction store.
//!
//! Backs tests and local development. The write lock around compare-and-set
//! gives the same per-record linearization the Postgres guarded UPDATE does.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::transactions::{Transaction, TransactionStatus};

use super::error::{StoreError, StoreResult};
use super::{CasOutcome, DailyTotal, TransactionStore, Visibility};

#[derive(Default, Clone)]
pub struct InMemoryTransactionStore {
    rows: Arc<RwLock<HashMap<Uuid, Transaction>>>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn create(&self, tx: Transaction) -> StoreResult<Transaction> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&tx.id) {
            return Err(StoreError::Duplicate {
                field: "id",
                value: tx.id.to_string(),
            });
        }
        if let Some(reference) = &tx.external_reference {
            if rows
                .values()
                .any(|existing| existing.external_reference.as_deref() == Some(reference))
            {
                return Err(StoreError::Duplicate {
                    field: "external_reference",
                    value: reference.clone(),
                });
            }
        }
        rows.insert(tx.id, tx.clone());
        Ok(tx)
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Transaction>> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn find_by_reference(&self, reference: &str) -> StoreResult<Option<Transaction>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .find(|tx| tx.external_reference.as_deref() == Some(reference))
            .cloned())
    }

    async fn list(&self, visibility: &Visibility) -> StoreResult<Vec<Transaction>> {
        let rows = self.rows.read().await;
        let mut out: Vec<Transaction> = rows
            .values()
            .filter(|tx| visibility.allows(tx))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: TransactionStatus,
        next: TransactionStatus,
    ) -> StoreResult<CasOutcome> {
        let mut rows = self.rows.write().await;
        let tx = rows.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if tx.status != expected {
            return Ok(CasOutcome::Stale(tx.clone()));
        }
        tx.status = next;
        tx.updated_at = Utc::now();
        Ok(CasOutcome::Applied(tx.clone()))
    }

    async fn record_poll_attempt(&self, id: Uuid) -> StoreResult<()> {
        let mut rows = self.rows.write().await;
        if let Some(tx) = rows.get_mut(&id) {
            if !tx.status.is_terminal() {
                tx.poll_attempts += 1;
            }
        }
        Ok(())
    }

    async fn daily_collected(
        &self,
        visibility: &Visibility,
        start: NaiveDate,
        end: NaiveDate,
    ) -> StoreResult<Vec<DailyTotal>> {
        let rows = self.rows.read().await;
        let mut by_day: BTreeMap<NaiveDate, Decimal> = BTreeMap::new();
        for tx in rows.values() {
            if tx.status != TransactionStatus::Completed || !visibility.allows(tx) {
                continue;
            }
            let day = tx.created_at.date_naive();
            if day < start || day > end {
                continue;
            }
            *by_day.entry(day).or_insert(Decimal::ZERO) += tx.amount;
        }
        Ok(by_day
            .into_iter()
            .map(|(date, amount)| DailyTotal { date, amount })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transactions::PaymentMethod;
    use rust_decimal_macros::dec;

    fn sample(reference: &str, initiated_by: &str) -> Transaction {
        Transaction::new(
            Uuid::new_v4(),
            dec!(500),
            PaymentMethod::PushConfirmation,
            "0712345678",
            Some(reference.to_string()),
            initiated_by,
        )
    }

    #[tokio::test]
    async fn create_rejects_duplicate_reference() {
        let store = InMemoryTransactionStore::new();
        store.create(sample("ref-1", "alice")).await.unwrap();

        let err = store.create(sample("ref-1", "bob")).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Duplicate {
                field: "external_reference",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn cas_applies_once_then_reports_stale() {
        let store = InMemoryTransactionStore::new();
        let tx = store.create(sample("ref-2", "alice")).await.unwrap();

        let first = store
            .compare_and_set_status(tx.id, TransactionStatus::Pending, TransactionStatus::Completed)
            .await
            .unwrap();
        assert!(matches!(first, CasOutcome::Applied(ref t) if t.status == TransactionStatus::Completed));

        let second = store
            .compare_and_set_status(tx.id, TransactionStatus::Pending, TransactionStatus::Failed)
            .await
            .unwrap();
        match second {
            CasOutcome::Stale(current) => assert_eq!(current.status, TransactionStatus::Completed),
            CasOutcome::Applied(_) => panic!("stale CAS must not apply"),
        }
    }

    #[tokio::test]
    async fn poll_attempts_frozen_after_terminal() {
        let store = InMemoryTransactionStore::new();
        let tx = store.create(sample("ref-3", "alice")).await.unwrap();

        store.record_poll_attempt(tx.id).await.unwrap();
        store
            .compare_and_set_status(tx.id, TransactionStatus::Pending, TransactionStatus::Failed)
            .await
            .unwrap();
        store.record_poll_attempt(tx.id).await.unwrap();

        let current = store.find_by_id(tx.id).await.unwrap().unwrap();
        assert_eq!(current.poll_attempts, 1);
    }

    #[tokio::test]
    async fn list_is_scoped_and_newest_first() {
        let store = InMemoryTransactionStore::new();
        let mut older = sample("ref-4", "alice");
        older.created_at = Utc::now() - chrono::Duration::minutes(5);
        store.create(older.clone()).await.unwrap();
        let newer = store.create(sample("ref-5", "alice")).await.unwrap();
        store.create(sample("ref-6", "bob")).await.unwrap();

        let all = store.list(&Visibility::All).await.unwrap();
        assert_eq!(all.len(), 3);

        let mine = store
            .list(&Visibility::Actor("alice".to_string()))
            .await
            .unwrap();
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].id, newer.id);
        assert_eq!(mine[1].id, older.id);
    }

    #[tokio::test]
    async fn daily_collected_counts_completed_only() {
        let store = InMemoryTransactionStore::new();
        let done = store.create(sample("ref-7", "alice")).await.unwrap();
        store
            .compare_and_set_status(done.id, TransactionStatus::Pending, TransactionStatus::Completed)
            .await
            .unwrap();
        store.create(sample("ref-8", "alice")).await.unwrap(); // stays pending

        let today = Utc::now().date_naive();
        let totals = store
            .daily_collected(&Visibility::All, today, today)
            .await
            .unwrap();
        assert_eq!(totals.len(), 1);
        assert_eq!(totals[0].amount, dec!(500));
    }
}
