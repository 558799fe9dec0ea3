//! The durable-store boundary.
//!
//! Everything above this module talks to a [`TransactionStore`] trait object.
//! The Postgres implementation backs production; the in-memory one backs
//! tests and local development. Per-record compare-and-set on `status` is the
//! only synchronization primitive the rest of the system needs.

pub mod error;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::transactions::{Transaction, TransactionStatus};
use error::StoreResult;

/// Which records a caller may see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Visibility {
    /// Elevated role: every record.
    All,
    /// Only records initiated by this actor.
    Actor(String),
}

impl Visibility {
    pub fn allows(&self, tx: &Transaction) -> bool {
        match self {
            Visibility::All => true,
            Visibility::Actor(name) => tx.initiated_by == *name,
        }
    }
}

/// Outcome of a compare-and-set status update.
#[derive(Debug)]
pub enum CasOutcome {
    /// The expected status matched; the row now carries the new status.
    Applied(Transaction),
    /// The row moved underneath us; carries the current row unchanged.
    Stale(Transaction),
}

/// One day's completed collections, for the stats endpoint.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct DailyTotal {
    pub date: NaiveDate,
    pub amount: Decimal,
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Persist a new transaction. Fails on id or external-reference collision.
    async fn create(&self, tx: Transaction) -> StoreResult<Transaction>;

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Transaction>>;

    /// Lookup by the provider-assigned reference, the key provider callbacks
    /// and redirect returns carry.
    async fn find_by_reference(&self, reference: &str) -> StoreResult<Option<Transaction>>;

    /// Scoped listing, newest first. There is deliberately no delete:
    /// transactions are retained as audit records.
    async fn list(&self, visibility: &Visibility) -> StoreResult<Vec<Transaction>>;

    /// Atomically move `status` from `expected` to `next`, refreshing
    /// `updated_at`. Linearization point for all transitions: under duplicate
    /// concurrent signals exactly one caller observes `Applied`.
    async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: TransactionStatus,
        next: TransactionStatus,
    ) -> StoreResult<CasOutcome>;

    /// Increment `poll_attempts`. A no-op for terminal rows, so late pollers
    /// cannot disturb a closed record.
    async fn record_poll_attempt(&self, id: Uuid) -> StoreResult<()>;

    /// Per-day sums of COMPLETED transactions inside the inclusive date
    /// range, ascending by date. Days with no collections are absent; the
    /// caller zero-fills.
    async fn daily_collected(
        &self,
        visibility: &Visibility,
        start: NaiveDate,
        end: NaiveDate,
    ) -> StoreResult<Vec<DailyTotal>>;
}
