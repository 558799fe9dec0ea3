//! Postgres-backed transaction store.
//!
//! The compare-and-set is a guarded UPDATE: the row is only touched when its
//! current status still matches what the caller observed, which makes status
//! transitions linearizable per record without any application-side locking.

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::transactions::{Transaction, TransactionStatus};

use super::error::{StoreError, StoreResult};
use super::{CasOutcome, DailyTotal, TransactionStore, Visibility};

const COLUMNS: &str = "id, amount, method, customer_identifier, external_reference, \
                       status, initiated_by, created_at, updated_at, poll_attempts";

/// Connection pool settings.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 20,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// Initialize the database connection pool and verify connectivity.
pub async fn init_pool(database_url: &str, config: PoolConfig) -> StoreResult<PgPool> {
    info!(
        max_connections = config.max_connections,
        "initializing database pool"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect(database_url)
        .await
        .map_err(StoreError::from_sqlx)?;

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .map_err(StoreError::from_sqlx)?;

    Ok(pool)
}

pub struct PgTransactionStore {
    pool: PgPool,
}

impl PgTransactionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionStore for PgTransactionStore {
    async fn create(&self, tx: Transaction) -> StoreResult<Transaction> {
        debug!(id = %tx.id, method = %tx.method, "creating transaction");

        sqlx::query_as::<_, Transaction>(&format!(
            "INSERT INTO transactions ({COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING {COLUMNS}"
        ))
        .bind(tx.id)
        .bind(tx.amount)
        .bind(tx.method)
        .bind(&tx.customer_identifier)
        .bind(&tx.external_reference)
        .bind(tx.status)
        .bind(&tx.initiated_by)
        .bind(tx.created_at)
        .bind(tx.updated_at)
        .bind(tx.poll_attempts)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Transaction>> {
        sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {COLUMNS} FROM transactions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)
    }

    async fn find_by_reference(&self, reference: &str) -> StoreResult<Option<Transaction>> {
        sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {COLUMNS} FROM transactions WHERE external_reference = $1"
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)
    }

    async fn list(&self, visibility: &Visibility) -> StoreResult<Vec<Transaction>> {
        match visibility {
            Visibility::All => sqlx::query_as::<_, Transaction>(&format!(
                "SELECT {COLUMNS} FROM transactions ORDER BY created_at DESC"
            ))
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from_sqlx),
            Visibility::Actor(name) => sqlx::query_as::<_, Transaction>(&format!(
                "SELECT {COLUMNS} FROM transactions \
                 WHERE initiated_by = $1 ORDER BY created_at DESC"
            ))
            .bind(name)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from_sqlx),
        }
    }

    async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: TransactionStatus,
        next: TransactionStatus,
    ) -> StoreResult<CasOutcome> {
        let applied = sqlx::query_as::<_, Transaction>(&format!(
            "UPDATE transactions SET status = $1, updated_at = NOW() \
             WHERE id = $2 AND status = $3 \
             RETURNING {COLUMNS}"
        ))
        .bind(next)
        .bind(id)
        .bind(expected)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        match applied {
            Some(tx) => Ok(CasOutcome::Applied(tx)),
            None => {
                // Guard did not match: surface the row as it stands now.
                let current = self
                    .find_by_id(id)
                    .await?
                    .ok_or(StoreError::NotFound(id))?;
                Ok(CasOutcome::Stale(current))
            }
        }
    }

    async fn record_poll_attempt(&self, id: Uuid) -> StoreResult<()> {
        sqlx::query(
            "UPDATE transactions SET poll_attempts = poll_attempts + 1 \
             WHERE id = $1 AND status IN ('PENDING', 'PROCESSING')",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    async fn daily_collected(
        &self,
        visibility: &Visibility,
        start: NaiveDate,
        end: NaiveDate,
    ) -> StoreResult<Vec<DailyTotal>> {
        match visibility {
            Visibility::All => sqlx::query_as::<_, DailyTotal>(
                "SELECT (created_at AT TIME ZONE 'UTC')::date AS date, SUM(amount) AS amount \
                 FROM transactions \
                 WHERE status = 'COMPLETED' \
                   AND (created_at AT TIME ZONE 'UTC')::date BETWEEN $1 AND $2 \
                 GROUP BY 1 ORDER BY 1",
            )
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from_sqlx),
            Visibility::Actor(name) => sqlx::query_as::<_, DailyTotal>(
                "SELECT (created_at AT TIME ZONE 'UTC')::date AS date, SUM(amount) AS amount \
                 FROM transactions \
                 WHERE status = 'COMPLETED' AND initiated_by = $3 \
                   AND (created_at AT TIME ZONE 'UTC')::date BETWEEN $1 AND $2 \
                 GROUP BY 1 ORDER BY 1",
            )
            .bind(start)
            .bind(end)
            .bind(name)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from_sqlx),
        }
    }
}
