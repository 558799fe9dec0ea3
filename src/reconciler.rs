//! The status reconciler.
//!
//! Owns the lifecycle of every transaction after creation: per-transaction
//! polling tasks for the push flow, bounded verification for the redirect
//! flow, and the single transition primitive both share with the webhook
//! handlers. All transitions linearize through the store's compare-and-set,
//! so duplicate or late provider signals collapse to one effect.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::notifier::StatusFeed;
use crate::payments::PaymentProvider;
use crate::store::{CasOutcome, TransactionStore};
use crate::transactions::{Transaction, TransactionStatus};

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Wait between push-flow provider queries.
    pub poll_interval: Duration,
    /// Optional cap on total push-flow polling. Unset by default: the push
    /// flow polls until a terminal status arrives. When the cap fires the
    /// task stops and leaves the transaction as last observed.
    pub poll_timeout: Option<Duration>,
    /// Redirect-flow verification budget.
    pub verify_attempts: u32,
    /// Wait between redirect-flow verification attempts.
    pub verify_interval: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            poll_timeout: None,
            verify_attempts: 6,
            verify_interval: Duration::from_secs(2),
        }
    }
}

impl ReconcilerConfig {
    pub fn from_env() -> Self {
        let secs = |name: &str| {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
        };
        let defaults = Self::default();
        Self {
            poll_interval: secs("RECONCILER_POLL_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.poll_interval),
            poll_timeout: secs("RECONCILER_PUSH_POLL_TIMEOUT_SECS").map(Duration::from_secs),
            verify_attempts: std::env::var("RECONCILER_VERIFY_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.verify_attempts),
            verify_interval: secs("RECONCILER_VERIFY_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.verify_interval),
        }
    }
}

pub struct StatusReconciler {
    store: Arc<dyn TransactionStore>,
    push_provider: Arc<dyn PaymentProvider>,
    redirect_provider: Arc<dyn PaymentProvider>,
    feed: StatusFeed,
    config: ReconcilerConfig,
    /// Cancellation handles for live polling tasks, keyed by transaction id.
    active: Mutex<HashMap<Uuid, watch::Sender<bool>>>,
}

impl StatusReconciler {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        push_provider: Arc<dyn PaymentProvider>,
        redirect_provider: Arc<dyn PaymentProvider>,
        feed: StatusFeed,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            push_provider,
            redirect_provider,
            feed,
            config,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Number of transactions currently being polled.
    pub fn active_polls(&self) -> usize {
        self.active.lock().expect("active poll map poisoned").len()
    }

    /// Cooperatively cancel the polling task for `id`, if one is live. The
    /// task exits before its next provider query and never forces a
    /// transition; the transaction keeps its last observed status.
    pub fn cancel_poll(&self, id: Uuid) {
        if let Some(handle) = self.active.lock().expect("active poll map poisoned").remove(&id) {
            let _ = handle.send(true);
            debug!(transaction_id = %id, "polling cancelled");
        }
    }

    /// Cancel every live polling task. Used on shutdown.
    pub fn cancel_all(&self) {
        let handles: Vec<_> = {
            let mut active = self.active.lock().expect("active poll map poisoned");
            active.drain().collect()
        };
        for (id, handle) in handles {
            let _ = handle.send(true);
            debug!(transaction_id = %id, "polling cancelled on shutdown");
        }
    }

    /// Start the periodic push-flow polling task for a transaction.
    /// Fire-and-forget relative to the caller of initiate.
    pub fn spawn_push_poll(self: &Arc<Self>, id: Uuid, reference: String) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.active
            .lock()
            .expect("active poll map poisoned")
            .insert(id, cancel_tx);

        let reconciler = Arc::clone(self);
        tokio::spawn(async move {
            reconciler.push_poll_loop(id, reference, cancel_rx).await;
        });
    }

    async fn push_poll_loop(
        self: Arc<Self>,
        id: Uuid,
        reference: String,
        mut cancel: watch::Receiver<bool>,
    ) {
        info!(transaction_id = %id, reference = %reference, "push polling started");

        let deadline = self
            .config
            .poll_timeout
            .map(|t| tokio::time::Instant::now() + t);

        loop {
            // Cancellation is checked before the wait and again before the
            // query; a cancelled task issues no final provider call.
            tokio::select! {
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        info!(transaction_id = %id, "push polling stopped by cancellation");
                        return;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
            if *cancel.borrow() {
                info!(transaction_id = %id, "push polling stopped by cancellation");
                return;
            }
            if let Some(deadline) = deadline {
                if tokio::time::Instant::now() >= deadline {
                    warn!(
                        transaction_id = %id,
                        "push polling timed out without a terminal status"
                    );
                    break;
                }
            }

            if let Err(e) = self.store.record_poll_attempt(id).await {
                warn!(transaction_id = %id, "failed to record poll attempt: {e}");
            }

            match self.push_provider.query_status(&reference).await {
                Ok(status) => {
                    let terminal = status.is_terminal();
                    if let Some(target) = status.as_transition_target() {
                        match self.resolve(id, target).await {
                            Ok(_) => {}
                            // Someone else closed it first; nothing left to do.
                            Err(AppError::InvalidTransition { current, .. }) => {
                                debug!(
                                    transaction_id = %id,
                                    %current,
                                    "poll observed an already-terminal transaction"
                                );
                                break;
                            }
                            Err(e) => {
                                warn!(transaction_id = %id, "poll transition failed: {e}");
                            }
                        }
                    }
                    if terminal {
                        info!(transaction_id = %id, "push polling finished");
                        break;
                    }
                }
                // Soft failure: log and keep the schedule.
                Err(e) if e.is_transient() => {
                    warn!(transaction_id = %id, "poll attempt failed: {e}");
                }
                Err(e) => {
                    warn!(transaction_id = %id, "unexpected poll error: {e}");
                }
            }
        }

        self.active
            .lock()
            .expect("active poll map poisoned")
            .remove(&id);
    }

    /// Redirect-flow verification: the caller came back from the hosted
    /// checkout carrying `reference`. Query up to the configured budget and
    /// return the terminal snapshot, or leave the transaction Processing and
    /// report [`AppError::VerificationExhausted`].
    pub async fn verify_redirect(&self, reference: &str) -> AppResult<Transaction> {
        let tx = self
            .store
            .find_by_reference(reference)
            .await?
            .ok_or_else(|| AppError::NotFound(reference.to_string()))?;

        if tx.status.is_terminal() {
            return Ok(tx);
        }

        info!(
            transaction_id = %tx.id,
            reference = %reference,
            attempts = self.config.verify_attempts,
            "redirect verification started"
        );

        for attempt in 1..=self.config.verify_attempts {
            // The hosted page redirects back faster than the provider settles
            // the charge, so every attempt waits first.
            tokio::time::sleep(self.config.verify_interval).await;

            if let Err(e) = self.store.record_poll_attempt(tx.id).await {
                warn!(transaction_id = %tx.id, "failed to record verification attempt: {e}");
            }

            match self.redirect_provider.query_status(reference).await {
                Ok(status) if status.is_terminal() => {
                    let target = status
                        .as_transition_target()
                        .expect("terminal status always has a target");
                    let resolved = match self.resolve(tx.id, target).await {
                        Ok(resolved) => resolved,
                        // A webhook beat us to it; report what stands.
                        Err(AppError::InvalidTransition { .. }) => self
                            .store
                            .find_by_id(tx.id)
                            .await?
                            .ok_or_else(|| AppError::NotFound(reference.to_string()))?,
                        Err(e) => return Err(e),
                    };
                    info!(
                        transaction_id = %tx.id,
                        status = %resolved.status,
                        attempt,
                        "redirect verification resolved"
                    );
                    return Ok(resolved);
                }
                Ok(status) => {
                    if let Some(target) = status.as_transition_target() {
                        // Non-terminal acknowledgement still moves Pending
                        // forward to Processing.
                        if let Err(e) = self.resolve(tx.id, target).await {
                            debug!(transaction_id = %tx.id, "processing transition skipped: {e}");
                        }
                    }
                }
                // Counts against the budget; never terminal on its own.
                Err(e) => {
                    warn!(
                        transaction_id = %tx.id,
                        attempt,
                        "verification attempt failed: {e}"
                    );
                }
            }
        }

        // Deliberate non-terminal exit: a webhook or later poll finishes the
        // job out of band.
        if let Err(e) = self.resolve(tx.id, TransactionStatus::Processing).await {
            debug!(transaction_id = %tx.id, "processing fallback skipped: {e}");
        }
        Err(AppError::VerificationExhausted {
            reference: reference.to_string(),
            attempts: self.config.verify_attempts,
        })
    }

    /// The shared transition primitive. Loads the row, rejects terminal and
    /// illegal transitions, then applies a compare-and-set keyed on the
    /// observed status. At most one of any set of concurrent duplicate
    /// signals applies; the rest observe the terminal row.
    pub async fn resolve(&self, id: Uuid, next: TransactionStatus) -> AppResult<Transaction> {
        loop {
            let current = self
                .store
                .find_by_id(id)
                .await?
                .ok_or_else(|| AppError::NotFound(id.to_string()))?;

            // Duplicate of an already-applied signal: benign no-op.
            if current.status == next {
                return Ok(current);
            }
            if !current.status.can_transition_to(next) {
                return Err(AppError::InvalidTransition {
                    id,
                    current: current.status,
                    attempted: next,
                });
            }

            match self
                .store
                .compare_and_set_status(id, current.status, next)
                .await?
            {
                CasOutcome::Applied(updated) => {
                    info!(
                        transaction_id = %id,
                        from = %current.status,
                        to = %updated.status,
                        "status transition applied"
                    );
                    self.feed.publish(&updated);
                    if updated.status.is_terminal() {
                        // Guarantees no further provider query for this id.
                        self.cancel_poll(id);
                    }
                    return Ok(updated);
                }
                // Lost the race; re-read and re-decide.
                CasOutcome::Stale(_) => continue,
            }
        }
    }
}
