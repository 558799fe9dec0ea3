//! Read-side status fan-out.
//!
//! Every applied transition publishes a [`StatusEvent`] on a broadcast
//! channel. Subscribers that fall behind miss events, not correctness: the
//! store snapshot is always the source of truth and callers may poll it
//! instead.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::transactions::{Transaction, TransactionStatus};

#[derive(Debug, Clone, Serialize)]
pub struct StatusEvent {
    pub transaction_id: Uuid,
    pub external_reference: Option<String>,
    pub status: TransactionStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct StatusFeed {
    sender: broadcast::Sender<StatusEvent>,
}

impl StatusFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish a transition. Nobody listening is fine.
    pub fn publish(&self, tx: &Transaction) {
        let _ = self.sender.send(StatusEvent {
            transaction_id: tx.id,
            external_reference: tx.external_reference.clone(),
            status: tx.status,
            occurred_at: tx.updated_at,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.sender.subscribe()
    }
}

impl Default for StatusFeed {
    fn default() -> Self {
        Self::new(256)
    }
}
