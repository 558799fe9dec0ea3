//! The transaction entity and its lifecycle state machine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payment channel a transaction was initiated on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "payment_method", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    /// Out-of-band approval prompt pushed to the customer's phone.
    PushConfirmation,
    /// Hosted checkout page; the customer returns carrying a reference.
    RedirectCheckout,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::PushConfirmation => "PUSH_CONFIRMATION",
            PaymentMethod::RedirectCheckout => "REDIRECT_CHECKOUT",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status. Pending and Processing are pollable; Completed, Failed
/// and Cancelled are terminal and absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "transaction_status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Completed
                | TransactionStatus::Failed
                | TransactionStatus::Cancelled
        )
    }

    /// Whether `next` is a legal transition from this state. Processing is
    /// optional on the path: Pending may jump straight to any terminal state.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        match self {
            TransactionStatus::Pending => matches!(
                next,
                TransactionStatus::Processing
                    | TransactionStatus::Completed
                    | TransactionStatus::Failed
                    | TransactionStatus::Cancelled
            ),
            TransactionStatus::Processing => matches!(
                next,
                TransactionStatus::Completed
                    | TransactionStatus::Failed
                    | TransactionStatus::Cancelled
            ),
            // Absorbing.
            TransactionStatus::Completed
            | TransactionStatus::Failed
            | TransactionStatus::Cancelled => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Processing => "PROCESSING",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Failed => "FAILED",
            TransactionStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payment collection request tracked from initiation to a terminal state.
///
/// Created once by the orchestrator, mutated exclusively through the store's
/// compare-and-set primitive, never deleted.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Transaction {
    pub id: Uuid,
    pub amount: Decimal,
    pub method: PaymentMethod,
    /// Phone number for push, email for redirect. Validated at creation.
    pub customer_identifier: String,
    /// Provider-assigned correlation id; set once the initiation call
    /// succeeds, unique across all transactions, immutable afterwards.
    pub external_reference: Option<String>,
    pub status: TransactionStatus,
    pub initiated_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Reconciliation attempts made so far. Only moves for pollable rows.
    pub poll_attempts: i32,
}

impl Transaction {
    pub fn new(
        id: Uuid,
        amount: Decimal,
        method: PaymentMethod,
        customer_identifier: impl Into<String>,
        external_reference: Option<String>,
        initiated_by: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            amount,
            method,
            customer_identifier: customer_identifier.into(),
            external_reference,
            status: TransactionStatus::Pending,
            initiated_by: initiated_by.into(),
            created_at: now,
            updated_at: now,
            poll_attempts: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_absorbing() {
        for terminal in [
            TransactionStatus::Completed,
            TransactionStatus::Failed,
            TransactionStatus::Cancelled,
        ] {
            assert!(terminal.is_terminal());
            for next in [
                TransactionStatus::Pending,
                TransactionStatus::Processing,
                TransactionStatus::Completed,
                TransactionStatus::Failed,
                TransactionStatus::Cancelled,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn pending_may_skip_processing() {
        assert!(TransactionStatus::Pending.can_transition_to(TransactionStatus::Completed));
        assert!(TransactionStatus::Pending.can_transition_to(TransactionStatus::Failed));
        assert!(TransactionStatus::Pending.can_transition_to(TransactionStatus::Cancelled));
        assert!(TransactionStatus::Pending.can_transition_to(TransactionStatus::Processing));
    }

    #[test]
    fn processing_cannot_regress() {
        assert!(!TransactionStatus::Processing.can_transition_to(TransactionStatus::Pending));
        assert!(TransactionStatus::Processing.can_transition_to(TransactionStatus::Completed));
    }

    #[test]
    fn new_transaction_starts_pending() {
        let tx = Transaction::new(
            Uuid::new_v4(),
            rust_decimal::Decimal::new(500, 0),
            PaymentMethod::PushConfirmation,
            "0712345678",
            Some("ws_CO_123".to_string()),
            "clerk",
        );
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.poll_attempts, 0);
        assert_eq!(tx.created_at, tx.updated_at);
    }
}
