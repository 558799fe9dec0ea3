//! Normalized types shared by the payment provider adapters.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::transactions::TransactionStatus;

/// What an adapter needs to start a payment attempt.
#[derive(Debug, Clone)]
pub struct InitiationDetails {
    /// Our transaction id, usable as the provider-side account reference.
    pub transaction_id: Uuid,
    pub amount: Decimal,
    /// Phone number for the push flow, email for the redirect flow.
    pub customer_identifier: String,
}

/// Successful handoff from a provider initiation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHandoff {
    /// Provider-assigned correlation id; becomes the transaction's
    /// external reference.
    pub external_reference: String,
    /// Present for the redirect flow only: where to send the customer.
    pub checkout_url: Option<String>,
}

/// Provider-side status of a payment attempt, already mapped into our
/// vocabulary. Raw provider values that do not map cleanly never construct
/// one of these; they fail the poll instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderStatus {
    /// Provider has the request but work has not started.
    Pending,
    /// Provider acknowledged work in progress.
    Processing,
    Completed,
    Failed { reason: Option<String> },
    /// Customer declined or abandoned the charge.
    Cancelled,
}

impl ProviderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProviderStatus::Completed | ProviderStatus::Failed { .. } | ProviderStatus::Cancelled
        )
    }

    /// The transaction status this observation argues for, if any. Pending
    /// argues for nothing: the transaction is already at least Pending.
    pub fn as_transition_target(&self) -> Option<TransactionStatus> {
        match self {
            ProviderStatus::Pending => None,
            ProviderStatus::Processing => Some(TransactionStatus::Processing),
            ProviderStatus::Completed => Some(TransactionStatus::Completed),
            ProviderStatus::Failed { .. } => Some(TransactionStatus::Failed),
            ProviderStatus::Cancelled => Some(TransactionStatus::Cancelled),
        }
    }
}
