//! Application error taxonomy.
//!
//! Validation and provider-initiation errors propagate synchronously to the
//! caller of initiate. Reconciliation errors stay internal: callers only ever
//! observe transaction status through the read endpoints.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use uuid::Uuid;

use crate::store::error::StoreError;
use crate::transactions::TransactionStatus;

/// Result alias used across the crate.
pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    /// Bad input. User-correctable, no side effects were performed.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A provider call failed before any transaction existed.
    #[error("{provider} initiation failed: {message}")]
    Provider {
        provider: &'static str,
        message: String,
    },

    /// A poll or verification attempt could not produce a usable status.
    /// Retried within the owning flow's budget, never surfaced as terminal.
    #[error("poll attempt failed: {0}")]
    TransientPoll(String),

    /// Attempted mutation of an already-terminal transaction. Benign: the
    /// first terminal signal won, this one is logged and dropped.
    #[error("transaction {id} is already {current}, refusing transition to {attempted}")]
    InvalidTransition {
        id: Uuid,
        current: TransactionStatus,
        attempted: TransactionStatus,
    },

    /// Redirect verification budget used up without a terminal result. The
    /// transaction stays Processing and resolves out of band.
    #[error("verification not conclusive for {reference} after {attempts} attempts")]
    VerificationExhausted { reference: String, attempts: u32 },

    #[error("transaction not found: {0}")]
    NotFound(String),

    #[error("missing caller identity")]
    Unauthenticated,

    #[error("permission denied")]
    Forbidden,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(message.into())
    }

    /// Errors that a retry within the same poll loop may clear.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::TransientPoll(_))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Provider { .. } => (StatusCode::BAD_GATEWAY, self.to_string()),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::Unauthenticated => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::Forbidden => (StatusCode::FORBIDDEN, self.to_string()),
            // Deliberately non-failure: the payment may still complete.
            AppError::VerificationExhausted { .. } => (StatusCode::ACCEPTED, self.to_string()),
            // Internal reconciliation errors should not normally reach a
            // handler; map them conservatively if one does.
            AppError::TransientPoll(_) | AppError::InvalidTransition { .. } => {
                (StatusCode::CONFLICT, self.to_string())
            }
            AppError::Store(e) => {
                tracing::error!("store error surfaced to handler: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
