//! Provider callback endpoints.
//!
//! Both handlers route through the reconciler's transition primitive, so a
//! replayed or late callback lands on an already-terminal transaction and is
//! answered 200 without touching it.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::payments::providers::daraja;
use crate::payments::types::ProviderStatus;
use crate::transactions::TransactionStatus;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct DarajaCallback {
    #[serde(rename = "Body")]
    pub body: DarajaCallbackBody,
}

#[derive(Debug, Deserialize)]
pub struct DarajaCallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: Option<String>,
    #[serde(rename = "ResultCode")]
    pub result_code: Option<serde_json::Value>,
    #[serde(rename = "ResultDesc")]
    pub result_desc: Option<String>,
}

/// Push-provider callback: the definitive outcome of an STK push.
pub async fn daraja(
    State(state): State<AppState>,
    Json(payload): Json<DarajaCallback>,
) -> AppResult<Response> {
    let callback = payload.body.stk_callback;
    let reference = callback
        .checkout_request_id
        .ok_or_else(|| AppError::validation("missing CheckoutRequestID"))?;
    let code = callback
        .result_code
        .map(normalize_code)
        .ok_or_else(|| AppError::validation("missing ResultCode"))?;

    info!(reference = %reference, code = %code, "push provider callback received");

    let tx = state
        .store
        .find_by_reference(&reference)
        .await?
        .ok_or_else(|| AppError::NotFound(reference.clone()))?;

    // Callbacks only arrive once the push has concluded, so an unmapped code
    // still means the attempt is over; unlike polling we resolve it Failed.
    let status = daraja::map_result_code(&code, callback.result_desc.as_deref()).unwrap_or(
        ProviderStatus::Failed {
            reason: callback.result_desc.clone(),
        },
    );
    let target = status
        .as_transition_target()
        .unwrap_or(TransactionStatus::Failed);

    apply_callback(&state, tx.id, target).await
}

#[derive(Debug, Deserialize)]
struct PaystackEvent {
    event: String,
    data: PaystackEventData,
}

#[derive(Debug, Deserialize)]
struct PaystackEventData {
    reference: String,
    status: String,
    /// Amount in the provider's smallest currency unit.
    amount: i64,
}

/// Redirect-provider webhook, authenticated by HMAC-SHA512 signature.
pub async fn paystack(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    let signature = headers
        .get("x-paystack-signature")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::validation("missing webhook signature"))?;

    if !state.paystack.validate_webhook_signature(&body, signature) {
        warn!("rejected webhook with invalid signature");
        return Err(AppError::validation("invalid webhook signature"));
    }

    let event: PaystackEvent = serde_json::from_slice(&body)
        .map_err(|e| AppError::validation(format!("malformed webhook payload: {e}")))?;

    if event.event != "charge.success" {
        return Ok((StatusCode::OK, "Ignored non-success event").into_response());
    }

    let tx = state
        .store
        .find_by_reference(&event.data.reference)
        .await?
        .ok_or_else(|| AppError::NotFound(event.data.reference.clone()))?;

    let paid = Decimal::from(event.data.amount) / Decimal::from(100);
    if (tx.amount - paid).abs() > Decimal::new(1, 2) {
        warn!(
            transaction_id = %tx.id,
            expected = %tx.amount,
            paid = %paid,
            "webhook amount mismatch"
        );
    }

    let target = if event.data.status == "success" {
        TransactionStatus::Completed
    } else {
        TransactionStatus::Failed
    };

    apply_callback(&state, tx.id, target).await
}

async fn apply_callback(
    state: &AppState,
    id: uuid::Uuid,
    target: TransactionStatus,
) -> AppResult<Response> {
    match state.reconciler.resolve(id, target).await {
        Ok(tx) => {
            info!(transaction_id = %tx.id, status = %tx.status, "callback processed");
            Ok((StatusCode::OK, "OK").into_response())
        }
        // Duplicate or late signal against a closed transaction.
        Err(AppError::InvalidTransition { current, .. }) => {
            info!(transaction_id = %id, %current, "callback ignored, transaction already terminal");
            Ok((StatusCode::OK, "OK").into_response())
        }
        Err(e) => Err(e),
    }
}

fn normalize_code(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}
