//! Transaction endpoints: initiation, reads, stats, redirect verification
//! and the long-poll status watch.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::orchestrator::InitiationRequest;
use crate::transactions::{Transaction, TransactionStatus};
use crate::AppState;

use super::auth::Actor;

/// How long a watch request hangs before answering with the current snapshot.
const WATCH_WAIT: Duration = Duration::from_secs(20);

#[derive(Debug, Serialize)]
pub struct InitiateResponse {
    pub id: Uuid,
    pub amount: Decimal,
    pub status: TransactionStatus,
    pub external_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
}

pub async fn initiate(
    State(state): State<AppState>,
    actor: Actor,
    Json(request): Json<InitiationRequest>,
) -> AppResult<(StatusCode, Json<InitiateResponse>)> {
    let outcome = state
        .orchestrator
        .initiate(&actor.username, request)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(InitiateResponse {
            id: outcome.transaction.id,
            amount: outcome.transaction.amount,
            status: outcome.transaction.status,
            external_reference: outcome.transaction.external_reference.clone(),
            checkout_url: outcome.checkout_url,
        }),
    ))
}

pub async fn list(
    State(state): State<AppState>,
    actor: Actor,
) -> AppResult<Json<Vec<Transaction>>> {
    let transactions = state.store.list(&actor.visibility()).await?;
    Ok(Json(transactions))
}

pub async fn detail(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Transaction>> {
    let tx = load_visible(&state, &actor, id).await?;
    Ok(Json(tx))
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total_collected: Decimal,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    /// One entry per day of the range, zero-filled, ascending.
    pub trend: Vec<(NaiveDate, Decimal)>,
}

pub async fn stats(
    State(state): State<AppState>,
    actor: Actor,
    Query(query): Query<StatsQuery>,
) -> AppResult<Json<StatsResponse>> {
    let (start, end) = match (query.start, query.end) {
        (Some(start), Some(end)) => {
            if start > end {
                return Err(AppError::validation("start date must not be after end date"));
            }
            (start, end)
        }
        (None, None) => {
            let end = Utc::now().date_naive();
            (end - ChronoDuration::days(29), end)
        }
        _ => {
            return Err(AppError::validation(
                "start and end must be provided together",
            ))
        }
    };

    let totals = state
        .store
        .daily_collected(&actor.visibility(), start, end)
        .await?;
    let total_collected = totals.iter().map(|day| day.amount).sum();

    let mut trend = Vec::new();
    let mut collected = totals.into_iter().peekable();
    let mut cursor = start;
    while cursor <= end {
        let amount = match collected.peek() {
            Some(day) if day.date == cursor => collected.next().expect("peeked").amount,
            _ => Decimal::ZERO,
        };
        trend.push((cursor, amount));
        cursor = match cursor.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }

    Ok(Json(StatsResponse {
        total_collected,
        period_start: start,
        period_end: end,
        trend,
    }))
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    /// The external reference the caller brought back from the hosted page.
    pub reference: String,
}

pub async fn verify(
    State(state): State<AppState>,
    _actor: Actor,
    Json(request): Json<VerifyRequest>,
) -> AppResult<Response> {
    match state.reconciler.verify_redirect(&request.reference).await {
        Ok(tx) => Ok(Json(tx).into_response()),
        // Not a failure: the transaction stays Processing and resolves out
        // of band; tell the caller to keep watching.
        Err(AppError::VerificationExhausted { reference, attempts }) => {
            let snapshot = state
                .store
                .find_by_reference(&reference)
                .await?
                .ok_or_else(|| AppError::NotFound(reference.clone()))?;
            Ok((
                StatusCode::ACCEPTED,
                Json(serde_json::json!({
                    "message": format!(
                        "verification still pending after {attempts} attempts; \
                         the status will resolve asynchronously"
                    ),
                    "transaction": snapshot,
                })),
            )
                .into_response())
        }
        Err(other) => Err(other),
    }
}

/// Long-poll subscription: answers with a fresh snapshot as soon as the
/// transaction transitions, or with the current one after a bounded wait.
/// Callers that prefer plain polling can hit the detail endpoint instead.
pub async fn watch(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Transaction>> {
    let current = load_visible(&state, &actor, id).await?;
    if current.status.is_terminal() {
        return Ok(Json(current));
    }

    let mut events = state.feed.subscribe();
    let waited = tokio::time::timeout(WATCH_WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if event.transaction_id == id => return Some(()),
                Ok(_) => continue,
                // Lagged or closed: fall back to the snapshot.
                Err(_) => return None,
            }
        }
    })
    .await;

    let _ = waited;
    let snapshot = load_visible(&state, &actor, id).await?;
    Ok(Json(snapshot))
}

async fn load_visible(state: &AppState, actor: &Actor, id: Uuid) -> AppResult<Transaction> {
    let tx = state
        .store
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound(id.to_string()))?;
    if !actor.visibility().allows(&tx) {
        return Err(AppError::Forbidden);
    }
    Ok(tx)
}
