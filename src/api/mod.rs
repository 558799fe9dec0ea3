//! HTTP boundary: router assembly and request handlers.

pub mod auth;
pub mod health;
pub mod transactions;
pub mod webhooks;

use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route(
            "/api/transactions",
            post(transactions::initiate).get(transactions::list),
        )
        .route("/api/transactions/stats", get(transactions::stats))
        .route("/api/transactions/verify", post(transactions::verify))
        .route("/api/transactions/:id", get(transactions::detail))
        .route("/api/transactions/:id/watch", get(transactions::watch))
        .route("/api/webhooks/daraja", post(webhooks::daraja))
        .route("/api/webhooks/paystack", post(webhooks::paystack))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
        .with_state(state)
}
