//! Initiation behavior: one Pending row per successful call, zero writes on
//! validation or provider failure, and the right follow-up per channel.

mod common;

use rust_decimal_macros::dec;

use pesaflow_backend::error::AppError;
use pesaflow_backend::orchestrator::InitiationRequest;
use pesaflow_backend::store::{TransactionStore, Visibility};
use pesaflow_backend::transactions::{PaymentMethod, TransactionStatus};

fn push_request(amount: rust_decimal::Decimal, identifier: &str) -> InitiationRequest {
    InitiationRequest {
        payment_method: PaymentMethod::PushConfirmation,
        amount,
        customer_identifier: identifier.to_string(),
    }
}

fn redirect_request(identifier: &str) -> InitiationRequest {
    InitiationRequest {
        payment_method: PaymentMethod::RedirectCheckout,
        amount: dec!(1000),
        customer_identifier: identifier.to_string(),
    }
}

#[tokio::test]
async fn push_initiation_creates_pending_row_and_starts_polling() {
    let h = common::harness();

    let outcome = h
        .state
        .orchestrator
        .initiate("clerk", push_request(dec!(500), "0712345678"))
        .await
        .unwrap();

    assert_eq!(outcome.transaction.status, TransactionStatus::Pending);
    assert_eq!(outcome.transaction.amount, dec!(500));
    assert_eq!(outcome.transaction.initiated_by, "clerk");
    assert!(outcome.transaction.external_reference.is_some());
    assert!(outcome.checkout_url.is_none());

    let rows = h.store.list(&Visibility::All).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(h.state.reconciler.active_polls(), 1);

    h.state.reconciler.cancel_all();
}

#[tokio::test]
async fn redirect_initiation_returns_checkout_url_without_polling() {
    let h = common::harness();

    let outcome = h
        .state
        .orchestrator
        .initiate("clerk", redirect_request("customer@example.com"))
        .await
        .unwrap();

    assert_eq!(
        outcome.checkout_url.as_deref(),
        Some("https://checkout.test/session")
    );
    assert_eq!(outcome.transaction.status, TransactionStatus::Pending);
    // The redirect flow waits for the customer to come back; nothing polls.
    assert_eq!(h.state.reconciler.active_polls(), 0);
    assert_eq!(h.redirect.query_count(), 0);
}

#[tokio::test]
async fn validation_failure_writes_nothing_and_calls_no_provider() {
    let h = common::harness();

    let cases = [
        push_request(dec!(0), "0712345678"),
        push_request(dec!(-5), "0712345678"),
        push_request(dec!(500), "abc"),
        push_request(dec!(500), "0812345678"),
        redirect_request("not-an-email"),
    ];

    for request in cases {
        let err = h
            .state
            .orchestrator
            .initiate("clerk", request)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    assert!(h.store.list(&Visibility::All).await.unwrap().is_empty());
    assert_eq!(h.push.initiate_count(), 0);
    assert_eq!(h.redirect.initiate_count(), 0);
}

#[tokio::test]
async fn provider_failure_leaves_the_store_untouched() {
    let h = common::harness();
    h.push.fail_next_initiation();

    let err = h
        .state
        .orchestrator
        .initiate("clerk", push_request(dec!(500), "0712345678"))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Provider { .. }));
    assert!(h.store.list(&Visibility::All).await.unwrap().is_empty());
    assert_eq!(h.state.reconciler.active_polls(), 0);
}
