//! The initiation orchestrator.
//!
//! Validates a payment request, calls the adapter matching the method,
//! persists exactly one Pending transaction on success, and hands the push
//! flow over to the reconciler. Validation and provider failures leave the
//! store untouched.

use regex::Regex;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::{Arc, OnceLock};
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::payments::types::InitiationDetails;
use crate::payments::PaymentProvider;
use crate::reconciler::StatusReconciler;
use crate::store::TransactionStore;
use crate::transactions::{PaymentMethod, Transaction};

/// A payment request as the boundary delivers it.
#[derive(Debug, Clone, Deserialize)]
pub struct InitiationRequest {
    pub payment_method: PaymentMethod,
    pub amount: Decimal,
    /// Phone number for push, email for redirect.
    pub customer_identifier: String,
}

/// What the caller gets back from a successful initiation.
#[derive(Debug, Clone)]
pub struct InitiationOutcome {
    pub transaction: Transaction,
    /// Set for the redirect flow: where to send the customer next.
    pub checkout_url: Option<String>,
}

pub struct InitiationOrchestrator {
    store: Arc<dyn TransactionStore>,
    push_provider: Arc<dyn PaymentProvider>,
    redirect_provider: Arc<dyn PaymentProvider>,
    reconciler: Arc<StatusReconciler>,
}

fn phone_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // Local mobile format: 07XXXXXXXX or the +254 international spelling.
    PATTERN.get_or_init(|| Regex::new(r"^(?:\+?254|0)7\d{8}$").expect("valid phone pattern"))
}

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}$")
            .expect("valid email pattern")
    })
}

impl InitiationOrchestrator {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        push_provider: Arc<dyn PaymentProvider>,
        redirect_provider: Arc<dyn PaymentProvider>,
        reconciler: Arc<StatusReconciler>,
    ) -> Self {
        Self {
            store,
            push_provider,
            redirect_provider,
            reconciler,
        }
    }

    /// Initiate a payment on behalf of `actor`.
    ///
    /// Exactly one store write happens per successful call; validation and
    /// provider failures perform zero writes.
    pub async fn initiate(
        &self,
        actor: &str,
        request: InitiationRequest,
    ) -> AppResult<InitiationOutcome> {
        validate(&request)?;

        let id = Uuid::new_v4();
        let details = InitiationDetails {
            transaction_id: id,
            amount: request.amount,
            customer_identifier: request.customer_identifier.clone(),
        };

        let provider = match request.payment_method {
            PaymentMethod::PushConfirmation => &self.push_provider,
            PaymentMethod::RedirectCheckout => &self.redirect_provider,
        };

        let handoff = provider.initiate(&details).await?;

        if request.payment_method == PaymentMethod::RedirectCheckout
            && handoff.checkout_url.is_none()
        {
            return Err(AppError::Provider {
                provider: provider.name(),
                message: "checkout session missing redirect URL".to_string(),
            });
        }

        let transaction = self
            .store
            .create(Transaction::new(
                id,
                request.amount,
                request.payment_method,
                request.customer_identifier,
                Some(handoff.external_reference.clone()),
                actor,
            ))
            .await?;

        info!(
            transaction_id = %transaction.id,
            method = %transaction.method,
            reference = %handoff.external_reference,
            initiated_by = actor,
            "transaction created"
        );

        // The push flow is reconciled in the background from here on; the
        // redirect flow waits for the caller to come back with the reference.
        if request.payment_method == PaymentMethod::PushConfirmation {
            self.reconciler
                .spawn_push_poll(transaction.id, handoff.external_reference);
        }

        Ok(InitiationOutcome {
            transaction,
            checkout_url: handoff.checkout_url,
        })
    }
}

fn validate(request: &InitiationRequest) -> AppResult<()> {
    if request.amount <= Decimal::ZERO {
        return Err(AppError::validation("amount must be positive"));
    }
    let identifier = request.customer_identifier.trim();
    match request.payment_method {
        PaymentMethod::PushConfirmation if !phone_pattern().is_match(identifier) => Err(
            AppError::validation("customer_identifier must be a valid mobile number"),
        ),
        PaymentMethod::RedirectCheckout if !email_pattern().is_match(identifier) => Err(
            AppError::validation("customer_identifier must be a valid email address"),
        ),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request(method: PaymentMethod, amount: Decimal, identifier: &str) -> InitiationRequest {
        InitiationRequest {
            payment_method: method,
            amount,
            customer_identifier: identifier.to_string(),
        }
    }

    #[test]
    fn accepts_local_and_international_phone_formats() {
        for phone in ["0712345678", "254712345678", "+254712345678"] {
            let req = request(PaymentMethod::PushConfirmation, dec!(500), phone);
            assert!(validate(&req).is_ok(), "{phone} should validate");
        }
    }

    #[test]
    fn rejects_malformed_phone() {
        for phone in ["abc", "0812345678", "07123", "0712345678901"] {
            let req = request(PaymentMethod::PushConfirmation, dec!(500), phone);
            assert!(matches!(validate(&req), Err(AppError::Validation(_))));
        }
    }

    #[test]
    fn validates_email_for_redirect() {
        let ok = request(PaymentMethod::RedirectCheckout, dec!(1000), "a@b.com");
        assert!(validate(&ok).is_ok());

        for email in ["a@b", "not-an-email", "@b.com", "a b@c.com"] {
            let req = request(PaymentMethod::RedirectCheckout, dec!(1000), email);
            assert!(matches!(validate(&req), Err(AppError::Validation(_))));
        }
    }

    #[test]
    fn rejects_non_positive_amounts() {
        for amount in [dec!(0), dec!(-1)] {
            let req = request(PaymentMethod::PushConfirmation, amount, "0712345678");
            assert!(matches!(validate(&req), Err(AppError::Validation(_))));
        }
    }
}
