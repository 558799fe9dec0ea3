//! Payment collection backend.
//!
//! Two asynchronous collection channels — a push-confirmation flow (mobile
//! money STK push) and a redirect-checkout flow (hosted card/bank page) —
//! tracked through a five-state transaction lifecycle and driven to exactly
//! one terminal state by the status reconciler.

pub mod api;
pub mod config;
pub mod error;
pub mod notifier;
pub mod orchestrator;
pub mod payments;
pub mod reconciler;
pub mod store;
pub mod transactions;

use std::sync::Arc;

use config::Config;
use notifier::StatusFeed;
use orchestrator::InitiationOrchestrator;
use payments::providers::PaystackProvider;
use payments::PaymentProvider;
use reconciler::StatusReconciler;
use store::TransactionStore;

/// Shared application state handed to the router.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn TransactionStore>,
    pub orchestrator: Arc<InitiationOrchestrator>,
    pub reconciler: Arc<StatusReconciler>,
    pub feed: StatusFeed,
    /// Kept concrete for webhook signature validation.
    pub paystack: Arc<PaystackProvider>,
}

impl AppState {
    /// Wire the orchestrator and reconciler around a store and the two
    /// provider adapters. Tests pass mock providers here; production passes
    /// the Daraja adapter and `paystack` twice (trait object + concrete).
    pub fn new(
        config: Config,
        store: Arc<dyn TransactionStore>,
        push_provider: Arc<dyn PaymentProvider>,
        redirect_provider: Arc<dyn PaymentProvider>,
        paystack: Arc<PaystackProvider>,
    ) -> Self {
        let feed = StatusFeed::default();
        let reconciler = Arc::new(StatusReconciler::new(
            Arc::clone(&store),
            Arc::clone(&push_provider),
            Arc::clone(&redirect_provider),
            feed.clone(),
            config.reconciler.clone(),
        ));
        let orchestrator = Arc::new(InitiationOrchestrator::new(
            Arc::clone(&store),
            push_provider,
            redirect_provider,
            Arc::clone(&reconciler),
        ));

        Self {
            config: Arc::new(config),
            store,
            orchestrator,
            reconciler,
            feed,
            paystack,
        }
    }
}
