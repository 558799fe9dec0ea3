//! Shared test harness: in-memory store, scripted mock providers, and a
//! fully wired `AppState`.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use pesaflow_backend::config::{Config, DatabaseConfig, ServerConfig};
use pesaflow_backend::error::{AppError, AppResult};
use pesaflow_backend::payments::providers::paystack::{PaystackConfig, PaystackProvider};
use pesaflow_backend::payments::types::{InitiationDetails, ProviderHandoff, ProviderStatus};
use pesaflow_backend::payments::PaymentProvider;
use pesaflow_backend::reconciler::ReconcilerConfig;
use pesaflow_backend::store::memory::InMemoryTransactionStore;
use pesaflow_backend::store::TransactionStore;
use pesaflow_backend::AppState;

/// Secret the harness Paystack instance signs webhooks with.
pub const WEBHOOK_SECRET: &str = "sk_test_key";

/// A provider whose status answers are scripted per test. When the script
/// runs out it keeps answering Pending, which no flow treats as terminal.
pub struct MockProvider {
    name: &'static str,
    checkout_url: Option<String>,
    fail_initiation: AtomicBool,
    statuses: Mutex<VecDeque<AppResult<ProviderStatus>>>,
    references: AtomicUsize,
    pub initiate_calls: AtomicUsize,
    pub query_calls: AtomicUsize,
}

impl MockProvider {
    pub fn new(name: &'static str, checkout_url: Option<String>) -> Self {
        Self {
            name,
            checkout_url,
            fail_initiation: AtomicBool::new(false),
            statuses: Mutex::new(VecDeque::new()),
            references: AtomicUsize::new(0),
            initiate_calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
        }
    }

    pub fn script_status(&self, status: AppResult<ProviderStatus>) {
        self.statuses.lock().unwrap().push_back(status);
    }

    pub fn fail_next_initiation(&self) {
        self.fail_initiation.store(true, Ordering::SeqCst);
    }

    pub fn initiate_count(&self) -> usize {
        self.initiate_calls.load(Ordering::SeqCst)
    }

    pub fn query_count(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentProvider for MockProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn initiate(&self, _details: &InitiationDetails) -> AppResult<ProviderHandoff> {
        self.initiate_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_initiation.swap(false, Ordering::SeqCst) {
            return Err(AppError::Provider {
                provider: self.name,
                message: "scripted initiation failure".to_string(),
            });
        }
        let n = self.references.fetch_add(1, Ordering::SeqCst);
        Ok(ProviderHandoff {
            external_reference: format!("{}-ref-{n}", self.name),
            checkout_url: self.checkout_url.clone(),
        })
    }

    async fn query_status(&self, _reference: &str) -> AppResult<ProviderStatus> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        match self.statuses.lock().unwrap().pop_front() {
            Some(status) => status,
            None => Ok(ProviderStatus::Pending),
        }
    }
}

pub fn test_config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8000,
            environment: "development".to_string(),
        },
        database: DatabaseConfig {
            url: "postgres://unused-in-tests".to_string(),
            max_connections: 1,
        },
        reconciler: ReconcilerConfig::default(),
    }
}

pub struct Harness {
    pub state: AppState,
    pub store: Arc<InMemoryTransactionStore>,
    pub push: Arc<MockProvider>,
    pub redirect: Arc<MockProvider>,
}

pub fn harness() -> Harness {
    harness_with_config(test_config())
}

pub fn harness_with_config(config: Config) -> Harness {
    let store = Arc::new(InMemoryTransactionStore::new());
    let push = Arc::new(MockProvider::new("push", None));
    let redirect = Arc::new(MockProvider::new(
        "redirect",
        Some("https://checkout.test/session".to_string()),
    ));
    let paystack = Arc::new(
        PaystackProvider::new(PaystackConfig {
            secret_key: WEBHOOK_SECRET.to_string(),
            ..PaystackConfig::default()
        })
        .expect("test provider"),
    );

    let state = AppState::new(
        config,
        Arc::clone(&store) as Arc<dyn TransactionStore>,
        Arc::clone(&push) as Arc<dyn PaymentProvider>,
        Arc::clone(&redirect) as Arc<dyn PaymentProvider>,
        paystack,
    );

    Harness {
        state,
        store,
        push,
        redirect,
    }
}
