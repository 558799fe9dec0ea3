use std::net::SocketAddr;
use std::sync::Arc;

use pesaflow_backend::config::Config;
use pesaflow_backend::payments::providers::{DarajaProvider, PaystackProvider};
use pesaflow_backend::payments::PaymentProvider;
use pesaflow_backend::store::postgres::{init_pool, PgTransactionStore, PoolConfig};
use pesaflow_backend::store::TransactionStore;
use pesaflow_backend::{api, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // Load configuration
    let config = Config::from_env()?;

    tracing::info!("Starting Pesaflow Backend");
    tracing::info!("Environment: {}", config.server.environment);
    tracing::info!(
        "Reconciler: poll every {:?}, verify {} x {:?}",
        config.reconciler.poll_interval,
        config.reconciler.verify_attempts,
        config.reconciler.verify_interval,
    );

    // Database
    let pool = init_pool(
        &config.database.url,
        PoolConfig {
            max_connections: config.database.max_connections,
            ..PoolConfig::default()
        },
    )
    .await?;
    let store: Arc<dyn TransactionStore> = Arc::new(PgTransactionStore::new(pool));

    // Provider adapters
    let daraja: Arc<dyn PaymentProvider> = Arc::new(DarajaProvider::from_env()?);
    let paystack = Arc::new(PaystackProvider::from_env()?);

    let state = AppState::new(
        config,
        store,
        daraja,
        Arc::clone(&paystack) as Arc<dyn PaymentProvider>,
        paystack,
    );
    let reconciler = Arc::clone(&state.reconciler);
    let port = state.config.server.port;

    let app = api::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received, cancelling active polls");
            reconciler.cancel_all();
        })
        .await?;

    Ok(())
}
