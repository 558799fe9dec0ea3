//! The provider adapter capability trait.

use async_trait::async_trait;

use crate::error::AppResult;
use crate::payments::types::{InitiationDetails, ProviderHandoff, ProviderStatus};

/// A payment provider adapter.
///
/// Two variants exist: the push-confirmation adapter (mobile money STK push)
/// and the redirect-checkout adapter (hosted card/bank page). Both expose the
/// same normalized contract so the orchestrator and reconciler never see
/// provider-specific response shapes.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Start a payment attempt. On success the returned handoff carries the
    /// provider's reference and, for the redirect flow, a checkout URL.
    ///
    /// Failure here means no transaction will be persisted, so adapters may
    /// retry transient outbound errors internally before giving up.
    async fn initiate(&self, details: &InitiationDetails) -> AppResult<ProviderHandoff>;

    /// Query the status the provider associates with `reference`.
    ///
    /// Fails fast on transport problems and on unmapped provider vocabulary
    /// (`AppError::TransientPoll`); the caller's poll budget governs retries.
    async fn query_status(&self, reference: &str) -> AppResult<ProviderStatus>;
}
