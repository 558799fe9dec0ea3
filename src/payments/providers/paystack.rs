//! Redirect-checkout provider adapter (Paystack-style hosted page).
//!
//! Initiation creates a checkout session and hands back the authorization URL
//! plus the provider's reference; the customer pays on the hosted page and
//! returns carrying that reference for bounded verification.

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::payments::traits::PaymentProvider;
use crate::payments::types::{InitiationDetails, ProviderHandoff, ProviderStatus};

const PROVIDER_NAME: &str = "Paystack";

#[derive(Debug, Clone)]
pub struct PaystackConfig {
    pub secret_key: String,
    pub base_url: String,
    /// Where the hosted page sends the customer back to.
    pub callback_url: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for PaystackConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            base_url: "https://api.paystack.co".to_string(),
            callback_url: None,
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

impl PaystackConfig {
    pub fn from_env() -> AppResult<Self> {
        let secret_key = std::env::var("PAYSTACK_SECRET_KEY").map_err(|_| {
            AppError::validation("PAYSTACK_SECRET_KEY environment variable is required")
        })?;

        Ok(Self {
            secret_key,
            base_url: std::env::var("PAYSTACK_BASE_URL")
                .unwrap_or_else(|_| "https://api.paystack.co".to_string()),
            callback_url: std::env::var("PAYSTACK_CALLBACK_URL").ok(),
            timeout_secs: std::env::var("PAYSTACK_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
            max_retries: std::env::var("PAYSTACK_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
        })
    }
}

pub struct PaystackProvider {
    config: PaystackConfig,
    client: Client,
}

impl PaystackProvider {
    pub fn new(config: PaystackConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Provider {
                provider: PROVIDER_NAME,
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self { config, client })
    }

    pub fn from_env() -> AppResult<Self> {
        Self::new(PaystackConfig::from_env()?)
    }

    /// Authenticated request with bounded retry on rate limits and server
    /// errors. Used for initiation only; status queries fail fast.
    async fn make_request<T>(
        &self,
        method: reqwest::Method,
        endpoint: &str,
        body: Option<&serde_json::Value>,
        retries: u32,
    ) -> AppResult<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let url = format!("{}{}", self.config.base_url, endpoint);

        let mut attempt = 0;
        loop {
            let mut request = self
                .client
                .request(method.clone(), &url)
                .header("Authorization", format!("Bearer {}", self.config.secret_key))
                .header("Content-Type", "application/json");
            if let Some(body) = body {
                request = request.json(body);
            }

            let result = request.send().await;
            match result {
                Ok(response) => {
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();

                    if status.is_success() {
                        let parsed: PaystackResponse<T> =
                            serde_json::from_str(&text).map_err(|e| AppError::Provider {
                                provider: PROVIDER_NAME,
                                message: format!("invalid response format: {e}"),
                            })?;
                        if parsed.status {
                            return Ok(parsed.data);
                        }
                        return Err(AppError::Provider {
                            provider: PROVIDER_NAME,
                            message: parsed.message,
                        });
                    }

                    let retryable = status.as_u16() == 429 || status.is_server_error();
                    if retryable && attempt < retries {
                        let backoff = 2_u64.pow(attempt);
                        warn!(%status, "Paystack request failed, retrying in {backoff}s");
                        tokio::time::sleep(Duration::from_secs(backoff)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(AppError::Provider {
                        provider: PROVIDER_NAME,
                        message: format!("HTTP {status}: {text}"),
                    });
                }
                Err(e) if attempt < retries => {
                    let backoff = 2_u64.pow(attempt);
                    warn!("Paystack request error, retrying in {backoff}s: {e}");
                    tokio::time::sleep(Duration::from_secs(backoff)).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(AppError::Provider {
                        provider: PROVIDER_NAME,
                        message: format!("request failed: {e}"),
                    })
                }
            }
        }
    }

    /// Validate the HMAC-SHA512 webhook signature using a constant-time
    /// comparison.
    pub fn validate_webhook_signature(&self, payload: &[u8], signature: &str) -> bool {
        use hmac::{Hmac, Mac};
        use sha2::Sha512;

        type HmacSha512 = Hmac<Sha512>;

        let mut mac = match HmacSha512::new_from_slice(self.config.secret_key.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => return false,
        };
        mac.update(payload);
        let computed = hex::encode(mac.finalize().into_bytes());
        let provided = signature.trim();

        if computed.len() != provided.len() {
            return false;
        }
        computed
            .as_bytes()
            .iter()
            .zip(provided.as_bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

/// Map Paystack's status vocabulary into ours. `reversed` (refunds) and
/// anything unknown fail the poll rather than guess a terminal state.
pub fn map_verify_status(status: &str, gateway_response: Option<&str>) -> AppResult<ProviderStatus> {
    match status {
        "success" => Ok(ProviderStatus::Completed),
        "failed" => Ok(ProviderStatus::Failed {
            reason: gateway_response.map(str::to_string),
        }),
        "abandoned" | "ongoing" | "pending" | "queued" | "processing" | "send_otp"
        | "pay_offline" => Ok(ProviderStatus::Processing),
        other => Err(AppError::TransientPoll(format!(
            "unmapped checkout status {other:?}"
        ))),
    }
}

/// Amount in the provider's smallest currency unit.
fn to_subunits(amount: Decimal) -> AppResult<i64> {
    (amount * Decimal::from(100))
        .round()
        .to_i64()
        .ok_or_else(|| AppError::validation("amount out of range"))
}

#[async_trait]
impl PaymentProvider for PaystackProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn initiate(&self, details: &InitiationDetails) -> AppResult<ProviderHandoff> {
        info!(
            transaction_id = %details.transaction_id,
            amount = %details.amount,
            "initializing hosted checkout"
        );

        let mut payload = serde_json::json!({
            "email": details.customer_identifier,
            "amount": to_subunits(details.amount)?,
            "metadata": { "transaction_id": details.transaction_id },
        });
        if let Some(callback_url) = &self.config.callback_url {
            payload["callback_url"] = serde_json::Value::String(callback_url.clone());
        }

        let response: InitializeData = self
            .make_request(
                reqwest::Method::POST,
                "/transaction/initialize",
                Some(&payload),
                self.config.max_retries,
            )
            .await?;

        info!(reference = %response.reference, "checkout session created");

        Ok(ProviderHandoff {
            external_reference: response.reference,
            checkout_url: Some(response.authorization_url),
        })
    }

    async fn query_status(&self, reference: &str) -> AppResult<ProviderStatus> {
        let response: VerifyData = self
            .make_request(
                reqwest::Method::GET,
                &format!("/transaction/verify/{reference}"),
                None,
                0,
            )
            .await
            .map_err(|e| AppError::TransientPoll(e.to_string()))?;

        map_verify_status(&response.status, response.gateway_response.as_deref())
    }
}

// Paystack wraps every payload in a status/message/data envelope.
#[derive(Debug, Deserialize)]
struct PaystackResponse<T> {
    status: bool,
    message: String,
    data: T,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    authorization_url: String,
    reference: String,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    status: String,
    #[serde(default)]
    gateway_response: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn test_provider() -> PaystackProvider {
        PaystackProvider::new(PaystackConfig {
            secret_key: "sk_test_key".to_string(),
            ..PaystackConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn invalid_signature_is_rejected() {
        let provider = test_provider();
        assert!(!provider.validate_webhook_signature(b"payload", "not-a-signature"));
    }

    #[test]
    fn signature_roundtrip_is_accepted() {
        use hmac::{Hmac, Mac};
        use sha2::Sha512;

        let provider = test_provider();
        let payload = br#"{"event":"charge.success"}"#;
        let mut mac = Hmac::<Sha512>::new_from_slice(b"sk_test_key").unwrap();
        mac.update(payload);
        let signature = hex::encode(mac.finalize().into_bytes());

        assert!(provider.validate_webhook_signature(payload, &signature));
    }

    #[test]
    fn verify_status_mapping() {
        assert_eq!(
            map_verify_status("success", None).unwrap(),
            ProviderStatus::Completed
        );
        assert_eq!(
            map_verify_status("abandoned", None).unwrap(),
            ProviderStatus::Processing
        );
        assert!(map_verify_status("reversed", None).unwrap_err().is_transient());
    }

    #[test]
    fn subunit_conversion_rounds_cents() {
        assert_eq!(to_subunits(dec!(1000)).unwrap(), 100_000);
        assert_eq!(to_subunits(dec!(12.345)).unwrap(), 1234);
    }

    #[test]
    fn config_default_points_at_production_api() {
        let config = PaystackConfig::default();
        assert_eq!(config.base_url, "https://api.paystack.co");
        assert_eq!(config.max_retries, 3);
    }
}
