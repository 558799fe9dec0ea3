//! Push-confirmation provider adapter (Daraja-style STK push).
//!
//! Initiation fires an approval prompt to the customer's phone and returns a
//! checkout request id we keep as the external reference. The outcome is
//! unknown until the status query (or the provider callback) reports it.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::payments::traits::PaymentProvider;
use crate::payments::types::{InitiationDetails, ProviderHandoff, ProviderStatus};

const PROVIDER_NAME: &str = "Daraja";

/// Result codes the status query and callback use. Anything outside this set
/// is treated as a transient poll failure, never as a terminal outcome.
const RESULT_SUCCESS: &str = "0";
const RESULT_INSUFFICIENT_FUNDS: &str = "1";
const RESULT_USER_CANCELLED: &str = "1032";
const RESULT_TIMEOUT: &str = "1037";
const RESULT_INVALID_INITIATOR: &str = "2001";

/// Request-level error code meaning the push is still in flight.
const ERROR_STILL_PROCESSING: &str = "500.001.1001";

#[derive(Debug, Clone)]
pub struct DarajaConfig {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub shortcode: String,
    pub passkey: String,
    pub callback_url: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl DarajaConfig {
    pub fn from_env() -> AppResult<Self> {
        let require = |name: &'static str| {
            std::env::var(name).map_err(|_| {
                AppError::validation(format!("{name} environment variable is required"))
            })
        };

        Ok(Self {
            consumer_key: require("DARAJA_CONSUMER_KEY")?,
            consumer_secret: require("DARAJA_CONSUMER_SECRET")?,
            shortcode: require("DARAJA_SHORTCODE")?,
            passkey: require("DARAJA_PASSKEY")?,
            callback_url: require("DARAJA_CALLBACK_URL")?,
            base_url: std::env::var("DARAJA_BASE_URL")
                .unwrap_or_else(|_| "https://sandbox.safaricom.co.ke".to_string()),
            timeout_secs: std::env::var("DARAJA_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
            max_retries: std::env::var("DARAJA_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
        })
    }
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct DarajaProvider {
    config: DarajaConfig,
    client: Client,
    token: RwLock<Option<CachedToken>>,
}

impl DarajaProvider {
    pub fn new(config: DarajaConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Provider {
                provider: PROVIDER_NAME,
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            config,
            client,
            token: RwLock::new(None),
        })
    }

    pub fn from_env() -> AppResult<Self> {
        Self::new(DarajaConfig::from_env()?)
    }

    /// OAuth client-credentials token, cached until shortly before expiry.
    async fn access_token(&self) -> AppResult<String> {
        if let Some(cached) = self.token.read().await.as_ref() {
            if cached.expires_at > Instant::now() {
                return Ok(cached.value.clone());
            }
        }

        let credentials = BASE64.encode(format!(
            "{}:{}",
            self.config.consumer_key, self.config.consumer_secret
        ));
        let url = format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            self.config.base_url
        );

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Basic {credentials}"))
            .send()
            .await
            .map_err(|e| AppError::Provider {
                provider: PROVIDER_NAME,
                message: format!("token request failed: {e}"),
            })?;

        if !response.status().is_success() {
            return Err(AppError::Provider {
                provider: PROVIDER_NAME,
                message: format!("token request returned HTTP {}", response.status()),
            });
        }

        let body: TokenResponse = response.json().await.map_err(|e| AppError::Provider {
            provider: PROVIDER_NAME,
            message: format!("malformed token response: {e}"),
        })?;

        let ttl = body.expires_in.parse::<u64>().unwrap_or(3600);
        *self.token.write().await = Some(CachedToken {
            value: body.access_token.clone(),
            // Refresh a little early rather than race the expiry.
            expires_at: Instant::now() + Duration::from_secs(ttl.saturating_sub(100)),
        });

        Ok(body.access_token)
    }

    /// Shortcode password for STK endpoints: base64(shortcode|passkey|ts).
    fn password(&self, timestamp: &str) -> String {
        BASE64.encode(format!(
            "{}{}{}",
            self.config.shortcode, self.config.passkey, timestamp
        ))
    }

    async fn post_json<T>(&self, endpoint: &str, payload: &serde_json::Value) -> AppResult<(reqwest::StatusCode, T)>
    where
        T: for<'de> Deserialize<'de>,
    {
        let token = self.access_token().await?;
        let url = format!("{}{}", self.config.base_url, endpoint);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {token}"))
            .json(payload)
            .send()
            .await
            .map_err(|e| AppError::Provider {
                provider: PROVIDER_NAME,
                message: format!("request to {endpoint} failed: {e}"),
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let parsed = serde_json::from_str::<T>(&body).map_err(|e| AppError::Provider {
            provider: PROVIDER_NAME,
            message: format!("malformed response from {endpoint}: {e}"),
        })?;
        Ok((status, parsed))
    }
}

#[async_trait]
impl PaymentProvider for DarajaProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn initiate(&self, details: &InitiationDetails) -> AppResult<ProviderHandoff> {
        info!(
            transaction_id = %details.transaction_id,
            amount = %details.amount,
            "initiating STK push"
        );

        let timestamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let payload = serde_json::json!({
            "BusinessShortCode": self.config.shortcode,
            "Password": self.password(&timestamp),
            "Timestamp": timestamp,
            "TransactionType": "CustomerPayBillOnline",
            "Amount": details.amount.round().to_string(),
            "PartyA": details.customer_identifier,
            "PartyB": self.config.shortcode,
            "PhoneNumber": details.customer_identifier,
            "CallBackURL": self.config.callback_url,
            "AccountReference": format!("TXN{}", details.transaction_id),
            "TransactionDesc": "Payment for service",
        });

        // The push either lands or it does not; transient outbound failures
        // are retried here because nothing has been persisted yet.
        let mut last_err = None;
        for attempt in 0..=self.config.max_retries {
            match self
                .post_json::<StkPushResponse>("/mpesa/stkpush/v1/processrequest", &payload)
                .await
            {
                Ok((http_status, body)) => {
                    if http_status.is_success() && body.response_code.as_deref() == Some("0") {
                        let reference = body.checkout_request_id.ok_or_else(|| {
                            AppError::Provider {
                                provider: PROVIDER_NAME,
                                message: "accepted push missing CheckoutRequestID".to_string(),
                            }
                        })?;
                        info!(reference = %reference, "STK push accepted");
                        return Ok(ProviderHandoff {
                            external_reference: reference,
                            checkout_url: None,
                        });
                    }
                    return Err(AppError::Provider {
                        provider: PROVIDER_NAME,
                        message: body
                            .error_message
                            .unwrap_or_else(|| format!("push rejected with HTTP {http_status}")),
                    });
                }
                Err(e) if attempt < self.config.max_retries => {
                    let backoff = 2_u64.pow(attempt);
                    warn!(
                        attempt = attempt + 1,
                        "STK push attempt failed, retrying in {backoff}s: {e}"
                    );
                    tokio::time::sleep(Duration::from_secs(backoff)).await;
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| AppError::Provider {
            provider: PROVIDER_NAME,
            message: "push initiation exhausted retries".to_string(),
        }))
    }

    async fn query_status(&self, reference: &str) -> AppResult<ProviderStatus> {
        let timestamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let payload = serde_json::json!({
            "BusinessShortCode": self.config.shortcode,
            "Password": self.password(&timestamp),
            "Timestamp": timestamp,
            "CheckoutRequestID": reference,
        });

        let (http_status, body) = self
            .post_json::<StkQueryResponse>("/mpesa/stkpushquery/v1/query", &payload)
            .await
            .map_err(|e| AppError::TransientPoll(e.to_string()))?;

        if http_status.is_success() {
            if let Some(code) = body.result_code.as_deref() {
                return map_result_code(code, body.result_desc.as_deref());
            }
        }

        // While the customer has not acted yet the API answers the query with
        // a request-level error rather than a result code.
        if body.error_code.as_deref() == Some(ERROR_STILL_PROCESSING) {
            return Ok(ProviderStatus::Processing);
        }

        Err(AppError::TransientPoll(format!(
            "status query for {reference} returned HTTP {http_status} ({})",
            body.error_message.as_deref().unwrap_or("no detail")
        )))
    }
}

/// Map a Daraja result code into the shared vocabulary. Unknown codes fail
/// the poll conservatively instead of guessing a terminal state.
pub fn map_result_code(code: &str, description: Option<&str>) -> AppResult<ProviderStatus> {
    match code {
        RESULT_SUCCESS => Ok(ProviderStatus::Completed),
        RESULT_USER_CANCELLED => Ok(ProviderStatus::Cancelled),
        RESULT_INSUFFICIENT_FUNDS | RESULT_TIMEOUT | RESULT_INVALID_INITIATOR => {
            Ok(ProviderStatus::Failed {
                reason: description.map(str::to_string),
            })
        }
        other => Err(AppError::TransientPoll(format!(
            "unmapped result code {other}"
        ))),
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: String,
}

#[derive(Debug, Deserialize)]
struct StkPushResponse {
    #[serde(rename = "ResponseCode")]
    response_code: Option<String>,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: Option<String>,
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StkQueryResponse {
    #[serde(rename = "ResultCode")]
    result_code: Option<String>,
    #[serde(rename = "ResultDesc")]
    result_desc: Option<String>,
    #[serde(rename = "errorCode")]
    error_code: Option<String>,
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_code_maps_to_completed() {
        assert_eq!(
            map_result_code("0", None).unwrap(),
            ProviderStatus::Completed
        );
    }

    #[test]
    fn cancellation_code_maps_to_cancelled() {
        assert_eq!(
            map_result_code("1032", Some("Request cancelled by user")).unwrap(),
            ProviderStatus::Cancelled
        );
    }

    #[test]
    fn failure_codes_keep_the_description() {
        let status = map_result_code("1", Some("The balance is insufficient")).unwrap();
        assert_eq!(
            status,
            ProviderStatus::Failed {
                reason: Some("The balance is insufficient".to_string())
            }
        );
    }

    #[test]
    fn unmapped_codes_fail_the_poll() {
        let err = map_result_code("9999", None).unwrap_err();
        assert!(err.is_transient());
    }
}
