//! TossPayments recurring-billing client.
//!
//! Implements billing key issuance, billing key charges and billing key
//! deletion, plus webhook signature verification.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use service_core::observability::TracedClientExt;
use service_core::utils::signature::verify_payload;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::config::TossPaymentsConfig;
use crate::services::metrics::record_provider_call;

/// Failure talking to the billing provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{code} - {message} (HTTP {status})")]
    Api {
        status: StatusCode,
        code: String,
        message: String,
    },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Credential returned by billing key issuance.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedBillingKey {
    pub billing_key: String,
    pub customer_key: String,
}

/// A charge against a stored billing key.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeRequest {
    pub customer_key: String,
    pub amount: i64,
    pub order_id: String,
    pub order_name: String,
}

/// Approved charge.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeApproval {
    pub payment_key: String,
    /// Provider approval time; absent on some non-card methods.
    pub approved_at: Option<DateTime<Utc>>,
}

/// Logical operations of the recurring-billing provider.
#[async_trait]
pub trait BillingProvider: Send + Sync {
    async fn issue_billing_key(
        &self,
        auth_key: &str,
        customer_key: &str,
    ) -> Result<IssuedBillingKey, ProviderError>;

    async fn charge(
        &self,
        billing_key: &str,
        request: &ChargeRequest,
    ) -> Result<ChargeApproval, ProviderError>;

    async fn delete_billing_key(&self, billing_key: &str) -> Result<(), ProviderError>;

    /// Check a webhook signature against the raw request body.
    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> bool;
}

#[derive(Debug, Deserialize)]
struct TossErrorBody {
    code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IssueBillingKeyRequest<'a> {
    auth_key: &'a str,
    customer_key: &'a str,
}

/// TossPayments client for interacting with the billing API.
#[derive(Clone)]
pub struct TossPaymentsClient {
    client: Client,
    config: TossPaymentsConfig,
}

impl TossPaymentsClient {
    pub fn new(config: TossPaymentsConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self { client, config })
    }

    /// Check if credentials are set.
    pub fn is_configured(&self) -> bool {
        !self.config.secret_key.expose_secret().is_empty()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base_url.trim_end_matches('/'), path)
    }

    async fn read_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ProviderError> {
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            return serde_json::from_str(&body).map_err(|e| ProviderError::Decode(e.to_string()));
        }

        Err(Self::api_error(status, &body))
    }

    fn api_error(status: StatusCode, body: &str) -> ProviderError {
        let parsed: Option<TossErrorBody> = serde_json::from_str(body).ok();
        let (code, message) = match parsed {
            Some(err) => (
                err.code.unwrap_or_else(|| "UNKNOWN".to_string()),
                err.message.unwrap_or_else(|| body.to_string()),
            ),
            None => ("UNKNOWN".to_string(), body.to_string()),
        };

        tracing::error!(
            status = %status,
            code = %code,
            message = %message,
            "TossPayments request failed"
        );

        ProviderError::Api {
            status,
            code,
            message,
        }
    }
}

fn outcome<T>(result: &Result<T, ProviderError>) -> &'static str {
    if result.is_ok() {
        "success"
    } else {
        "failure"
    }
}

#[async_trait]
impl BillingProvider for TossPaymentsClient {
    #[tracing::instrument(skip(self, auth_key), fields(customer_key = %customer_key))]
    async fn issue_billing_key(
        &self,
        auth_key: &str,
        customer_key: &str,
    ) -> Result<IssuedBillingKey, ProviderError> {
        let start = Instant::now();

        let result: Result<IssuedBillingKey, ProviderError> = async {
            let response = self
                .client
                .traced_post(&self.url("/billing/authorizations/issue"))
                .basic_auth(self.config.secret_key.expose_secret(), None::<&str>)
                .json(&IssueBillingKeyRequest {
                    auth_key,
                    customer_key,
                })
                .send()
                .await?;

            Self::read_response::<IssuedBillingKey>(response).await
        }
        .await;

        record_provider_call(
            "issue_billing_key",
            outcome(&result),
            start.elapsed().as_secs_f64(),
        );

        if result.is_ok() {
            tracing::info!("Billing key issued");
        }
        result
    }

    #[tracing::instrument(
        skip(self, billing_key, request),
        fields(order_id = %request.order_id, amount = request.amount)
    )]
    async fn charge(
        &self,
        billing_key: &str,
        request: &ChargeRequest,
    ) -> Result<ChargeApproval, ProviderError> {
        let start = Instant::now();

        let result: Result<ChargeApproval, ProviderError> = async {
            let response = self
                .client
                .traced_post(&self.url(&format!("/billing/{}", billing_key)))
                .basic_auth(self.config.secret_key.expose_secret(), None::<&str>)
                // Provider-side dedup key for this order.
                .header("Idempotency-Key", &request.order_id)
                .json(request)
                .send()
                .await?;

            Self::read_response::<ChargeApproval>(response).await
        }
        .await;

        record_provider_call("charge", outcome(&result), start.elapsed().as_secs_f64());

        if let Ok(approval) = &result {
            tracing::info!(payment_key = %approval.payment_key, "Billing charge approved");
        }
        result
    }

    #[tracing::instrument(skip(self, billing_key))]
    async fn delete_billing_key(&self, billing_key: &str) -> Result<(), ProviderError> {
        let start = Instant::now();

        let result: Result<(), ProviderError> = async {
            let response = self
                .client
                .traced_delete(&self.url(&format!("/billing/authorizations/{}", billing_key)))
                .basic_auth(self.config.secret_key.expose_secret(), None::<&str>)
                .send()
                .await?;

            let status = response.status();
            if status.is_success() {
                return Ok(());
            }
            let body = response.text().await?;
            Err(Self::api_error(status, &body))
        }
        .await;

        record_provider_call(
            "delete_billing_key",
            outcome(&result),
            start.elapsed().as_secs_f64(),
        );
        result
    }

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> bool {
        match verify_payload(self.config.webhook_secret.expose_secret(), payload, signature) {
            Ok(valid) => {
                if !valid {
                    tracing::warn!("Webhook signature verification failed");
                }
                valid
            }
            Err(e) => {
                tracing::error!(error = %e, "Webhook signature verification error");
                false
            }
        }
    }
}
