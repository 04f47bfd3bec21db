//! Provider webhook endpoint.

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use serde_json::{json, Value};
use service_core::error::AppError;

use crate::services::SubscriptionError;
use crate::startup::AppState;

pub const SIGNATURE_HEADER: &str = "X-Toss-Signature";

/// Verify the signature over the raw body, then reconcile. Every accepted
/// delivery is answered with 200 so the provider stops retrying.
pub async fn toss_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !state.provider.verify_webhook_signature(&body, signature) {
        return Err(SubscriptionError::InvalidSignature.into());
    }

    let outcome = state.webhooks.dispatch(&body).await?;

    Ok(Json(json!({
        "received": true,
        "outcome": outcome.as_str()
    })))
}
