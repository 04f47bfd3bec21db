//! Usage and quota endpoints.

use axum::{extract::State, Json};
use service_core::error::AppError;

use crate::dtos::{AdmissionResponse, UsageResponse};
use crate::middleware::UserContext;
use crate::services::may_consume;
use crate::startup::AppState;

pub async fn get_usage(
    State(state): State<AppState>,
    user: UserContext,
) -> Result<Json<UsageResponse>, AppError> {
    let usage = state.usage.compute_usage(user.user_id).await?;
    let can_analyze = may_consume(&usage);

    Ok(Json(UsageResponse { usage, can_analyze }))
}

/// Called by the analysis flow right before invoking the AI provider.
/// Usage is recomputed on every call.
pub async fn admit_analysis(
    State(state): State<AppState>,
    user: UserContext,
) -> Result<Json<AdmissionResponse>, AppError> {
    let usage = state.usage.compute_usage(user.user_id).await?;
    let admission = state.quota.admit(&usage)?;

    Ok(Json(AdmissionResponse {
        subscription_tier: admission.tier,
        model: admission.model,
        remaining: usage.remaining,
    }))
}
