//! Subscription lifecycle endpoints.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use validator::Validate;

use crate::dtos::{
    CancelRequest, LifecycleResponse, PaymentHistoriesResponse, PaymentHistoryQuery,
    SubscribeRequest, SubscribeResponse, SubscriptionResponse, SubscriptionView, DEFAULT_PAGE,
    DEFAULT_PAGE_LIMIT,
};
use crate::middleware::UserContext;
use crate::startup::AppState;

/// Current subscription of the caller, or `null`.
pub async fn get_subscription(
    State(state): State<AppState>,
    user: UserContext,
) -> Result<Json<SubscriptionResponse>, AppError> {
    let subscription = state
        .orchestrator
        .current_subscription(user.user_id)
        .await?
        .map(|s| SubscriptionView::new(s, state.orchestrator.now()));

    Ok(Json(SubscriptionResponse { subscription }))
}

/// Subscribe with an auth key from the provider's card widget.
pub async fn subscribe(
    State(state): State<AppState>,
    user: UserContext,
    Json(payload): Json<SubscribeRequest>,
) -> Result<(StatusCode, Json<SubscribeResponse>), AppError> {
    payload.validate()?;

    let outcome = state
        .orchestrator
        .subscribe(user.user_id, &payload.auth_key)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SubscribeResponse {
            message: "Pro subscription started".to_string(),
            subscription: SubscriptionView::new(outcome.subscription, state.orchestrator.now()),
            payment: outcome.payment,
        }),
    ))
}

pub async fn cancel_subscription(
    State(state): State<AppState>,
    user: UserContext,
    payload: Option<Json<CancelRequest>>,
) -> Result<Json<LifecycleResponse>, AppError> {
    let payload = payload.map(|Json(p)| p).unwrap_or_default();
    payload.validate()?;

    let subscription = state
        .orchestrator
        .cancel(user.user_id, payload.reason.as_deref())
        .await?;

    Ok(Json(LifecycleResponse {
        status: subscription.status,
        next_billing_date: subscription.next_billing_date,
        message: "Subscription canceled; benefits remain until the next billing date".to_string(),
    }))
}

pub async fn resume_subscription(
    State(state): State<AppState>,
    user: UserContext,
) -> Result<Json<LifecycleResponse>, AppError> {
    let subscription = state.orchestrator.resume(user.user_id).await?;

    Ok(Json(LifecycleResponse {
        status: subscription.status,
        next_billing_date: subscription.next_billing_date,
        message: "Subscription resumed".to_string(),
    }))
}

pub async fn list_payment_histories(
    State(state): State<AppState>,
    user: UserContext,
    Query(query): Query<PaymentHistoryQuery>,
) -> Result<Json<PaymentHistoriesResponse>, AppError> {
    query.validate()?;

    let page = query.page.unwrap_or(DEFAULT_PAGE);
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_LIMIT);

    let items = state
        .orchestrator
        .payment_histories(user.user_id, page, limit)
        .await?;

    Ok(Json(PaymentHistoriesResponse { items, page, limit }))
}
