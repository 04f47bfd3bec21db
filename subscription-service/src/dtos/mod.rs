//! Request and response bodies for the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{
    PaymentHistory, Subscription, SubscriptionStatus, SubscriptionTier, UsageInfo,
};

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_PAGE_LIMIT: u32 = 10;

#[derive(Debug, Deserialize, Validate)]
pub struct SubscribeRequest {
    #[serde(alias = "authKey")]
    #[validate(length(min = 1, message = "auth_key is required"))]
    pub auth_key: String,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct CancelRequest {
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PaymentHistoryQuery {
    #[validate(range(min = 1))]
    pub page: Option<u32>,
    #[validate(range(min = 1, max = 100))]
    pub limit: Option<u32>,
}

/// Query string of the provider redirect after card authentication.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingSuccessQuery {
    pub auth_key: Option<String>,
    pub customer_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BillingFailQuery {
    pub code: Option<String>,
    pub message: Option<String>,
}

/// Subscription plus its status as observed now.
#[derive(Debug, Serialize)]
pub struct SubscriptionView {
    #[serde(flatten)]
    pub subscription: Subscription,
    pub effective_status: SubscriptionStatus,
}

impl SubscriptionView {
    pub fn new(subscription: Subscription, now: DateTime<Utc>) -> Self {
        let effective_status = subscription.effective_status(now);
        Self {
            subscription,
            effective_status,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    pub subscription: Option<SubscriptionView>,
}

#[derive(Debug, Serialize)]
pub struct SubscribeResponse {
    pub message: String,
    pub subscription: SubscriptionView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment: Option<PaymentHistory>,
}

/// Response of cancel and resume.
#[derive(Debug, Serialize)]
pub struct LifecycleResponse {
    pub status: SubscriptionStatus,
    pub next_billing_date: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct UsageResponse {
    #[serde(flatten)]
    pub usage: UsageInfo,
    pub can_analyze: bool,
}

#[derive(Debug, Serialize)]
pub struct AdmissionResponse {
    pub subscription_tier: SubscriptionTier,
    pub model: String,
    pub remaining: i64,
}

#[derive(Debug, Serialize)]
pub struct PaymentHistoriesResponse {
    pub items: Vec<PaymentHistory>,
    pub page: u32,
    pub limit: u32,
}
