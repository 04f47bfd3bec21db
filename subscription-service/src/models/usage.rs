//! Usage snapshot model.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::SubscriptionTier;

/// Derived usage for the current accounting window. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageInfo {
    pub subscription_tier: SubscriptionTier,
    pub used: i64,
    pub limit: i64,
    pub remaining: i64,
    /// Absent for the free tier, whose window never resets.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_reset_date: Option<DateTime<Utc>>,
}

impl UsageInfo {
    pub fn new(
        subscription_tier: SubscriptionTier,
        used: i64,
        limit: i64,
        next_reset_date: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            subscription_tier,
            used,
            limit,
            remaining: (limit - used).max(0),
            next_reset_date,
        }
    }
}
