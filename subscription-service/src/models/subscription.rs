//! Subscription model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use uuid::Uuid;

/// A stored enum column held a value this service does not know.
#[derive(Debug, Error)]
#[error("unknown {kind} value '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Plan level of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionTier {
    Free,
    Pro,
}

impl SubscriptionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Free => "free",
            SubscriptionTier::Pro => "pro",
        }
    }

    pub fn from_string(s: &str) -> Result<Self, UnknownVariant> {
        match s {
            "free" => Ok(SubscriptionTier::Free),
            "pro" => Ok(SubscriptionTier::Pro),
            other => Err(UnknownVariant {
                kind: "subscription tier",
                value: other.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for SubscriptionTier {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_string(&value)
    }
}

/// Stored subscription status.
///
/// `Expired` is normally derived at read time (see [`Subscription::effective_status`])
/// rather than written by this service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Canceled,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Expired => "expired",
        }
    }

    pub fn from_string(s: &str) -> Result<Self, UnknownVariant> {
        match s {
            "active" => Ok(SubscriptionStatus::Active),
            "canceled" => Ok(SubscriptionStatus::Canceled),
            "expired" => Ok(SubscriptionStatus::Expired),
            other => Err(UnknownVariant {
                kind: "subscription status",
                value: other.to_string(),
            }),
        }
    }

    /// Statuses that make a row the user's current subscription.
    pub fn is_live(&self) -> bool {
        match self {
            SubscriptionStatus::Active | SubscriptionStatus::Canceled => true,
            SubscriptionStatus::Expired => false,
        }
    }
}

impl TryFrom<String> for SubscriptionStatus {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_string(&value)
    }
}

/// Subscription row. Only paid subscriptions are ever materialised.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    #[sqlx(try_from = "String")]
    pub plan: SubscriptionTier,
    #[sqlx(try_from = "String")]
    pub status: SubscriptionStatus,
    #[serde(skip_serializing)]
    pub billing_key: String,
    pub customer_key: String,
    pub started_at: DateTime<Utc>,
    /// Also the benefit expiry once the subscription is canceled.
    pub next_billing_date: DateTime<Utc>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Status as observed at `now`: a canceled row whose benefit period has
    /// ended reads as expired.
    pub fn effective_status(&self, now: DateTime<Utc>) -> SubscriptionStatus {
        match self.status {
            SubscriptionStatus::Canceled if self.next_billing_date <= now => {
                SubscriptionStatus::Expired
            }
            status => status,
        }
    }
}

/// Input for creating a subscription.
#[derive(Debug, Clone)]
pub struct CreateSubscription {
    pub user_id: Uuid,
    pub plan: SubscriptionTier,
    pub billing_key: String,
    pub customer_key: String,
    pub started_at: DateTime<Utc>,
    pub next_billing_date: DateTime<Utc>,
}
