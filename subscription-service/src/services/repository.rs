//! Typed persistence seams.
//!
//! Each entity gets its own trait so the lifecycle and usage logic never
//! depends on a concrete store. [`super::Database`] implements all of them
//! against PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    CreatePaymentHistory, CreateSubscription, PaymentHistory, Subscription, SubscriptionStatus,
    SubscriptionTier,
};
use crate::services::error::SubscriptionError;

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Tier of the user, or `None` if the user does not exist.
    async fn get_tier(&self, user_id: Uuid) -> Result<Option<SubscriptionTier>, SubscriptionError>;

    async fn set_tier(&self, user_id: Uuid, tier: SubscriptionTier)
        -> Result<(), SubscriptionError>;
}

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// The user's row with status active or canceled, if any.
    async fn get_current(&self, user_id: Uuid) -> Result<Option<Subscription>, SubscriptionError>;

    async fn create(&self, input: &CreateSubscription) -> Result<Subscription, SubscriptionError>;

    /// Single-row write; last write wins.
    async fn update_status(
        &self,
        subscription_id: Uuid,
        status: SubscriptionStatus,
        canceled_at: Option<DateTime<Utc>>,
    ) -> Result<Subscription, SubscriptionError>;

    /// The single user whose subscription customer key starts with `prefix`.
    /// `None` when no user or more than one user matches.
    async fn find_user_by_customer_key_prefix(
        &self,
        prefix: &str,
    ) -> Result<Option<Uuid>, SubscriptionError>;
}

#[async_trait]
pub trait PaymentHistoryRepository: Send + Sync {
    async fn exists_by_order_id(&self, order_id: &str) -> Result<bool, SubscriptionError>;

    /// Insert a row. Returns `None` when a row with the same order id already
    /// exists, so concurrent duplicate deliveries never create two rows.
    async fn insert(
        &self,
        input: &CreatePaymentHistory,
    ) -> Result<Option<PaymentHistory>, SubscriptionError>;

    /// Newest `paid_at` first. `page` is 1-based.
    async fn list_by_user(
        &self,
        user_id: Uuid,
        page: u32,
        limit: u32,
    ) -> Result<Vec<PaymentHistory>, SubscriptionError>;
}

/// Read-only view over the analysis records written by the analysis flow.
#[async_trait]
pub trait AnalysisUsageCounter: Send + Sync {
    async fn count_all(&self, user_id: Uuid) -> Result<i64, SubscriptionError>;

    /// Count of analyses created in `[from, until)`.
    async fn count_between(
        &self,
        user_id: Uuid,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<i64, SubscriptionError>;
}

/// Liveness check of the backing store.
#[async_trait]
pub trait StoreHealth: Send + Sync {
    async fn ping(&self) -> Result<(), SubscriptionError>;
}
