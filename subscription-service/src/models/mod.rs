//! Domain models for subscription-service.

mod payment;
mod subscription;
mod usage;

pub use payment::{CreatePaymentHistory, PaymentHistory, PaymentStatus};
pub use subscription::{
    CreateSubscription, Subscription, SubscriptionStatus, SubscriptionTier, UnknownVariant,
};
pub use usage::UsageInfo;
