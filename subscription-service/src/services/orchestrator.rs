//! Billing orchestrator: subscribe, cancel and resume.
//!
//! Subscribe is a strictly ordered sequence of single-row writes and provider
//! calls with no surrounding transaction:
//!
//! 1. reject if an active subscription exists
//! 2. issue a billing key
//! 3. charge the plan price
//! 4. flip the user to the pro tier
//! 5. insert the subscription row
//! 6. insert the payment history row
//!
//! If any step after 2 fails, the freshly issued billing key is deleted so the
//! provider never keeps a recurring credential for a subscription that does
//! not exist locally. Deletion failures are logged and swallowed.

use chrono::{DateTime, Months, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;
use uuid::Uuid;

use crate::config::PlanConfig;
use crate::models::{
    CreatePaymentHistory, CreateSubscription, PaymentHistory, PaymentStatus, Subscription,
    SubscriptionStatus, SubscriptionTier,
};
use crate::services::clock::Clock;
use crate::services::error::SubscriptionError;
use crate::services::metrics::{record_compensation, record_subscription_operation};
use crate::services::repository::{
    PaymentHistoryRepository, SubscriptionRepository, UserRepository,
};
use crate::services::tosspayments::{BillingProvider, ChargeRequest, ProviderError};

/// Unique per attempt: `order_{unix_millis}_{user id prefix}_{random hex}`.
pub fn generate_order_id(user_id: Uuid, now: DateTime<Utc>) -> String {
    let simple = user_id.simple().to_string();
    let suffix: u32 = rand::random::<u32>() & 0x00ff_ffff;
    format!(
        "order_{}_{}_{:06x}",
        now.timestamp_millis(),
        &simple[..8],
        suffix
    )
}

/// One month after `from`, clamped to the end of shorter months.
pub fn next_billing_date(from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    from.checked_add_months(Months::new(1))
}

/// Result of a successful subscribe.
#[derive(Debug, Clone)]
pub struct SubscribeOutcome {
    pub subscription: Subscription,
    /// `None` when the provider webhook recorded the same order first.
    pub payment: Option<PaymentHistory>,
}

#[derive(Clone)]
pub struct BillingOrchestrator {
    users: Arc<dyn UserRepository>,
    subscriptions: Arc<dyn SubscriptionRepository>,
    payments: Arc<dyn PaymentHistoryRepository>,
    provider: Arc<dyn BillingProvider>,
    clock: Arc<dyn Clock>,
    plan: PlanConfig,
    provider_timeout: Duration,
}

impl BillingOrchestrator {
    pub fn new(
        users: Arc<dyn UserRepository>,
        subscriptions: Arc<dyn SubscriptionRepository>,
        payments: Arc<dyn PaymentHistoryRepository>,
        provider: Arc<dyn BillingProvider>,
        clock: Arc<dyn Clock>,
        plan: PlanConfig,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            users,
            subscriptions,
            payments,
            provider,
            clock,
            plan,
            provider_timeout,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Bound a provider call by the configured timeout; elapsed time is a failure.
    async fn call_provider<T>(
        &self,
        call: impl Future<Output = Result<T, ProviderError>>,
    ) -> Result<T, ProviderError> {
        match tokio::time::timeout(self.provider_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(self.provider_timeout)),
        }
    }

    /// Best-effort deletion of a billing key whose subscription never materialised.
    async fn compensate(&self, billing_key: &str, failed_step: &'static str) {
        match self
            .call_provider(self.provider.delete_billing_key(billing_key))
            .await
        {
            Ok(()) => {
                tracing::info!(failed_step, "Billing key deleted after failed subscribe");
                record_compensation(failed_step, "deleted");
            }
            Err(e) => {
                tracing::error!(
                    failed_step,
                    error = %e,
                    "Failed to delete billing key after failed subscribe"
                );
                record_compensation(failed_step, "delete_failed");
            }
        }
    }

    /// Provision a pro subscription from a card-authentication key.
    ///
    /// A canceled subscription that has not yet expired does not block this
    /// call; only an active one does.
    #[instrument(skip(self, auth_key), fields(user_id = %user_id))]
    pub async fn subscribe(
        &self,
        user_id: Uuid,
        auth_key: &str,
    ) -> Result<SubscribeOutcome, SubscriptionError> {
        let result = self.subscribe_steps(user_id, auth_key).await;
        match &result {
            Ok(_) => record_subscription_operation("subscribe", "success"),
            Err(e) => record_subscription_operation("subscribe", e.code()),
        }
        result
    }

    async fn subscribe_steps(
        &self,
        user_id: Uuid,
        auth_key: &str,
    ) -> Result<SubscribeOutcome, SubscriptionError> {
        if let Some(current) = self.subscriptions.get_current(user_id).await? {
            if current.status == SubscriptionStatus::Active {
                return Err(SubscriptionError::AlreadyActive);
            }
        }

        let now = self.clock.now();
        let next_billing = next_billing_date(now).ok_or_else(|| {
            SubscriptionError::InvalidInput(format!("no next billing date after {}", now))
        })?;
        let customer_key = user_id.to_string();

        let issued = self
            .call_provider(self.provider.issue_billing_key(auth_key, &customer_key))
            .await
            .map_err(|e| SubscriptionError::CredentialIssueFailed(e.to_string()))?;
        let billing_key = issued.billing_key;

        let charge = ChargeRequest {
            customer_key: customer_key.clone(),
            amount: self.plan.pro_price,
            order_id: generate_order_id(user_id, now),
            order_name: self.plan.pro_order_name.clone(),
        };

        let approval = match self
            .call_provider(self.provider.charge(&billing_key, &charge))
            .await
        {
            Ok(approval) => approval,
            Err(e) => {
                tracing::warn!(order_id = %charge.order_id, error = %e, "Charge failed");
                self.compensate(&billing_key, "charge").await;
                return Err(SubscriptionError::PaymentApprovalFailed(e.to_string()));
            }
        };

        if let Err(e) = self.users.set_tier(user_id, SubscriptionTier::Pro).await {
            self.compensate(&billing_key, "update_tier").await;
            return Err(e);
        }

        let subscription = match self
            .subscriptions
            .create(&CreateSubscription {
                user_id,
                plan: SubscriptionTier::Pro,
                billing_key: billing_key.clone(),
                customer_key,
                started_at: now,
                next_billing_date: next_billing,
            })
            .await
        {
            Ok(subscription) => subscription,
            Err(e) => {
                self.compensate(&billing_key, "create_subscription").await;
                return Err(e);
            }
        };

        let payment = match self
            .payments
            .insert(&CreatePaymentHistory {
                user_id,
                subscription_id: Some(subscription.id),
                payment_key: approval.payment_key,
                order_id: charge.order_id.clone(),
                amount: charge.amount,
                status: PaymentStatus::Done,
                paid_at: approval.approved_at.unwrap_or(now),
            })
            .await
        {
            Ok(payment) => payment,
            Err(e) => {
                // Tier and subscription row stay committed; only the key is revoked.
                self.compensate(&billing_key, "insert_payment").await;
                return Err(e);
            }
        };

        if payment.is_none() {
            tracing::info!(
                order_id = %charge.order_id,
                "Payment already recorded by webhook"
            );
        }

        tracing::info!(
            subscription_id = %subscription.id,
            next_billing_date = %subscription.next_billing_date,
            "Pro subscription created"
        );

        Ok(SubscribeOutcome {
            subscription,
            payment,
        })
    }

    /// Stop renewal. Benefits remain until `next_billing_date`.
    #[instrument(skip(self, reason), fields(user_id = %user_id))]
    pub async fn cancel(
        &self,
        user_id: Uuid,
        reason: Option<&str>,
    ) -> Result<Subscription, SubscriptionError> {
        let result = self.cancel_steps(user_id, reason).await;
        match &result {
            Ok(_) => record_subscription_operation("cancel", "success"),
            Err(e) => record_subscription_operation("cancel", e.code()),
        }
        result
    }

    async fn cancel_steps(
        &self,
        user_id: Uuid,
        reason: Option<&str>,
    ) -> Result<Subscription, SubscriptionError> {
        let current = self
            .subscriptions
            .get_current(user_id)
            .await?
            .ok_or(SubscriptionError::SubscriptionNotFound)?;

        if current.status != SubscriptionStatus::Active {
            return Err(SubscriptionError::NotActive);
        }

        let updated = self
            .subscriptions
            .update_status(
                current.id,
                SubscriptionStatus::Canceled,
                Some(self.clock.now()),
            )
            .await?;

        tracing::info!(
            subscription_id = %updated.id,
            reason = reason.unwrap_or("-"),
            benefit_expires_at = %updated.next_billing_date,
            "Subscription canceled"
        );

        Ok(updated)
    }

    /// Reactivate a canceled subscription before its benefit period ends.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn resume(&self, user_id: Uuid) -> Result<Subscription, SubscriptionError> {
        let result = self.resume_steps(user_id).await;
        match &result {
            Ok(_) => record_subscription_operation("resume", "success"),
            Err(e) => record_subscription_operation("resume", e.code()),
        }
        result
    }

    async fn resume_steps(&self, user_id: Uuid) -> Result<Subscription, SubscriptionError> {
        let current = self
            .subscriptions
            .get_current(user_id)
            .await?
            .ok_or(SubscriptionError::SubscriptionNotFound)?;

        match current.status {
            SubscriptionStatus::Canceled => {}
            SubscriptionStatus::Active | SubscriptionStatus::Expired => {
                return Err(SubscriptionError::AlreadyActive);
            }
        }

        if current.next_billing_date <= self.clock.now() {
            return Err(SubscriptionError::Expired);
        }

        let updated = self
            .subscriptions
            .update_status(current.id, SubscriptionStatus::Active, None)
            .await?;

        tracing::info!(
            subscription_id = %updated.id,
            next_billing_date = %updated.next_billing_date,
            "Subscription resumed"
        );

        Ok(updated)
    }

    pub async fn current_subscription(
        &self,
        user_id: Uuid,
    ) -> Result<Option<Subscription>, SubscriptionError> {
        self.subscriptions.get_current(user_id).await
    }

    pub async fn payment_histories(
        &self,
        user_id: Uuid,
        page: u32,
        limit: u32,
    ) -> Result<Vec<PaymentHistory>, SubscriptionError> {
        self.payments.list_by_user(user_id, page, limit).await
    }
}
