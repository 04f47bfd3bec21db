//! Webhook reconciler for billing provider payment notifications.
//!
//! Deliveries are at-least-once and may arrive out of order. Rows are keyed by
//! `order_id`, so replays are no-ops.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::models::{CreatePaymentHistory, PaymentStatus};
use crate::services::clock::Clock;
use crate::services::error::SubscriptionError;
use crate::services::metrics::record_webhook_event;
use crate::services::repository::{
    PaymentHistoryRepository, SubscriptionRepository, UserRepository,
};

pub const PAYMENT_STATUS_CHANGED: &str = "PAYMENT_STATUS_CHANGED";

/// Envelope of every provider notification.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    pub event_type: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// `data` of a `PAYMENT_STATUS_CHANGED` event.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusChanged {
    pub payment_key: String,
    pub order_id: String,
    pub status: String,
    #[serde(alias = "totalAmount")]
    pub amount: i64,
    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,
    /// Billing customer key; equals the user id for billing-key charges.
    #[serde(default)]
    pub customer_key: Option<String>,
}

/// What the reconciler did with an event. Every outcome is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Recorded,
    Duplicate,
    /// No user could be attributed; nothing written.
    Unattributed,
    /// Non-terminal payment status; nothing written.
    IgnoredStatus,
    /// Event type this service does not handle.
    IgnoredEvent,
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookOutcome::Recorded => "recorded",
            WebhookOutcome::Duplicate => "duplicate",
            WebhookOutcome::Unattributed => "unattributed",
            WebhookOutcome::IgnoredStatus => "ignored_status",
            WebhookOutcome::IgnoredEvent => "ignored_event",
        }
    }
}

#[derive(Clone)]
pub struct WebhookReconciler {
    users: Arc<dyn UserRepository>,
    subscriptions: Arc<dyn SubscriptionRepository>,
    payments: Arc<dyn PaymentHistoryRepository>,
    clock: Arc<dyn Clock>,
}

impl WebhookReconciler {
    pub fn new(
        users: Arc<dyn UserRepository>,
        subscriptions: Arc<dyn SubscriptionRepository>,
        payments: Arc<dyn PaymentHistoryRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            users,
            subscriptions,
            payments,
            clock,
        }
    }

    /// Route a signature-verified raw body to its handler.
    pub async fn dispatch(&self, body: &[u8]) -> Result<WebhookOutcome, SubscriptionError> {
        let event: WebhookEvent = serde_json::from_slice(body)
            .map_err(|e| SubscriptionError::InvalidWebhookPayload(e.to_string()))?;

        let result = match event.event_type.as_str() {
            PAYMENT_STATUS_CHANGED => {
                let data: PaymentStatusChanged = serde_json::from_value(event.data.clone())
                    .map_err(|e| SubscriptionError::InvalidWebhookPayload(e.to_string()))?;
                self.handle_payment_status_changed(&data).await
            }
            other => {
                tracing::info!(event_type = %other, "Unhandled webhook event type");
                Ok(WebhookOutcome::IgnoredEvent)
            }
        };

        let label = event_type_label(&event.event_type);
        match &result {
            Ok(outcome) => record_webhook_event(label, outcome.as_str()),
            Err(e) => record_webhook_event(label, e.code()),
        }
        result
    }

    /// Idempotently record a payment status change.
    #[instrument(skip(self, event), fields(order_id = %event.order_id, status = %event.status))]
    pub async fn handle_payment_status_changed(
        &self,
        event: &PaymentStatusChanged,
    ) -> Result<WebhookOutcome, SubscriptionError> {
        if self.payments.exists_by_order_id(&event.order_id).await? {
            tracing::info!("Payment already recorded, skipping duplicate delivery");
            return Ok(WebhookOutcome::Duplicate);
        }

        let status = match PaymentStatus::from_string(&event.status) {
            Ok(status) => status,
            Err(_) => {
                tracing::info!("Non-terminal payment status, nothing to record");
                return Ok(WebhookOutcome::IgnoredStatus);
            }
        };

        let Some(user_id) = self.resolve_user(event).await? else {
            tracing::error!(
                customer_key = ?event.customer_key,
                order_id = %event.order_id,
                "Cannot attribute payment webhook to a user"
            );
            return Ok(WebhookOutcome::Unattributed);
        };

        let subscription_id = self
            .subscriptions
            .get_current(user_id)
            .await?
            .map(|s| s.id);

        let inserted = self
            .payments
            .insert(&CreatePaymentHistory {
                user_id,
                subscription_id,
                payment_key: event.payment_key.clone(),
                order_id: event.order_id.clone(),
                amount: event.amount,
                status,
                paid_at: event.approved_at.unwrap_or_else(|| self.clock.now()),
            })
            .await?;

        if inserted.is_none() {
            tracing::info!("Payment recorded concurrently, skipping duplicate delivery");
            return Ok(WebhookOutcome::Duplicate);
        }

        match status {
            PaymentStatus::Aborted => {
                // Subscription and tier are left untouched.
                tracing::warn!(user_id = %user_id, "Recurring payment aborted");
            }
            PaymentStatus::Done | PaymentStatus::Canceled => {
                tracing::info!(user_id = %user_id, "Payment status recorded");
            }
        }

        Ok(WebhookOutcome::Recorded)
    }

    /// Attribute an event to a user by customer key, falling back to the
    /// user fragment embedded in the order id.
    async fn resolve_user(
        &self,
        event: &PaymentStatusChanged,
    ) -> Result<Option<Uuid>, SubscriptionError> {
        if let Some(user_id) = event
            .customer_key
            .as_deref()
            .and_then(|key| Uuid::parse_str(key).ok())
        {
            if self.users.get_tier(user_id).await?.is_some() {
                return Ok(Some(user_id));
            }
        }

        let Some(fragment) = order_user_fragment(&event.order_id) else {
            return Ok(None);
        };

        let user_id = self
            .subscriptions
            .find_user_by_customer_key_prefix(fragment)
            .await?;
        if let Some(user_id) = user_id {
            tracing::warn!(
                user_id = %user_id,
                "Payment webhook attributed through order id fragment"
            );
        }
        Ok(user_id)
    }
}

/// The 8-hex-digit user fragment of an order id shaped
/// `order_{millis}_{uid8}_{suffix}`.
fn order_user_fragment(order_id: &str) -> Option<&str> {
    let mut parts = order_id.split('_');
    let (Some("order"), Some(millis), Some(fragment), Some(_), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return None;
    };

    let well_formed = millis.chars().all(|c| c.is_ascii_digit())
        && fragment.len() == 8
        && fragment.chars().all(|c| c.is_ascii_hexdigit());
    well_formed.then_some(fragment)
}

/// Metric label for an event type. Unknown types share one label.
fn event_type_label(event_type: &str) -> &'static str {
    match event_type {
        PAYMENT_STATUS_CHANGED => PAYMENT_STATUS_CHANGED,
        _ => "other",
    }
}
