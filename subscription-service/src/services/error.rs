//! Domain errors for subscription-service.

use axum::http::StatusCode;
use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

use crate::models::SubscriptionTier;

/// Coarse classification used for logging and HTTP mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    NotFound,
    Conflict,
    QuotaExceeded,
    ProviderError,
    PersistenceError,
    DataCorrupted,
    Rejected,
}

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("User {0} not found")]
    UserNotFound(Uuid),

    #[error("Subscription not found")]
    SubscriptionNotFound,

    #[error("User {0} is on the pro tier but has no live subscription")]
    ProSubscriptionMissing(Uuid),

    #[error("An active subscription already exists")]
    AlreadyActive,

    #[error("Subscription is not active")]
    NotActive,

    #[error("Subscription benefit period has ended; subscribe again")]
    Expired,

    #[error("{message}")]
    QuotaExceeded {
        tier: SubscriptionTier,
        message: String,
    },

    #[error("Failed to check usage: {0}")]
    UsageCountFailed(anyhow::Error),

    #[error("Failed to issue billing key: {0}")]
    CredentialIssueFailed(String),

    #[error("Payment approval failed: {0}")]
    PaymentApprovalFailed(String),

    #[error("Persistence error: {0}")]
    Persistence(anyhow::Error),

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Invalid webhook payload: {0}")]
    InvalidWebhookPayload(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl SubscriptionError {
    pub fn quota_exceeded(tier: SubscriptionTier) -> Self {
        let message = match tier {
            SubscriptionTier::Free => {
                "The free analysis has been used. Upgrade to Pro for 10 analyses per month."
            }
            SubscriptionTier::Pro => {
                "This month's analyses have been used. The allowance resets on the 1st."
            }
        };
        SubscriptionError::QuotaExceeded {
            tier,
            message: message.to_string(),
        }
    }

    /// Stable code surfaced to callers.
    pub fn code(&self) -> &'static str {
        match self {
            SubscriptionError::UserNotFound(_) => "USER_NOT_FOUND",
            SubscriptionError::SubscriptionNotFound => "SUBSCRIPTION_NOT_FOUND",
            SubscriptionError::ProSubscriptionMissing(_) => "DATA_CORRUPTED",
            SubscriptionError::AlreadyActive => "SUBSCRIPTION_ALREADY_ACTIVE",
            SubscriptionError::NotActive => "SUBSCRIPTION_NOT_ACTIVE",
            SubscriptionError::Expired => "SUBSCRIPTION_EXPIRED",
            SubscriptionError::QuotaExceeded { .. } => "USAGE_LIMIT_EXCEEDED",
            SubscriptionError::UsageCountFailed(_) => "USAGE_COUNT_FAILED",
            SubscriptionError::CredentialIssueFailed(_) => "BILLING_KEY_ISSUE_FAILED",
            SubscriptionError::PaymentApprovalFailed(_) => "PAYMENT_APPROVAL_FAILED",
            SubscriptionError::Persistence(_) => "DATABASE_ERROR",
            SubscriptionError::InvalidSignature => "INVALID_SIGNATURE",
            SubscriptionError::InvalidWebhookPayload(_) => "INVALID_WEBHOOK_PAYLOAD",
            SubscriptionError::InvalidInput(_) => "INVALID_INPUT",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            SubscriptionError::UserNotFound(_) | SubscriptionError::SubscriptionNotFound => {
                ErrorCategory::NotFound
            }
            SubscriptionError::AlreadyActive
            | SubscriptionError::NotActive
            | SubscriptionError::Expired => ErrorCategory::Conflict,
            SubscriptionError::QuotaExceeded { .. } => ErrorCategory::QuotaExceeded,
            SubscriptionError::CredentialIssueFailed(_)
            | SubscriptionError::PaymentApprovalFailed(_) => ErrorCategory::ProviderError,
            SubscriptionError::UsageCountFailed(_) | SubscriptionError::Persistence(_) => {
                ErrorCategory::PersistenceError
            }
            SubscriptionError::ProSubscriptionMissing(_) => ErrorCategory::DataCorrupted,
            SubscriptionError::InvalidSignature
            | SubscriptionError::InvalidWebhookPayload(_)
            | SubscriptionError::InvalidInput(_) => ErrorCategory::Rejected,
        }
    }

    /// Message safe to show to the caller. Internal failures are logged in
    /// full but not echoed.
    pub fn public_message(&self) -> String {
        match self.category() {
            ErrorCategory::PersistenceError | ErrorCategory::DataCorrupted => {
                "Internal error while processing the subscription".to_string()
            }
            _ => self.to_string(),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            SubscriptionError::InvalidSignature => StatusCode::UNAUTHORIZED,
            SubscriptionError::InvalidWebhookPayload(_) | SubscriptionError::InvalidInput(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => match self.category() {
                ErrorCategory::NotFound => StatusCode::NOT_FOUND,
                ErrorCategory::Conflict => StatusCode::CONFLICT,
                ErrorCategory::QuotaExceeded => StatusCode::BAD_REQUEST,
                ErrorCategory::ProviderError => StatusCode::BAD_GATEWAY,
                ErrorCategory::PersistenceError | ErrorCategory::DataCorrupted => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
                ErrorCategory::Rejected => StatusCode::BAD_REQUEST,
            },
        }
    }
}

impl From<SubscriptionError> for AppError {
    fn from(err: SubscriptionError) -> Self {
        let status = err.status();
        let code = err.code();

        match err.category() {
            ErrorCategory::PersistenceError | ErrorCategory::DataCorrupted => {
                tracing::error!(code = code, error = %err, "Subscription operation failed");
            }
            ErrorCategory::ProviderError => {
                tracing::warn!(code = code, error = %err, "Billing provider call failed");
            }
            _ => {}
        }

        AppError::rejected(status, code, err.public_message())
    }
}
