//! Payment history model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::subscription::UnknownVariant;

/// Outcome of a charge as reported by the billing provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Done,
    Aborted,
    Canceled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Done => "DONE",
            PaymentStatus::Aborted => "ABORTED",
            PaymentStatus::Canceled => "CANCELED",
        }
    }

    pub fn from_string(s: &str) -> Result<Self, UnknownVariant> {
        match s {
            "DONE" => Ok(PaymentStatus::Done),
            "ABORTED" => Ok(PaymentStatus::Aborted),
            "CANCELED" => Ok(PaymentStatus::Canceled),
            other => Err(UnknownVariant {
                kind: "payment status",
                value: other.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for PaymentStatus {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_string(&value)
    }
}

/// Append-only record of a charge attempt.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PaymentHistory {
    pub id: Uuid,
    pub user_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub payment_key: String,
    pub order_id: String,
    pub amount: i64,
    #[sqlx(try_from = "String")]
    pub status: PaymentStatus,
    pub paid_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Input for appending a payment history row.
#[derive(Debug, Clone)]
pub struct CreatePaymentHistory {
    pub user_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub payment_key: String,
    pub order_id: String,
    pub amount: i64,
    pub status: PaymentStatus,
    pub paid_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_statuses_parse() {
        assert_eq!(PaymentStatus::from_string("DONE").unwrap(), PaymentStatus::Done);
        assert_eq!(
            PaymentStatus::from_string("ABORTED").unwrap(),
            PaymentStatus::Aborted
        );
        assert_eq!(
            PaymentStatus::from_string("CANCELED").unwrap(),
            PaymentStatus::Canceled
        );
        assert!(PaymentStatus::from_string("WAITING_FOR_DEPOSIT").is_err());
    }

    #[test]
    fn serializes_in_provider_casing() {
        let json = serde_json::to_value(PaymentStatus::Aborted).unwrap();
        assert_eq!(json, "ABORTED");
    }
}
