//! Quota gate consulted before spending AI provider budget.

use crate::config::PlanConfig;
use crate::models::{SubscriptionTier, UsageInfo};
use crate::services::error::SubscriptionError;
use crate::services::metrics::record_quota_decision;

/// May the user run one more analysis right now?
///
/// Evaluate against a freshly computed [`UsageInfo`]. Concurrent requests can
/// both pass; usage is counted from committed records, not reserved.
pub fn may_consume(usage: &UsageInfo) -> bool {
    usage.remaining > 0
}

/// Permission to run one analysis, with the model the tier is entitled to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub tier: SubscriptionTier,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct QuotaGate {
    pro_model: String,
    free_model: String,
}

impl QuotaGate {
    pub fn new(plan: &PlanConfig) -> Self {
        Self {
            pro_model: plan.pro_model.clone(),
            free_model: plan.free_model.clone(),
        }
    }

    pub fn admit(&self, usage: &UsageInfo) -> Result<Admission, SubscriptionError> {
        let tier = usage.subscription_tier;
        let allowed = may_consume(usage);
        record_quota_decision(tier.as_str(), allowed);

        if !allowed {
            tracing::info!(
                tier = tier.as_str(),
                used = usage.used,
                limit = usage.limit,
                "Usage limit reached"
            );
            return Err(SubscriptionError::quota_exceeded(tier));
        }

        let model = match tier {
            SubscriptionTier::Pro => self.pro_model.clone(),
            SubscriptionTier::Free => self.free_model.clone(),
        };

        Ok(Admission { tier, model })
    }
}
