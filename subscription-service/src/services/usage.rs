//! Usage ledger: derives how much of the tier allowance a user has spent.

use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::models::{SubscriptionTier, UsageInfo};
use crate::services::clock::Clock;
use crate::services::error::SubscriptionError;
use crate::services::repository::{AnalysisUsageCounter, SubscriptionRepository, UserRepository};

/// Calendar month containing `now`, as `[start, next_start)` in UTC.
pub fn month_window(now: DateTime<Utc>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let start = NaiveDate::from_ymd_opt(now.year(), now.month(), 1)?;
    let next = start.checked_add_months(Months::new(1))?;

    Some((
        start.and_hms_opt(0, 0, 0)?.and_utc(),
        next.and_hms_opt(0, 0, 0)?.and_utc(),
    ))
}

/// Computes [`UsageInfo`] on demand from analysis records. Never writes.
#[derive(Clone)]
pub struct UsageLedger {
    users: Arc<dyn UserRepository>,
    subscriptions: Arc<dyn SubscriptionRepository>,
    analyses: Arc<dyn AnalysisUsageCounter>,
    clock: Arc<dyn Clock>,
    free_limit: i64,
    pro_limit: i64,
}

impl UsageLedger {
    pub fn new(
        users: Arc<dyn UserRepository>,
        subscriptions: Arc<dyn SubscriptionRepository>,
        analyses: Arc<dyn AnalysisUsageCounter>,
        clock: Arc<dyn Clock>,
        free_limit: i64,
        pro_limit: i64,
    ) -> Self {
        Self {
            users,
            subscriptions,
            analyses,
            clock,
            free_limit,
            pro_limit,
        }
    }

    /// Free users get a lifetime allowance; pro users get a monthly one that
    /// resets on the first of each calendar month regardless of when they
    /// subscribed.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn compute_usage(&self, user_id: Uuid) -> Result<UsageInfo, SubscriptionError> {
        let tier = self
            .users
            .get_tier(user_id)
            .await?
            .ok_or(SubscriptionError::UserNotFound(user_id))?;

        match tier {
            SubscriptionTier::Free => {
                let used = self.analyses.count_all(user_id).await?;
                Ok(UsageInfo::new(tier, used, self.free_limit, None))
            }
            SubscriptionTier::Pro => {
                if self.subscriptions.get_current(user_id).await?.is_none() {
                    tracing::error!("Pro user has no active or canceled subscription");
                    return Err(SubscriptionError::ProSubscriptionMissing(user_id));
                }

                let now = self.clock.now();
                let (start, next_start) = month_window(now).ok_or_else(|| {
                    SubscriptionError::UsageCountFailed(anyhow::anyhow!(
                        "no accounting window for {}",
                        now
                    ))
                })?;

                let used = self
                    .analyses
                    .count_between(user_id, start, next_start)
                    .await?;
                Ok(UsageInfo::new(tier, used, self.pro_limit, Some(next_start)))
            }
        }
    }
}
