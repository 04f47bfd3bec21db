//! Database service for subscription-service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::models::{
    CreatePaymentHistory, CreateSubscription, PaymentHistory, Subscription, SubscriptionStatus,
    SubscriptionTier,
};
use crate::services::error::SubscriptionError;
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::repository::{
    AnalysisUsageCounter, PaymentHistoryRepository, StoreHealth, SubscriptionRepository,
    UserRepository,
};

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, plan, status, billing_key, customer_key, \
     started_at, next_billing_date, canceled_at, created_at, updated_at";

const PAYMENT_COLUMNS: &str =
    "id, user_id, subscription_id, payment_key, order_id, amount, status, paid_at, created_at";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

fn persistence(action: &str, e: sqlx::Error) -> SubscriptionError {
    SubscriptionError::Persistence(anyhow::anyhow!("Failed to {}: {}", action, e))
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "subscription-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl StoreHealth for Database {
    async fn ping(&self) -> Result<(), SubscriptionError> {
        self.health_check()
            .await
            .map_err(|e| SubscriptionError::Persistence(anyhow::anyhow!("{}", e)))
    }
}

// =========================================================================
// Users
// =========================================================================

#[async_trait]
impl UserRepository for Database {
    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn get_tier(&self, user_id: Uuid) -> Result<Option<SubscriptionTier>, SubscriptionError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_tier"])
            .start_timer();

        let tier: Option<String> =
            sqlx::query_scalar("SELECT subscription_tier FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| persistence("get user tier", e))?;

        timer.observe_duration();

        tier.map(|t| SubscriptionTier::from_string(&t))
            .transpose()
            .map_err(|e| SubscriptionError::Persistence(e.into()))
    }

    #[instrument(skip(self), fields(user_id = %user_id, tier = tier.as_str()))]
    async fn set_tier(
        &self,
        user_id: Uuid,
        tier: SubscriptionTier,
    ) -> Result<(), SubscriptionError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["set_tier"])
            .start_timer();

        let result = sqlx::query(
            "UPDATE users SET subscription_tier = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(user_id)
        .bind(tier.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| persistence("update user tier", e))?;

        timer.observe_duration();

        if result.rows_affected() == 0 {
            return Err(SubscriptionError::UserNotFound(user_id));
        }

        info!("User tier updated");
        Ok(())
    }
}

// =========================================================================
// Subscriptions
// =========================================================================

#[async_trait]
impl SubscriptionRepository for Database {
    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn get_current(&self, user_id: Uuid) -> Result<Option<Subscription>, SubscriptionError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_current_subscription"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM subscriptions
            WHERE user_id = $1 AND status IN ('active', 'canceled')
            ORDER BY created_at DESC
            LIMIT 1
            "#
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| persistence("get current subscription", e))?;

        timer.observe_duration();

        Ok(subscription)
    }

    #[instrument(skip(self, input), fields(user_id = %input.user_id))]
    async fn create(&self, input: &CreateSubscription) -> Result<Subscription, SubscriptionError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_subscription"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            INSERT INTO subscriptions (id, user_id, plan, status, billing_key, customer_key, started_at, next_billing_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(input.user_id)
        .bind(input.plan.as_str())
        .bind(SubscriptionStatus::Active.as_str())
        .bind(&input.billing_key)
        .bind(&input.customer_key)
        .bind(input.started_at)
        .bind(input.next_billing_date)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| persistence("create subscription", e))?;

        timer.observe_duration();
        info!(subscription_id = %subscription.id, "Subscription created");

        Ok(subscription)
    }

    #[instrument(skip(self), fields(subscription_id = %subscription_id, status = status.as_str()))]
    async fn update_status(
        &self,
        subscription_id: Uuid,
        status: SubscriptionStatus,
        canceled_at: Option<DateTime<Utc>>,
    ) -> Result<Subscription, SubscriptionError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_subscription_status"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            UPDATE subscriptions
            SET status = $2, canceled_at = $3, updated_at = NOW()
            WHERE id = $1
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        ))
        .bind(subscription_id)
        .bind(status.as_str())
        .bind(canceled_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| persistence("update subscription status", e))?
        .ok_or(SubscriptionError::SubscriptionNotFound)?;

        timer.observe_duration();

        Ok(subscription)
    }

    #[instrument(skip(self))]
    async fn find_user_by_customer_key_prefix(
        &self,
        prefix: &str,
    ) -> Result<Option<Uuid>, SubscriptionError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_user_by_customer_key_prefix"])
            .start_timer();

        let users: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT user_id
            FROM subscriptions
            WHERE customer_key LIKE $1 || '%'
            LIMIT 2
            "#,
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| persistence("find user by customer key prefix", e))?;

        timer.observe_duration();

        match users.as_slice() {
            [user_id] => Ok(Some(*user_id)),
            _ => Ok(None),
        }
    }
}

// =========================================================================
// Payment histories
// =========================================================================

#[async_trait]
impl PaymentHistoryRepository for Database {
    #[instrument(skip(self))]
    async fn exists_by_order_id(&self, order_id: &str) -> Result<bool, SubscriptionError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["payment_exists"])
            .start_timer();

        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM payment_histories WHERE order_id = $1)",
        )
        .bind(order_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| persistence("look up payment by order id", e))?;

        timer.observe_duration();

        Ok(exists)
    }

    #[instrument(skip(self, input), fields(user_id = %input.user_id, order_id = %input.order_id))]
    async fn insert(
        &self,
        input: &CreatePaymentHistory,
    ) -> Result<Option<PaymentHistory>, SubscriptionError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_payment_history"])
            .start_timer();

        let payment = sqlx::query_as::<_, PaymentHistory>(&format!(
            r#"
            INSERT INTO payment_histories (id, user_id, subscription_id, payment_key, order_id, amount, status, paid_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (order_id) DO NOTHING
            RETURNING {PAYMENT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(input.user_id)
        .bind(input.subscription_id)
        .bind(&input.payment_key)
        .bind(&input.order_id)
        .bind(input.amount)
        .bind(input.status.as_str())
        .bind(input.paid_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| persistence("insert payment history", e))?;

        timer.observe_duration();

        Ok(payment)
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn list_by_user(
        &self,
        user_id: Uuid,
        page: u32,
        limit: u32,
    ) -> Result<Vec<PaymentHistory>, SubscriptionError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_payment_histories"])
            .start_timer();

        let offset = i64::from(page.saturating_sub(1)) * i64::from(limit);

        let payments = sqlx::query_as::<_, PaymentHistory>(&format!(
            r#"
            SELECT {PAYMENT_COLUMNS}
            FROM payment_histories
            WHERE user_id = $1
            ORDER BY paid_at DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(user_id)
        .bind(i64::from(limit))
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| persistence("list payment histories", e))?;

        timer.observe_duration();

        Ok(payments)
    }
}

// =========================================================================
// Analyses (read only)
// =========================================================================

#[async_trait]
impl AnalysisUsageCounter for Database {
    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn count_all(&self, user_id: Uuid) -> Result<i64, SubscriptionError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["count_analyses"])
            .start_timer();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM analyses WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| SubscriptionError::UsageCountFailed(e.into()))?;

        timer.observe_duration();

        Ok(count)
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn count_between(
        &self,
        user_id: Uuid,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<i64, SubscriptionError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["count_analyses_between"])
            .start_timer();

        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM analyses
            WHERE user_id = $1 AND created_at >= $2 AND created_at < $3
            "#,
        )
        .bind(user_id)
        .bind(from)
        .bind(until)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| SubscriptionError::UsageCountFailed(e.into()))?;

        timer.observe_duration();

        Ok(count)
    }
}
