//! Test helper module for subscription-service integration tests.
//!
//! Provides in-memory stores, a scriptable billing provider and a fixed clock
//! so the full service can run without PostgreSQL or the provider sandbox.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use secrecy::Secret;
use service_core::config::Config as CoreConfig;
use service_core::utils::signature::{sign_payload, verify_payload};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use subscription_service::config::{
    DatabaseConfig, PlanConfig, SubscriptionConfig, TossPaymentsConfig,
};
use subscription_service::models::{
    CreatePaymentHistory, CreateSubscription, PaymentHistory, Subscription, SubscriptionStatus,
    SubscriptionTier,
};
use subscription_service::services::tosspayments::{
    ChargeApproval, ChargeRequest, IssuedBillingKey,
};
use subscription_service::services::{
    init_metrics, AnalysisUsageCounter, BillingOrchestrator, BillingProvider, Clock,
    PaymentHistoryRepository, ProviderError, StoreHealth, SubscriptionError,
    SubscriptionRepository, UsageLedger, UserRepository, WebhookReconciler,
};
use subscription_service::startup::{AppState, Application, Stores};
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "test_webhook_secret";
pub const PROVIDER_TIMEOUT: Duration = Duration::from_millis(200);

/// 2025-03-15 12:00:00 UTC.
pub fn default_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 15, 12, 0, 0).unwrap()
}

// =========================================================================
// Clock
// =========================================================================

pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

// =========================================================================
// In-memory store
// =========================================================================

#[derive(Default)]
struct StoreData {
    users: HashMap<Uuid, SubscriptionTier>,
    subscriptions: Vec<Subscription>,
    payments: Vec<PaymentHistory>,
    analyses: Vec<(Uuid, DateTime<Utc>)>,
}

/// Single in-memory store implementing every repository seam.
#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<StoreData>,
    pub fail_set_tier: AtomicBool,
    pub fail_create_subscription: AtomicBool,
    pub fail_insert_payment: AtomicBool,
    pub fail_count: AtomicBool,
    pub unhealthy: AtomicBool,
}

fn injected(step: &str) -> SubscriptionError {
    SubscriptionError::Persistence(anyhow::anyhow!("injected failure: {}", step))
}

impl MemoryStore {
    pub fn add_user(&self, tier: SubscriptionTier) -> Uuid {
        let id = Uuid::new_v4();
        self.data.lock().unwrap().users.insert(id, tier);
        id
    }

    pub fn tier(&self, user_id: Uuid) -> Option<SubscriptionTier> {
        self.data.lock().unwrap().users.get(&user_id).copied()
    }

    pub fn record_analysis(&self, user_id: Uuid, at: DateTime<Utc>) {
        self.data.lock().unwrap().analyses.push((user_id, at));
    }

    /// Insert a subscription row directly, bypassing the orchestrator.
    pub fn seed_subscription(
        &self,
        user_id: Uuid,
        status: SubscriptionStatus,
        started_at: DateTime<Utc>,
        next_billing_date: DateTime<Utc>,
    ) -> Subscription {
        let subscription = Subscription {
            id: Uuid::new_v4(),
            user_id,
            plan: SubscriptionTier::Pro,
            status,
            billing_key: format!("bk_seed_{}", user_id.simple()),
            customer_key: user_id.to_string(),
            started_at,
            next_billing_date,
            canceled_at: match status {
                SubscriptionStatus::Canceled => Some(started_at),
                _ => None,
            },
            created_at: started_at,
            updated_at: started_at,
        };
        self.data
            .lock()
            .unwrap()
            .subscriptions
            .push(subscription.clone());
        subscription
    }

    pub fn subscriptions_of(&self, user_id: Uuid) -> Vec<Subscription> {
        self.data
            .lock()
            .unwrap()
            .subscriptions
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn payments(&self) -> Vec<PaymentHistory> {
        self.data.lock().unwrap().payments.clone()
    }

    pub fn payments_with_order(&self, order_id: &str) -> usize {
        self.data
            .lock()
            .unwrap()
            .payments
            .iter()
            .filter(|p| p.order_id == order_id)
            .count()
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn get_tier(&self, user_id: Uuid) -> Result<Option<SubscriptionTier>, SubscriptionError> {
        Ok(self.tier(user_id))
    }

    async fn set_tier(
        &self,
        user_id: Uuid,
        tier: SubscriptionTier,
    ) -> Result<(), SubscriptionError> {
        if self.fail_set_tier.load(Ordering::SeqCst) {
            return Err(injected("set_tier"));
        }
        let mut data = self.data.lock().unwrap();
        match data.users.get_mut(&user_id) {
            Some(current) => {
                *current = tier;
                Ok(())
            }
            None => Err(SubscriptionError::UserNotFound(user_id)),
        }
    }
}

#[async_trait]
impl SubscriptionRepository for MemoryStore {
    async fn get_current(&self, user_id: Uuid) -> Result<Option<Subscription>, SubscriptionError> {
        let data = self.data.lock().unwrap();
        Ok(data
            .subscriptions
            .iter()
            .filter(|s| s.user_id == user_id && s.status.is_live())
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn create(&self, input: &CreateSubscription) -> Result<Subscription, SubscriptionError> {
        if self.fail_create_subscription.load(Ordering::SeqCst) {
            return Err(injected("create_subscription"));
        }
        let subscription = Subscription {
            id: Uuid::new_v4(),
            user_id: input.user_id,
            plan: input.plan,
            status: SubscriptionStatus::Active,
            billing_key: input.billing_key.clone(),
            customer_key: input.customer_key.clone(),
            started_at: input.started_at,
            next_billing_date: input.next_billing_date,
            canceled_at: None,
            created_at: input.started_at,
            updated_at: input.started_at,
        };
        self.data
            .lock()
            .unwrap()
            .subscriptions
            .push(subscription.clone());
        Ok(subscription)
    }

    async fn update_status(
        &self,
        subscription_id: Uuid,
        status: SubscriptionStatus,
        canceled_at: Option<DateTime<Utc>>,
    ) -> Result<Subscription, SubscriptionError> {
        let mut data = self.data.lock().unwrap();
        let subscription = data
            .subscriptions
            .iter_mut()
            .find(|s| s.id == subscription_id)
            .ok_or(SubscriptionError::SubscriptionNotFound)?;
        subscription.status = status;
        subscription.canceled_at = canceled_at;
        Ok(subscription.clone())
    }

    async fn find_user_by_customer_key_prefix(
        &self,
        prefix: &str,
    ) -> Result<Option<Uuid>, SubscriptionError> {
        let data = self.data.lock().unwrap();
        let mut users: Vec<Uuid> = data
            .subscriptions
            .iter()
            .filter(|s| s.customer_key.starts_with(prefix))
            .map(|s| s.user_id)
            .collect();
        users.sort();
        users.dedup();
        Ok(match users.as_slice() {
            [user_id] => Some(*user_id),
            _ => None,
        })
    }
}

#[async_trait]
impl PaymentHistoryRepository for MemoryStore {
    async fn exists_by_order_id(&self, order_id: &str) -> Result<bool, SubscriptionError> {
        Ok(self.payments_with_order(order_id) > 0)
    }

    async fn insert(
        &self,
        input: &CreatePaymentHistory,
    ) -> Result<Option<PaymentHistory>, SubscriptionError> {
        if self.fail_insert_payment.load(Ordering::SeqCst) {
            return Err(injected("insert_payment"));
        }
        let mut data = self.data.lock().unwrap();
        if data.payments.iter().any(|p| p.order_id == input.order_id) {
            return Ok(None);
        }
        let payment = PaymentHistory {
            id: Uuid::new_v4(),
            user_id: input.user_id,
            subscription_id: input.subscription_id,
            payment_key: input.payment_key.clone(),
            order_id: input.order_id.clone(),
            amount: input.amount,
            status: input.status,
            paid_at: input.paid_at,
            created_at: input.paid_at,
        };
        data.payments.push(payment.clone());
        Ok(Some(payment))
    }

    async fn list_by_user(
        &self,
        user_id: Uuid,
        page: u32,
        limit: u32,
    ) -> Result<Vec<PaymentHistory>, SubscriptionError> {
        let data = self.data.lock().unwrap();
        let mut rows: Vec<PaymentHistory> = data
            .payments
            .iter()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.paid_at.cmp(&a.paid_at));
        let offset = (page.saturating_sub(1) * limit) as usize;
        Ok(rows.into_iter().skip(offset).take(limit as usize).collect())
    }
}

#[async_trait]
impl AnalysisUsageCounter for MemoryStore {
    async fn count_all(&self, user_id: Uuid) -> Result<i64, SubscriptionError> {
        if self.fail_count.load(Ordering::SeqCst) {
            return Err(SubscriptionError::UsageCountFailed(anyhow::anyhow!(
                "injected failure"
            )));
        }
        let data = self.data.lock().unwrap();
        Ok(data.analyses.iter().filter(|(u, _)| *u == user_id).count() as i64)
    }

    async fn count_between(
        &self,
        user_id: Uuid,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<i64, SubscriptionError> {
        if self.fail_count.load(Ordering::SeqCst) {
            return Err(SubscriptionError::UsageCountFailed(anyhow::anyhow!(
                "injected failure"
            )));
        }
        let data = self.data.lock().unwrap();
        Ok(data
            .analyses
            .iter()
            .filter(|(u, at)| *u == user_id && *at >= from && *at < until)
            .count() as i64)
    }
}

#[async_trait]
impl StoreHealth for MemoryStore {
    async fn ping(&self) -> Result<(), SubscriptionError> {
        if self.unhealthy.load(Ordering::SeqCst) {
            return Err(injected("ping"));
        }
        Ok(())
    }
}

// =========================================================================
// Billing provider
// =========================================================================

/// How a scripted provider call should behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Script {
    #[default]
    Succeed,
    Fail,
    /// Sleep past [`PROVIDER_TIMEOUT`] before answering.
    Hang,
}

#[derive(Default)]
pub struct FakeBillingProvider {
    pub issue: Mutex<Script>,
    pub charge: Mutex<Script>,
    pub delete: Mutex<Script>,
    pub issued: Mutex<Vec<String>>,
    pub charges: Mutex<Vec<(String, ChargeRequest)>>,
    pub deleted: Mutex<Vec<String>>,
}

impl FakeBillingProvider {
    pub fn script_issue(&self, script: Script) {
        *self.issue.lock().unwrap() = script;
    }

    pub fn script_charge(&self, script: Script) {
        *self.charge.lock().unwrap() = script;
    }

    pub fn script_delete(&self, script: Script) {
        *self.delete.lock().unwrap() = script;
    }

    pub fn issued_count(&self) -> usize {
        self.issued.lock().unwrap().len()
    }

    pub fn deleted_keys(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn last_charge(&self) -> Option<(String, ChargeRequest)> {
        self.charges.lock().unwrap().last().cloned()
    }

    async fn play(script: Script, operation: &str) -> Result<(), ProviderError> {
        match script {
            Script::Succeed => Ok(()),
            Script::Fail => Err(ProviderError::Decode(format!("scripted {} failure", operation))),
            Script::Hang => {
                tokio::time::sleep(PROVIDER_TIMEOUT * 5).await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl BillingProvider for FakeBillingProvider {
    async fn issue_billing_key(
        &self,
        _auth_key: &str,
        customer_key: &str,
    ) -> Result<IssuedBillingKey, ProviderError> {
        let script = *self.issue.lock().unwrap();
        Self::play(script, "issue").await?;

        let billing_key = format!("bk_{}", Uuid::new_v4().simple());
        self.issued.lock().unwrap().push(billing_key.clone());
        Ok(IssuedBillingKey {
            billing_key,
            customer_key: customer_key.to_string(),
        })
    }

    async fn charge(
        &self,
        billing_key: &str,
        request: &ChargeRequest,
    ) -> Result<ChargeApproval, ProviderError> {
        self.charges
            .lock()
            .unwrap()
            .push((billing_key.to_string(), request.clone()));
        let script = *self.charge.lock().unwrap();
        Self::play(script, "charge").await?;

        Ok(ChargeApproval {
            payment_key: format!("pk_{}", request.order_id),
            approved_at: None,
        })
    }

    async fn delete_billing_key(&self, billing_key: &str) -> Result<(), ProviderError> {
        self.deleted.lock().unwrap().push(billing_key.to_string());
        let script = *self.delete.lock().unwrap();
        Self::play(script, "delete").await
    }

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> bool {
        verify_payload(WEBHOOK_SECRET, payload, signature).unwrap_or(false)
    }
}

pub fn sign_webhook(body: &[u8]) -> String {
    sign_payload(WEBHOOK_SECRET, body).unwrap()
}

// =========================================================================
// Wiring
// =========================================================================

pub fn test_config() -> SubscriptionConfig {
    SubscriptionConfig {
        common: CoreConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        service_name: "subscription-service-test".to_string(),
        log_level: "warn".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: Secret::new("postgres://unused".to_string()),
            max_connections: 1,
            min_connections: 1,
        },
        toss: TossPaymentsConfig {
            secret_key: Secret::new("test_sk".to_string()),
            client_key: "test_ck".to_string(),
            webhook_secret: Secret::new(WEBHOOK_SECRET.to_string()),
            api_base_url: "http://127.0.0.1:1".to_string(),
            request_timeout_secs: 1,
        },
        plan: PlanConfig::default(),
    }
}

/// Services wired to shared fakes, for tests that call them directly.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub provider: Arc<FakeBillingProvider>,
    pub clock: Arc<FixedClock>,
    pub orchestrator: BillingOrchestrator,
    pub usage: UsageLedger,
    pub webhooks: WebhookReconciler,
}

impl Harness {
    pub fn new() -> Self {
        init_metrics();

        let store = Arc::new(MemoryStore::default());
        let provider = Arc::new(FakeBillingProvider::default());
        let clock = Arc::new(FixedClock::new(default_now()));
        let plan = PlanConfig::default();

        let orchestrator = BillingOrchestrator::new(
            store.clone(),
            store.clone(),
            store.clone(),
            provider.clone(),
            clock.clone(),
            plan.clone(),
            PROVIDER_TIMEOUT,
        );
        let usage = UsageLedger::new(
            store.clone(),
            store.clone(),
            store.clone(),
            clock.clone(),
            plan.free_limit,
            plan.pro_limit,
        );
        let webhooks =
            WebhookReconciler::new(store.clone(), store.clone(), store.clone(), clock.clone());

        Self {
            store,
            provider,
            clock,
            orchestrator,
            usage,
            webhooks,
        }
    }
}

/// Test application wrapper for HTTP-level tests.
pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub store: Arc<MemoryStore>,
    pub provider: Arc<FakeBillingProvider>,
    pub clock: Arc<FixedClock>,
    pub client: reqwest::Client,
}

impl TestApp {
    /// Spawn the service on a random port over in-memory fakes.
    pub async fn spawn() -> Self {
        init_metrics();

        let store = Arc::new(MemoryStore::default());
        let provider = Arc::new(FakeBillingProvider::default());
        let clock = Arc::new(FixedClock::new(default_now()));

        let mut config = test_config();
        config.toss.request_timeout_secs = 1;

        let stores = Stores {
            users: store.clone(),
            subscriptions: store.clone(),
            payments: store.clone(),
            analyses: store.clone(),
            health: store.clone(),
        };
        let state = AppState::new(config.clone(), stores, provider.clone(), clock.clone());

        let app = Application::build_with_state(config, state)
            .await
            .expect("Failed to build test application");
        let port = app.port();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for the server to be ready by polling the health endpoint
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        TestApp {
            address,
            port,
            store,
            provider,
            clock,
            client,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    pub fn get_as(&self, user_id: Uuid, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(self.url(path))
            .header("X-User-ID", user_id.to_string())
    }

    pub fn post_as(&self, user_id: Uuid, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(self.url(path))
            .header("X-User-ID", user_id.to_string())
    }
}
