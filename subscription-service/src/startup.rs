//! Application startup and lifecycle management.

use crate::config::SubscriptionConfig;
use crate::handlers;
use crate::services::{
    AnalysisUsageCounter, BillingOrchestrator, BillingProvider, Clock, Database,
    PaymentHistoryRepository, QuotaGate, StoreHealth, SubscriptionRepository, SystemClock,
    TossPaymentsClient, UsageLedger, UserRepository, WebhookReconciler,
};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::{request_id_middleware, REQUEST_ID_HEADER};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Persistence seams the services are built from.
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserRepository>,
    pub subscriptions: Arc<dyn SubscriptionRepository>,
    pub payments: Arc<dyn PaymentHistoryRepository>,
    pub analyses: Arc<dyn AnalysisUsageCounter>,
    pub health: Arc<dyn StoreHealth>,
}

impl Stores {
    /// Every seam backed by the same PostgreSQL pool.
    pub fn postgres(db: Arc<Database>) -> Self {
        Self {
            users: db.clone(),
            subscriptions: db.clone(),
            payments: db.clone(),
            analyses: db.clone(),
            health: db,
        }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: SubscriptionConfig,
    pub orchestrator: Arc<BillingOrchestrator>,
    pub usage: Arc<UsageLedger>,
    pub quota: Arc<QuotaGate>,
    pub webhooks: Arc<WebhookReconciler>,
    pub provider: Arc<dyn BillingProvider>,
    pub store_health: Arc<dyn StoreHealth>,
}

impl AppState {
    pub fn new(
        config: SubscriptionConfig,
        stores: Stores,
        provider: Arc<dyn BillingProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let orchestrator = BillingOrchestrator::new(
            stores.users.clone(),
            stores.subscriptions.clone(),
            stores.payments.clone(),
            provider.clone(),
            clock.clone(),
            config.plan.clone(),
            Duration::from_secs(config.toss.request_timeout_secs),
        );

        let usage = UsageLedger::new(
            stores.users.clone(),
            stores.subscriptions.clone(),
            stores.analyses.clone(),
            clock.clone(),
            config.plan.free_limit,
            config.plan.pro_limit,
        );

        let webhooks = WebhookReconciler::new(
            stores.users.clone(),
            stores.subscriptions.clone(),
            stores.payments.clone(),
            clock,
        );

        Self {
            quota: Arc::new(QuotaGate::new(&config.plan)),
            config,
            orchestrator: Arc::new(orchestrator),
            usage: Arc::new(usage),
            webhooks: Arc::new(webhooks),
            provider,
            store_health: stores.health,
        }
    }
}

/// Build the HTTP router with all routes and middleware.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .route("/metrics", get(handlers::health::metrics_handler))
        // Subscription lifecycle
        .route(
            "/api/subscription",
            get(handlers::subscription::get_subscription),
        )
        .route(
            "/api/subscription/subscribe",
            post(handlers::subscription::subscribe),
        )
        .route(
            "/api/subscription/cancel",
            post(handlers::subscription::cancel_subscription),
        )
        .route(
            "/api/subscription/resume",
            post(handlers::subscription::resume_subscription),
        )
        .route(
            "/api/payment-histories",
            get(handlers::subscription::list_payment_histories),
        )
        // Usage and quota
        .route("/api/usage", get(handlers::usage::get_usage))
        .route(
            "/api/analyses/admission",
            post(handlers::usage::admit_analysis),
        )
        // Provider redirects and notifications
        .route(
            "/api/billing/success",
            get(handlers::billing_callback::billing_success),
        )
        .route(
            "/api/billing/fail",
            get(handlers::billing_callback::billing_fail),
        )
        .route(
            "/api/webhooks/tosspayments",
            post(handlers::webhook::toss_webhook),
        )
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    user_id = tracing::field::Empty,
                )
            }),
        )
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application against PostgreSQL and the live provider.
    pub async fn build(config: SubscriptionConfig) -> Result<Self, AppError> {
        let db = Database::new(
            config.database.url.expose_secret(),
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        db.run_migrations().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run migrations");
            e
        })?;

        let toss = TossPaymentsClient::new(config.toss.clone()).map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("Failed to build TossPayments client: {}", e))
        })?;
        if toss.is_configured() {
            tracing::info!("TossPayments client initialized");
        } else {
            tracing::warn!("TossPayments secret key not configured - billing calls will fail");
        }

        let state = AppState::new(
            config.clone(),
            Stores::postgres(Arc::new(db)),
            Arc::new(toss),
            Arc::new(SystemClock),
        );

        Self::build_with_state(config, state).await
    }

    /// Bind a listener for a pre-assembled state.
    pub async fn build_with_state(
        config: SubscriptionConfig,
        state: AppState,
    ) -> Result<Self, AppError> {
        let addr: SocketAddr = format!("{}:{}", config.common.host, config.common.port)
            .parse()
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Invalid bind address: {}", e)))?;

        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "Subscription service listener bound");

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let router = router(self.state);

        tracing::info!(
            service = "subscription-service",
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            "Service ready to accept connections"
        );

        axum::serve(self.listener, router).await
    }
}
