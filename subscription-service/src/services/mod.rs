//! Services module for subscription-service.

pub mod clock;
pub mod database;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod quota;
pub mod repository;
pub mod tosspayments;
pub mod usage;
pub mod webhook;

pub use clock::{Clock, SystemClock};
pub use database::Database;
pub use error::{ErrorCategory, SubscriptionError};
pub use metrics::{get_metrics, init_metrics};
pub use orchestrator::{BillingOrchestrator, SubscribeOutcome};
pub use quota::{may_consume, Admission, QuotaGate};
pub use repository::{
    AnalysisUsageCounter, PaymentHistoryRepository, StoreHealth, SubscriptionRepository,
    UserRepository,
};
pub use tosspayments::{BillingProvider, ProviderError, TossPaymentsClient};
pub use usage::UsageLedger;
pub use webhook::{WebhookOutcome, WebhookReconciler};
