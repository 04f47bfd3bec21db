//! Metrics module for subscription-service.
//!
//! HTTP request metrics go through the `metrics` facade and are rendered by the
//! Prometheus recorder. Domain counters live in the default `prometheus`
//! registry. `/metrics` serves both.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec,
    IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

/// Prometheus recorder handle for `metrics` facade output.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Database query duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "subscription_db_query_duration_seconds",
            "Database query duration"
        ),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Billing provider call duration histogram
pub static PROVIDER_CALL_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "subscription_provider_call_duration_seconds",
            "Billing provider call duration",
            vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
        ),
        &["operation", "outcome"]
    )
    .expect("Failed to register PROVIDER_CALL_DURATION")
});

/// Subscription lifecycle operations by outcome
pub static SUBSCRIPTION_OPERATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "subscription_operations_total",
            "Subscription lifecycle operations by operation and outcome"
        ),
        &["operation", "outcome"]
    )
    .expect("Failed to register SUBSCRIPTION_OPERATIONS_TOTAL")
});

/// Billing key compensations (deletions after a failed subscribe)
pub static COMPENSATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "subscription_compensations_total",
            "Billing key deletions triggered by a failed subscribe"
        ),
        &["failed_step", "outcome"]
    )
    .expect("Failed to register COMPENSATIONS_TOTAL")
});

/// Webhook events by type and outcome
pub static WEBHOOK_EVENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "subscription_webhook_events_total",
            "Billing provider webhook events by type and outcome"
        ),
        &["event_type", "outcome"]
    )
    .expect("Failed to register WEBHOOK_EVENTS_TOTAL")
});

/// Quota gate decisions
pub static QUOTA_DECISIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "subscription_quota_decisions_total",
            "Quota gate decisions by tier"
        ),
        &["tier", "decision"]
    )
    .expect("Failed to register QUOTA_DECISIONS_TOTAL")
});

/// Initialize all metrics. Safe to call more than once.
pub fn init_metrics() {
    METRICS_HANDLE.get_or_init(|| {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        if let Err(e) = metrics::set_global_recorder(recorder) {
            tracing::warn!(error = %e, "Metrics recorder already installed");
        }
        handle
    });

    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&PROVIDER_CALL_DURATION);
    Lazy::force(&SUBSCRIPTION_OPERATIONS_TOTAL);
    Lazy::force(&COMPENSATIONS_TOTAL);
    Lazy::force(&WEBHOOK_EVENTS_TOTAL);
    Lazy::force(&QUOTA_DECISIONS_TOTAL);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let mut output = METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_default();

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
    }
    output.push_str(&String::from_utf8_lossy(&buffer));

    output
}

pub fn record_subscription_operation(operation: &str, outcome: &str) {
    SUBSCRIPTION_OPERATIONS_TOTAL
        .with_label_values(&[operation, outcome])
        .inc();
}

pub fn record_compensation(failed_step: &str, outcome: &str) {
    COMPENSATIONS_TOTAL
        .with_label_values(&[failed_step, outcome])
        .inc();
}

pub fn record_webhook_event(event_type: &str, outcome: &str) {
    WEBHOOK_EVENTS_TOTAL
        .with_label_values(&[event_type, outcome])
        .inc();
}

pub fn record_quota_decision(tier: &str, allowed: bool) {
    let decision = if allowed { "allowed" } else { "denied" };
    QUOTA_DECISIONS_TOTAL
        .with_label_values(&[tier, decision])
        .inc();
}

pub fn record_provider_call(operation: &str, outcome: &str, duration_secs: f64) {
    PROVIDER_CALL_DURATION
        .with_label_values(&[operation, outcome])
        .observe(duration_secs);
}
