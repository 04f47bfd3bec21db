//! Cancel and resume tests.

mod common;

use chrono::Duration;
use common::{default_now, Harness};
use subscription_service::models::{SubscriptionStatus, SubscriptionTier};
use subscription_service::services::Clock;

#[tokio::test]
async fn cancel_keeps_benefits_until_next_billing_date() {
    let h = Harness::new();
    let user = h.store.add_user(SubscriptionTier::Free);
    let created = h
        .orchestrator
        .subscribe(user, "auth_123")
        .await
        .unwrap()
        .subscription;

    let canceled = h
        .orchestrator
        .cancel(user, Some("too expensive"))
        .await
        .unwrap();

    assert_eq!(canceled.status, SubscriptionStatus::Canceled);
    assert_eq!(canceled.canceled_at, Some(default_now()));
    assert_eq!(canceled.next_billing_date, created.next_billing_date);
    // Tier is not touched by cancel.
    assert_eq!(h.store.tier(user), Some(SubscriptionTier::Pro));
    assert!(h.provider.deleted_keys().is_empty());
}

#[tokio::test]
async fn cancel_without_subscription_is_not_found() {
    let h = Harness::new();
    let user = h.store.add_user(SubscriptionTier::Free);

    let err = h.orchestrator.cancel(user, None).await.unwrap_err();

    assert_eq!(err.code(), "SUBSCRIPTION_NOT_FOUND");
}

#[tokio::test]
async fn cancel_twice_is_a_conflict() {
    let h = Harness::new();
    let user = h.store.add_user(SubscriptionTier::Free);
    h.orchestrator.subscribe(user, "auth_123").await.unwrap();
    h.orchestrator.cancel(user, None).await.unwrap();

    let err = h.orchestrator.cancel(user, None).await.unwrap_err();

    assert_eq!(err.code(), "SUBSCRIPTION_NOT_ACTIVE");
}

#[tokio::test]
async fn resume_reactivates_within_the_benefit_period() {
    let h = Harness::new();
    let user = h.store.add_user(SubscriptionTier::Free);
    h.orchestrator.subscribe(user, "auth_123").await.unwrap();
    h.orchestrator.cancel(user, None).await.unwrap();

    h.clock.set(default_now() + Duration::days(10));
    let resumed = h.orchestrator.resume(user).await.unwrap();

    assert_eq!(resumed.status, SubscriptionStatus::Active);
    assert!(resumed.canceled_at.is_none());
    // No new charge on resume.
    assert_eq!(h.provider.charges.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn resume_at_or_after_expiry_is_rejected() {
    let h = Harness::new();
    let user = h.store.add_user(SubscriptionTier::Free);
    let sub = h
        .orchestrator
        .subscribe(user, "auth_123")
        .await
        .unwrap()
        .subscription;
    h.orchestrator.cancel(user, None).await.unwrap();

    h.clock.set(sub.next_billing_date);
    let err = h.orchestrator.resume(user).await.unwrap_err();

    assert_eq!(err.code(), "SUBSCRIPTION_EXPIRED");
    let current = h.orchestrator.current_subscription(user).await.unwrap().unwrap();
    assert_eq!(current.status, SubscriptionStatus::Canceled);
    assert_eq!(current.effective_status(h.clock.now()), SubscriptionStatus::Expired);
}

#[tokio::test]
async fn resume_of_active_subscription_is_a_conflict() {
    let h = Harness::new();
    let user = h.store.add_user(SubscriptionTier::Free);
    h.orchestrator.subscribe(user, "auth_123").await.unwrap();

    let err = h.orchestrator.resume(user).await.unwrap_err();

    assert_eq!(err.code(), "SUBSCRIPTION_ALREADY_ACTIVE");
}

#[tokio::test]
async fn resume_without_subscription_is_not_found() {
    let h = Harness::new();
    let user = h.store.add_user(SubscriptionTier::Free);

    let err = h.orchestrator.resume(user).await.unwrap_err();

    assert_eq!(err.code(), "SUBSCRIPTION_NOT_FOUND");
}

#[tokio::test]
async fn payment_histories_are_newest_first_and_paged() {
    let h = Harness::new();
    let user = h.store.add_user(SubscriptionTier::Free);

    for day in 0..3 {
        h.clock.set(default_now() + Duration::days(40 * day));
        h.orchestrator.subscribe(user, "auth").await.unwrap();
        h.orchestrator.cancel(user, None).await.unwrap();
    }

    let first_page = h.orchestrator.payment_histories(user, 1, 2).await.unwrap();
    let second_page = h.orchestrator.payment_histories(user, 2, 2).await.unwrap();

    assert_eq!(first_page.len(), 2);
    assert_eq!(second_page.len(), 1);
    assert!(first_page[0].paid_at > first_page[1].paid_at);
    assert!(first_page[1].paid_at > second_page[0].paid_at);
}
