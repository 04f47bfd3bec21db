//! Browser redirects coming back from the provider's card-registration page.
//!
//! Both endpoints answer with a redirect to the subscription page so the
//! browser never lands on a JSON body.

use axum::{
    extract::{Query, State},
    response::Redirect,
};

use crate::dtos::{BillingFailQuery, BillingSuccessQuery};
use crate::middleware::UserContext;
use crate::startup::AppState;

const SUBSCRIPTION_PAGE: &str = "/subscription";

fn redirect_with(status: &str, message: Option<&str>) -> Redirect {
    let target = match message {
        Some(message) => format!(
            "{}?status={}&message={}",
            SUBSCRIPTION_PAGE,
            status,
            urlencoding::encode(message)
        ),
        None => format!("{}?status={}", SUBSCRIPTION_PAGE, status),
    };
    Redirect::to(&target)
}

/// Card registration succeeded; complete the subscription.
pub async fn billing_success(
    State(state): State<AppState>,
    user: UserContext,
    Query(query): Query<BillingSuccessQuery>,
) -> Redirect {
    let (Some(auth_key), Some(customer_key)) = (
        query.auth_key.filter(|k| !k.is_empty()),
        query.customer_key.filter(|k| !k.is_empty()),
    ) else {
        tracing::warn!("Billing success redirect without authKey or customerKey");
        return redirect_with("error", Some("Missing card authentication parameters"));
    };

    if customer_key != user.user_id.to_string() {
        tracing::warn!(
            user_id = %user.user_id,
            customer_key = %customer_key,
            "Billing redirect customerKey does not match caller"
        );
        return redirect_with("error", Some("Customer key mismatch"));
    }

    match state.orchestrator.subscribe(user.user_id, &auth_key).await {
        Ok(_) => redirect_with("success", None),
        Err(e) => {
            tracing::warn!(user_id = %user.user_id, code = e.code(), "Subscribe from redirect failed");
            redirect_with("error", Some(&e.public_message()))
        }
    }
}

/// Card registration failed or was abandoned on the provider's page.
pub async fn billing_fail(Query(query): Query<BillingFailQuery>) -> Redirect {
    tracing::info!(
        code = query.code.as_deref().unwrap_or("UNKNOWN"),
        message = query.message.as_deref().unwrap_or(""),
        "Card registration failed"
    );

    let message = query
        .message
        .unwrap_or_else(|| "Card registration was not completed".to_string());
    redirect_with("fail", Some(&message))
}
