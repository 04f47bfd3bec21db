//! Caller identity extracted from request headers.
//!
//! Authentication happens upstream; the gateway forwards the verified user id
//! in `X-User-ID`. Handlers never see unauthenticated traffic.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "X-User-ID";

#[derive(Debug, Clone, Copy)]
pub struct UserContext {
    pub user_id: Uuid,
}

#[async_trait]
impl<S> FromRequestParts<S> for UserContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Missing X-User-ID header")))?;

        let user_id = Uuid::parse_str(raw.trim()).map_err(|_| {
            AppError::Unauthorized(anyhow::anyhow!("X-User-ID is not a valid user id"))
        })?;

        tracing::Span::current().record("user_id", tracing::field::display(user_id));

        Ok(UserContext { user_id })
    }
}
