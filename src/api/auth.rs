//! Authenticated-Caller Seam
//!
//! Authentication itself (JWT, OAuth, magic links) lives in the upstream
//! gateway, which injects the verified caller id as `x-user-id`. This
//! extractor is the whole contract: protected handlers take an `AuthUser`
//! and get a 403 when the header is missing or malformed.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::ServiceError;

pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: i64,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<i64>().ok())
            .ok_or_else(|| {
                ServiceError::Forbidden("missing or invalid authenticated user".to_string())
            })?;

        Ok(AuthUser { user_id })
    }
}
