//! Service Error Taxonomy
//!
//! Every failure the trading and query services can surface maps to a
//! stable machine code plus a human message. Handlers convert these into
//! JSON envelopes; retryability is part of the contract.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Errors returned (not raised) by the command and query services.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("Insufficient funds: required {required_cents} cents, available {available_cents}")]
    InsufficientFunds {
        required_cents: i64,
        available_cents: i64,
    },

    #[error("Market is closed for trading: {0}")]
    MarketClosed(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Engine queue full, try again")]
    TryAgain,

    #[error("Operation timed out")]
    Timeout,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Stable machine-readable code surfaced in API bodies and logs.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::InvalidArgument(_) => "INVALID_ARGUMENT",
            ServiceError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            ServiceError::MarketClosed(_) => "MARKET_CLOSED",
            ServiceError::NotFound(_) => "NOT_FOUND",
            ServiceError::Forbidden(_) => "FORBIDDEN",
            ServiceError::Conflict(_) => "CONFLICT",
            ServiceError::TryAgain => "TRY_AGAIN",
            ServiceError::Timeout => "TIMEOUT",
            ServiceError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ServiceError::InsufficientFunds { .. } => StatusCode::CONFLICT,
            ServiceError::MarketClosed(_) => StatusCode::CONFLICT,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::TryAgain => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the caller may safely retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::Conflict(_) | ServiceError::TryAgain | ServiceError::Timeout
        )
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        ServiceError::InvalidArgument(msg.into())
    }

    pub fn internal(msg: impl std::fmt::Display) -> Self {
        ServiceError::Internal(msg.to_string())
    }
}

impl From<sqlx::Error> for ServiceError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => ServiceError::NotFound("row".to_string()),
            // Unique/serialization violations are retryable conflicts.
            sqlx::Error::Database(db) if db.code().as_deref() == Some("40001") => {
                ServiceError::Conflict("serialization failure".to_string())
            }
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

impl From<redis::RedisError> for ServiceError {
    fn from(e: redis::RedisError) -> Self {
        ServiceError::Internal(format!("cache: {e}"))
    }
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ApiErrorBody>,
    pub timestamp: i64,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(ApiErrorBody {
                code: self.code().to_string(),
                message: self.to_string(),
                retryable: self.is_retryable(),
            }),
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ServiceError::invalid("bad price").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::InsufficientFunds {
                required_cents: 2500,
                available_cents: 1000
            }
            .status(),
            StatusCode::CONFLICT
        );
        assert_eq!(ServiceError::Timeout.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(ServiceError::TryAgain.is_retryable());
        assert!(ServiceError::Timeout.is_retryable());
        assert!(!ServiceError::invalid("x").is_retryable());
        assert!(!ServiceError::Internal("x".into()).is_retryable());
    }
}
