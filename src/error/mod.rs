use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Result type for quota operations
pub type Result<T> = std::result::Result<T, QuotaError>;

/// Quota engine error types
#[derive(Error, Debug)]
pub enum QuotaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Counter store {operation} timed out after {timeout:?}")]
    StoreTimeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("Malformed counter store reply: {0}")]
    MalformedReply(String),

    #[error("Counter store is closed")]
    StoreClosed,

    #[error("missing API key")]
    MissingApiKey,

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl QuotaError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            QuotaError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            QuotaError::Redis(_) => StatusCode::SERVICE_UNAVAILABLE,
            QuotaError::StoreTimeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
            QuotaError::MalformedReply(_) => StatusCode::BAD_GATEWAY,
            QuotaError::StoreClosed => StatusCode::SERVICE_UNAVAILABLE,
            QuotaError::MissingApiKey => StatusCode::UNAUTHORIZED,
            QuotaError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            QuotaError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the error originates from the counter store backend
    pub fn is_backend(&self) -> bool {
        matches!(
            self,
            QuotaError::Redis(_)
                | QuotaError::StoreTimeout { .. }
                | QuotaError::MalformedReply(_)
                | QuotaError::StoreClosed
        )
    }
}

impl IntoResponse for QuotaError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
