//! Error types for the live session service
//!
//! Errors are converted to appropriate HTTP responses for API clients.
//! Webhook processing deliberately swallows most of these (the media
//! server must see 200 once the event is durably logged); everywhere
//! else they surface as JSON error bodies.

use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use thiserror::Error;

/// Result type for live-session-service operations
pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed or unsigned request body
    #[error("Validation error: {0}")]
    Validation(String),

    /// Caller is not authenticated
    #[error("Unauthorized: {0}")]
    Authentication(String),

    /// Caller lacks the required role
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Unknown session, report or ban id
    #[error("Not found: {0}")]
    NotFound(String),

    /// Existing state forbids the operation (e.g. report already resolved)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Datastore or network hiccup, safe to retry with backoff
    #[error("Transient error: {0}")]
    Transient(String),

    /// Database operation failed
    #[error("Database error: {0}")]
    Database(String),

    /// Invariant violation; aborts the enclosing transaction entirely
    #[error("Fatal error: {0}")]
    Fatal(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether a bounded internal retry is worthwhile
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Transient(_) | AppError::Database(_))
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Authentication(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Database(_) | AppError::Fatal(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        HttpResponse::build(status).json(serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                AppError::Transient(err.to_string())
            }
            other => AppError::Database(other.to_string()),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::Transient(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Validation(err.to_string())
    }
}
