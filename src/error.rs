//! Error types for sessionauth
//!
//! All request-level errors are converted to `AppError`,
//! which implements `IntoResponse` for proper HTTP error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::auth::store::StoreError;

/// Application-wide error type
///
/// Every variant maps to one HTTP status. Server-side variants
/// render a generic message so internal detail never reaches the client.
#[derive(Debug, Error)]
pub enum AppError {
    /// Missing or malformed input (400)
    #[error("{0}")]
    BadRequest(String),

    /// Authentication required or rejected (401)
    #[error("Unauthorized")]
    Unauthorized,

    /// Identity provider metadata is not available right now (503)
    #[error("Identity provider unavailable")]
    ServiceUnavailable,

    /// Database error (500)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Session store error (500)
    #[error("Session store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error (500)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error (500)
    ///
    /// The first field is the client-facing message.
    #[error("{0}: {1}")]
    Internal(String, #[source] anyhow::Error),
}

impl AppError {
    /// Wrap an unexpected failure with the message shown to the client.
    pub fn internal(message: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        AppError::Internal(message.into(), source.into())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl IntoResponse for AppError {
    /// Convert error to HTTP response
    ///
    /// Body is always `{"message": "..."}`.
    fn into_response(self) -> Response {
        use axum::Json;

        let (status, message, error_type) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), "bad_request"),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string(), "unauthorized"),
            AppError::ServiceUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                self.to_string(),
                "service_unavailable",
            ),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                "database",
            ),
            AppError::Store(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                "session_store",
            ),
            AppError::Config(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                "config",
            ),
            AppError::Internal(msg, _) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone(), "internal"),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        use crate::metrics::ERRORS_TOTAL;
        ERRORS_TOTAL.with_label_values(&[error_type]).inc();

        let body = Json(serde_json::json!({
            "message": message,
        }));

        (status, body).into_response()
    }
}
