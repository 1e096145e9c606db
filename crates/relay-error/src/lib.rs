use std::collections::BTreeMap;

use axum::{http::StatusCode, http::header::RETRY_AFTER, response::IntoResponse};
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Application error type for the contact relay.
///
/// Every variant maps to exactly one HTTP status and a caller-safe message;
/// internal detail (violated security rules, recipient addresses, upstream
/// error text) stays in server-side logs and is never serialized into a
/// response body.
#[derive(Error, Debug)]
pub enum AppError {
    // ===== Relay Pipeline Errors =====
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("validation failed for {} field(s)", .0.len())]
    Validation(BTreeMap<String, String>),

    #[error("unsafe content rejected")]
    UnsafeContent,

    #[error("recipient not found or not eligible")]
    RecipientNotFound,

    #[error("recipient misconfigured: {0}")]
    RecipientMisconfigured(String),

    #[error("delivery failed: {0}")]
    DeliveryFailed(String),

    // ===== Authentication Errors =====
    #[error("authentication error: {0}")]
    Auth(String),

    // ===== Serialization Errors =====
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ===== Database & Storage Errors =====
    #[cfg(feature = "database")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[cfg(feature = "redis")]
    #[error("cache error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ===== External Services =====
    #[cfg(feature = "http")]
    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    // ===== Configuration Errors =====
    #[error("configuration error: {0}")]
    Config(String),

    // ===== Internal Server Errors =====
    #[error("internal server error: {0}")]
    Internal(String),

    // ===== Unknown/Generic Errors =====
    #[error("unknown error: {0}")]
    Unknown(#[from] anyhow::Error),
}

impl AppError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Validation(_) | AppError::UnsafeContent => StatusCode::BAD_REQUEST,
            AppError::RecipientNotFound => StatusCode::NOT_FOUND,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            #[cfg(feature = "http")]
            AppError::Reqwest(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a user-friendly error message (without sensitive details)
    pub fn user_message(&self) -> String {
        match self {
            AppError::RateLimited { retry_after_secs } => format!(
                "Rate limit exceeded. Try again in {} seconds.",
                retry_after_secs
            ),
            AppError::Validation(_) => "The submitted form contains invalid fields.".to_string(),
            AppError::UnsafeContent => "The message was rejected.".to_string(),
            AppError::RecipientNotFound => "Coach not found.".to_string(),
            AppError::Auth(msg) => format!("Authentication failed: {}", msg),
            AppError::DeliveryFailed(_) => {
                "The message could not be delivered. Please try again later.".to_string()
            }
            // Everything server-side stays generic
            _ => "Internal server error".to_string(),
        }
    }

    /// Get error code for programmatic error handling
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::RateLimited { .. } => "RATE_LIMIT_EXCEEDED",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::UnsafeContent => "UNSAFE_CONTENT",
            AppError::RecipientNotFound => "RECIPIENT_NOT_FOUND",
            AppError::RecipientMisconfigured(_) => "RECIPIENT_MISCONFIGURED",
            AppError::DeliveryFailed(_) => "DELIVERY_FAILED",
            AppError::Auth(_) => "AUTH_ERROR",
            AppError::Json(_) => "JSON_ERROR",
            #[cfg(feature = "database")]
            AppError::Database(_) => "DATABASE_ERROR",
            #[cfg(feature = "redis")]
            AppError::Redis(_) => "CACHE_ERROR",
            AppError::Io(_) => "IO_ERROR",
            #[cfg(feature = "http")]
            AppError::Reqwest(_) => "EXTERNAL_SERVICE_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
            AppError::Unknown(_) => "UNKNOWN_ERROR",
        }
    }

    /// Log this error with appropriate level and context
    pub fn log(&self) {
        let status = self.status_code();
        let code = self.error_code();

        if status.is_server_error() {
            tracing::error!(
                error = %self,
                error_code = %code,
                status = %status.as_u16(),
                "Server error occurred"
            );
        } else if status == StatusCode::UNAUTHORIZED {
            tracing::warn!(
                error = %self,
                error_code = %code,
                "Authentication failed"
            );
        } else {
            tracing::debug!(
                error = %self,
                error_code = %code,
                "Client error occurred"
            );
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        // Log the error with appropriate level
        self.log();

        let status = self.status_code();
        let error_code = self.error_code();
        let user_message = self.user_message();

        let response_body = match &self {
            // Validation rejections carry the complete per-field error map so
            // the caller sees every problem in one round trip
            AppError::Validation(fields) => json!({
                "error": user_message,
                "error_code": error_code,
                "status": status.as_u16(),
                "details": fields,
            }),
            AppError::RateLimited { .. } => json!({
                "error": "Too many requests",
                "error_code": error_code,
                "status": status.as_u16(),
                "message": user_message,
            }),
            _ if status.is_server_error() => json!({
                // Server errors never expose internal details to the client
                "error": "Internal server error",
                "error_code": error_code,
                "status": status.as_u16(),
                "message": user_message,
            }),
            _ => json!({
                "error": user_message,
                "error_code": error_code,
                "status": status.as_u16(),
            }),
        };

        let mut response = (status, axum::Json(response_body)).into_response();

        // Machine-usable backoff hint for well-behaved clients
        if let AppError::RateLimited { retry_after_secs } = &self
            && let Ok(value) = retry_after_secs.to_string().parse()
        {
            response.headers_mut().insert(RETRY_AFTER, value);
        }

        response
    }
}

// ============================================================================
// Helper functions for creating common errors
// ============================================================================

impl AppError {
    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        AppError::Auth(msg.into())
    }

    /// Create a per-field validation error
    pub fn validation(fields: BTreeMap<String, String>) -> Self {
        AppError::Validation(fields)
    }

    /// Create a delivery failure
    pub fn delivery(msg: impl Into<String>) -> Self {
        AppError::DeliveryFailed(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        AppError::Config(msg.into())
    }

    /// Create an internal server error
    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }
}
