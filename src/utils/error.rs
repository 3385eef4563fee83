//! HTTP-edge errors
//!
//! Service errors (gate, identity, upstream) are folded into `AppError`,
//! which renders the `{error, details?}` JSON body

use crate::services::client::UpstreamError;
use crate::services::entitlement::EntitlementError;
use crate::services::identity::AuthError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// User-safe message for upstream failures
pub const UPSTREAM_FAILURE_MESSAGE: &str = "Failed to generate an AI response.";

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),

    /// Request validation failed
    #[error("Request validation failed: {0}")]
    Validation(String),

    /// Authentication error
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Eligibility or ownership check failed
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Upstream provider failed after local recovery
    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    /// Internal server error
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Error response structure
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
    /// Details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl AppError {
    /// Get HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Authentication(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Config(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether detailed error information should be logged
    pub fn should_log_details(&self) -> bool {
        !matches!(
            self,
            AppError::Authentication(_) | AppError::Forbidden(_) | AppError::Validation(_)
        )
    }

    /// Convert to the JSON error body
    pub fn to_error_response(&self) -> ErrorResponse {
        match self {
            AppError::Upstream(e) => ErrorResponse {
                error: UPSTREAM_FAILURE_MESSAGE.to_string(),
                details: Some(e.to_string()),
            },
            AppError::Validation(msg)
            | AppError::Authentication(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg) => ErrorResponse {
                error: msg.clone(),
                details: None,
            },
            AppError::Config(_) | AppError::Internal(_) => ErrorResponse {
                error: "Internal server error.".to_string(),
                details: Some(self.to_string()),
            },
        }
    }
}

impl From<EntitlementError> for AppError {
    fn from(err: EntitlementError) -> Self {
        match err {
            EntitlementError::UnknownUser(_) => AppError::NotFound(err.to_string()),
            EntitlementError::Store(msg) => AppError::Internal(msg),
            _ => AppError::Forbidden(err.to_string()),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        AppError::Authentication(err.to_string())
    }
}

/// Implement IntoResponse trait to allow errors to be returned directly as HTTP responses
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Log error
        if self.should_log_details() {
            tracing::error!("Application error: {} - Status code: {}", self, status);
        } else {
            tracing::warn!("Client error: {} - Status code: {}", self, status);
        }

        (status, Json(self.to_error_response())).into_response()
    }
}

/// Result type alias
pub type AppResult<T> = Result<T, AppError>;
