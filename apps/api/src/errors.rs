use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::source::SourceError;
use crate::telephony::TelephonyError;

/// Errors raised by the callout operations (sync, trigger, ingest, relay).
#[derive(Debug, Error)]
pub enum CalloutError {
    #[error("Callout configuration error: {0}")]
    Configuration(String),

    #[error("Vendor authentication failed: {0}")]
    VendorAuth(#[source] TelephonyError),

    #[error("Record source error: {0}")]
    RecordSource(#[source] SourceError),

    #[error("Outcome relay failed: {0}")]
    Relay(#[source] SourceError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Vendor authentication error: {0}")]
    VendorAuth(String),

    #[error("Record source error: {0}")]
    RecordSource(String),

    #[error("Relay error: {0}")]
    Relay(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<CalloutError> for AppError {
    fn from(err: CalloutError) -> Self {
        match err {
            CalloutError::Configuration(msg) => AppError::Configuration(msg),
            CalloutError::VendorAuth(e) => AppError::VendorAuth(e.to_string()),
            CalloutError::RecordSource(e) => AppError::RecordSource(e.to_string()),
            CalloutError::Relay(e) => AppError::Relay(e.to_string()),
            CalloutError::NotFound(msg) => AppError::NotFound(msg),
            CalloutError::Validation(msg) => AppError::Validation(msg),
            CalloutError::Store(e) => AppError::Internal(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Configuration(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "CONFIGURATION_ERROR",
                msg.clone(),
            ),
            AppError::VendorAuth(msg) => {
                tracing::warn!("Vendor auth error: {msg}");
                (StatusCode::BAD_GATEWAY, "VENDOR_AUTH_ERROR", msg.clone())
            }
            AppError::RecordSource(msg) => {
                tracing::warn!("Record source error: {msg}");
                (StatusCode::BAD_GATEWAY, "RECORD_SOURCE_ERROR", msg.clone())
            }
            AppError::Relay(msg) => {
                tracing::warn!("Relay error: {msg}");
                (StatusCode::BAD_GATEWAY, "RELAY_ERROR", msg.clone())
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
