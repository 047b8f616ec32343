//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use payledger_core::LedgerError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing or invalid webhook signature.
    #[error("unauthorized")]
    Unauthorized,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Conflict - the account or charge is in a state that forbids the request.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Temporarily unable to complete; the caller should retry.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// External service error.
    #[error("external service error: {0}")]
    ExternalService(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", self.to_string()),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone()),
            Self::Unavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "unavailable",
                msg.clone(),
            ),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
            Self::ExternalService(msg) => (
                StatusCode::BAD_GATEWAY,
                "external_service_error",
                msg.clone(),
            ),
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::AccountNotSetup { .. }
            | LedgerError::NotFound { .. }
            | LedgerError::UnknownGatewayRef(_) => Self::NotFound(err.to_string()),
            LedgerError::AccountDisabled { .. } => Self::Conflict(err.to_string()),
            LedgerError::InvalidAmount(_)
            | LedgerError::InvalidInput(_)
            | LedgerError::SourceInvalid { .. }
            | LedgerError::InvalidId(_) => Self::BadRequest(err.to_string()),
            LedgerError::GatewayTimeout { .. }
            | LedgerError::Gateway(_)
            | LedgerError::GatewayUnreachable(_) => {
                Self::ExternalService(err.to_string())
            }
            LedgerError::LedgerConflict { .. } => Self::Unavailable(err.to_string()),
            LedgerError::Storage(_)
            | LedgerError::Serialization(_)
            | LedgerError::Configuration(_) => Self::Internal(err.to_string()),
        }
    }
}
