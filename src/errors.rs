use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error body returned by the HTTP edge.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    pub error: String,
    /// Machine-readable error code (e.g., "invalid_transition")
    pub code: String,
    /// Human-readable error description
    pub message: String,
    /// Whether the caller may retry the same call without changing state first
    pub retriable: bool,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

/// Crate-wide service error. All variants carry owned, cloneable data so the
/// error can be shared across single-flight waiters and event payloads.
#[derive(Debug, Clone, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    #[error("OTP does not match")]
    OtpMismatch,

    #[error("OTP has expired")]
    OtpExpired,

    #[error("Gateway authentication expired")]
    AuthExpired,

    #[error("Gateway unreachable: {0}")]
    GatewayUnreachable(String),

    #[error("Gateway rejected the request: {0}")]
    GatewayRejected(String),

    #[error("Payment status polling timed out")]
    PollTimeout,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Concurrent modification: {0}")]
    ConcurrentModification(Uuid),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Machine-readable code surfaced to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidTransition(_) => "invalid_transition",
            Self::VerificationFailed(_) => "verification_failed",
            Self::OtpMismatch => "otp_mismatch",
            Self::OtpExpired => "otp_expired",
            Self::AuthExpired => "auth_expired",
            Self::GatewayUnreachable(_) => "gateway_unreachable",
            Self::GatewayRejected(_) => "gateway_rejected",
            Self::PollTimeout => "poll_timeout",
            Self::NotFound(_) => "not_found",
            Self::ValidationError(_) => "validation_error",
            Self::Conflict(_) => "conflict",
            Self::ConcurrentModification(_) => "concurrent_modification",
            Self::InternalError(_) => "internal_error",
        }
    }

    /// Whether the same call may be retried without changing state first.
    /// Business-rule violations are never retriable; transport and
    /// evidence-gathering failures are.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::VerificationFailed(_)
                | Self::OtpMismatch
                | Self::OtpExpired
                | Self::AuthExpired
                | Self::GatewayUnreachable(_)
                | Self::PollTimeout
                | Self::ConcurrentModification(_)
        )
    }

    /// Single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidTransition(_) | Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::VerificationFailed(_) | Self::OtpMismatch | Self::OtpExpired => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::AuthExpired => StatusCode::UNAUTHORIZED,
            Self::GatewayUnreachable(_) | Self::GatewayRejected(_) => StatusCode::BAD_GATEWAY,
            Self::PollTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Conflict(_) | Self::ConcurrentModification(_) => StatusCode::CONFLICT,
            Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message suitable for HTTP responses. Internal errors return a generic
    /// message to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::InternalError(_) => "Internal server error".to_string(),
            Self::GatewayUnreachable(_) => "Payment gateway is unreachable, try again".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Unknown").to_string(),
            code: self.code().to_string(),
            message: self.response_message(),
            retriable: self.is_retriable(),
            timestamp: Utc::now().to_rfc3339(),
        };
        (status, Json(body)).into_response()
    }
}
