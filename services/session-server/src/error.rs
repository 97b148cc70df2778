//! HTTP error responses
//!
//! Every rejection renders as `{"error":{"code","message","request_id"}}`.
//! The codes come from `common::wire::codes` so the client classifies them
//! without string drift. Refresh-time legal staleness additionally carries
//! `termsOutdated` / `privacyPolicyOutdated` beside the envelope.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use common::wire::{ErrorDetail, ErrorEnvelope, LegalFlags, RefreshFailureBody, codes};
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("anti-forgery token missing")]
    CsrfTokenMissing,

    #[error("anti-forgery token does not match")]
    CsrfTokenInvalid,

    #[error("origin not allowed: {0}")]
    OriginNotAllowed(String),

    #[error("access credential missing or expired")]
    TokenExpired,

    #[error("refresh credential missing, expired or already used")]
    RefreshTokenInvalid,

    #[error("legal documents must be re-accepted")]
    LegalAcceptanceOutdated(LegalFlags),

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("email already registered")]
    EmailTaken,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::CsrfTokenMissing
            | ApiError::CsrfTokenInvalid
            | ApiError::OriginNotAllowed(_) => StatusCode::FORBIDDEN,
            ApiError::TokenExpired
            | ApiError::RefreshTokenInvalid
            | ApiError::LegalAcceptanceOutdated(_)
            | ApiError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ApiError::EmailTaken => StatusCode::CONFLICT,
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::CsrfTokenMissing => codes::CSRF_TOKEN_MISSING,
            ApiError::CsrfTokenInvalid => codes::CSRF_TOKEN_INVALID,
            ApiError::OriginNotAllowed(_) => codes::ORIGIN_NOT_ALLOWED,
            ApiError::TokenExpired => codes::TOKEN_EXPIRED,
            ApiError::RefreshTokenInvalid => codes::REFRESH_TOKEN_INVALID,
            ApiError::LegalAcceptanceOutdated(_) => codes::LEGAL_ACCEPTANCE_OUTDATED,
            ApiError::InvalidCredentials => codes::INVALID_CREDENTIALS,
            ApiError::EmailTaken => codes::EMAIL_TAKEN,
            ApiError::InvalidRequest(_) => codes::INVALID_REQUEST,
            ApiError::Internal(_) => codes::INTERNAL,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
        // Internal details stay in the logs
        let message = match &self {
            ApiError::Internal(detail) => {
                error!(request_id = %request_id, error = %detail, "internal error");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        let detail = ErrorDetail {
            code: self.code().to_string(),
            message,
            request_id: Some(request_id),
        };
        let body = match &self {
            ApiError::LegalAcceptanceOutdated(flags) => serde_json::to_string(&RefreshFailureBody {
                error: Some(detail),
                flags: *flags,
            }),
            _ => serde_json::to_string(&ErrorEnvelope { error: detail }),
        }
        .unwrap_or_default();

        (
            self.status(),
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response()
    }
}
