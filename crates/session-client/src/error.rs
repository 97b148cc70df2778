//! Error types for the session transport core

use common::wire::ErrorEnvelope;
use transport::{ApiResponse, TransportError};

use crate::events::LegalDocument;

/// Maximum number of raw body characters kept when a response has no
/// JSON error envelope.
const MAX_ERROR_CHARS: usize = 200;

/// Terminal outcomes surfaced to callers of `SessionClient::execute`.
///
/// `Clone` because a single refresh failure is delivered to every request
/// queued behind it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("request failed ({status}): {message}")]
    Http {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("anti-forgery token fetch failed: {0}")]
    CsrfFetch(String),

    #[error("credential refresh failed: {0}")]
    RefreshFailed(String),

    #[error("{0} acceptance is outdated")]
    LegalAcceptanceOutdated(LegalDocument),

    #[error("credential refresh abandoned before completion")]
    RefreshAbandoned,
}

impl Error {
    /// Build the terminal error for a non-2xx response, preferring the
    /// server's `{"error":{"code","message"}}` envelope.
    pub fn from_response(response: &ApiResponse) -> Self {
        let status = response.status.as_u16();
        match response.json::<ErrorEnvelope>() {
            Ok(envelope) => Error::Http {
                status,
                code: Some(envelope.error.code),
                message: envelope.error.message,
            },
            Err(_) => {
                let text = response.text();
                let message = if text.trim().is_empty() {
                    response
                        .status
                        .canonical_reason()
                        .unwrap_or("unknown status")
                        .to_string()
                } else {
                    text.chars().take(MAX_ERROR_CHARS).collect()
                };
                Error::Http {
                    status,
                    code: None,
                    message,
                }
            }
        }
    }

    /// HTTP status of a terminal response, if the error came from one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Machine-readable server code, if the response carried one.
    pub fn code(&self) -> Option<&str> {
        match self {
            Error::Http { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Whether this error ended (or suspended) the session rather than
    /// just the request.
    pub fn ends_session(&self) -> bool {
        matches!(
            self,
            Error::RefreshFailed(_) | Error::LegalAcceptanceOutdated(_)
        )
    }
}

/// Result alias for session transport operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use transport::StatusCode;

    #[test]
    fn from_response_reads_error_envelope() {
        let response = ApiResponse::json_value(
            StatusCode::FORBIDDEN,
            &serde_json::json!({
                "error": {"code": "ORIGIN_NOT_ALLOWED", "message": "origin rejected", "request_id": "req_1"}
            }),
        );
        let err = Error::from_response(&response);
        assert_eq!(err.status(), Some(403));
        assert_eq!(err.code(), Some("ORIGIN_NOT_ALLOWED"));
        assert_eq!(err.to_string(), "request failed (403): origin rejected");
    }

    #[test]
    fn from_response_truncates_plain_bodies() {
        let body = "x".repeat(500);
        let err = Error::from_response(&ApiResponse::new(StatusCode::BAD_GATEWAY, body));
        match err {
            Error::Http { code, message, .. } => {
                assert!(code.is_none());
                assert_eq!(message.len(), MAX_ERROR_CHARS);
            }
            other => panic!("expected Http error, got {other:?}"),
        }
    }

    #[test]
    fn from_response_falls_back_to_reason_phrase() {
        let err = Error::from_response(&ApiResponse::new(StatusCode::NOT_FOUND, ""));
        assert_eq!(err.to_string(), "request failed (404): Not Found");
    }

    #[test]
    fn session_ending_errors() {
        assert!(Error::RefreshFailed("401".into()).ends_session());
        assert!(Error::LegalAcceptanceOutdated(LegalDocument::Terms).ends_session());
        assert!(!Error::RefreshAbandoned.ends_session());
        assert!(!Error::CsrfFetch("500".into()).ends_session());
    }

    #[test]
    fn legal_error_names_the_document() {
        assert_eq!(
            Error::LegalAcceptanceOutdated(LegalDocument::PrivacyPolicy).to_string(),
            "privacy policy acceptance is outdated"
        );
    }
}
