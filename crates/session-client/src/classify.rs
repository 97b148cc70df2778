//! Response classification
//!
//! Sorts every response into the recoverable failure classes the pipeline
//! handles itself and the terminal ones it hands back to the caller. Only an
//! exact `403` + anti-forgery code counts as a token problem; other 403s
//! (origin rejections, authorization failures) pass through untouched.

use common::wire::{ErrorEnvelope, RefreshFailureBody, codes};
use transport::ApiResponse;

use crate::error::Error;
use crate::events::LegalDocument;

/// Codes that mean the anti-forgery token was absent or did not match.
const ANTI_FORGERY_CODES: &[&str] = &[codes::CSRF_TOKEN_INVALID, codes::CSRF_TOKEN_MISSING];

/// What the pipeline should do with a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    /// 2xx, hand back to the caller
    Success,
    /// 403 with an anti-forgery code: refetch the token and replay once
    AntiForgeryRejected,
    /// 401: go through the refresh coordinator once
    CredentialExpired,
    /// Anything else, surfaced unchanged
    Terminal,
}

/// Classify a response by status and machine-readable code.
pub fn classify_response(response: &ApiResponse) -> ResponseClass {
    if response.is_success() {
        return ResponseClass::Success;
    }
    match response.status.as_u16() {
        403 if error_code(response)
            .is_some_and(|code| ANTI_FORGERY_CODES.contains(&code.as_str())) =>
        {
            ResponseClass::AntiForgeryRejected
        }
        401 => ResponseClass::CredentialExpired,
        _ => ResponseClass::Terminal,
    }
}

/// The `error.code` of a JSON error envelope, if present.
pub fn error_code(response: &ApiResponse) -> Option<String> {
    response
        .json::<ErrorEnvelope>()
        .ok()
        .map(|envelope| envelope.error.code)
}

/// The legal document a refresh response asks the user to re-accept.
pub fn legal_document(response: &ApiResponse) -> Option<LegalDocument> {
    response
        .json::<RefreshFailureBody>()
        .ok()
        .and_then(|body| LegalDocument::from_flags(body.flags))
}

/// Turn a non-2xx refresh response into the error every queued request
/// receives. Legal staleness is kept distinct so the session survives it.
pub fn classify_refresh_failure(response: &ApiResponse) -> Error {
    let body = response.json::<RefreshFailureBody>().unwrap_or_default();
    if let Some(document) = LegalDocument::from_flags(body.flags) {
        return Error::LegalAcceptanceOutdated(document);
    }

    let status = response.status.as_u16();
    let detail = match body.error {
        Some(detail) => format!("{}: {}", detail.code, detail.message),
        None => response
            .status
            .canonical_reason()
            .unwrap_or("unknown status")
            .to_string(),
    };
    Error::RefreshFailed(format!("refresh returned {status}: {detail}"))
}
