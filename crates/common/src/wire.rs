//! Wire contract between the session client and the session server
//!
//! Paths, cookie and header names, machine-readable error codes and the JSON
//! bodies exchanged by the anti-forgery and credential endpoints. Both sides
//! import these so the client's failure classification and the server's
//! rejections cannot drift apart.

use serde::{Deserialize, Serialize};

/// Anti-forgery token issuance (safe method, no token required).
pub const CSRF_TOKEN_PATH: &str = "/csrf-token";
/// Credential rotation; relies on the refresh cookie only.
pub const REFRESH_PATH: &str = "/auth/refresh";
/// Server-side credential revocation.
pub const LOGOUT_PATH: &str = "/auth/logout";
pub const LOGIN_PATH: &str = "/auth/login";
pub const REGISTER_PATH: &str = "/auth/register";

/// Endpoints that establish or tear down the credential pair. A 401 from
/// these means the attempt itself failed, so they never trigger a refresh.
pub const SESSION_ENDPOINTS: &[&str] = &[LOGIN_PATH, REGISTER_PATH, REFRESH_PATH, LOGOUT_PATH];

/// Unsafe endpoints that skip the token comparison (origin is still
/// checked). Both act only on credentials the browser scopes to `/auth`.
pub const CSRF_EXEMPT_PATHS: &[&str] = &[REFRESH_PATH, LOGOUT_PATH];

/// Header the client echoes the anti-forgery token in.
pub const CSRF_HEADER: &str = "x-csrf-token";
/// Every header name the server accepts for the anti-forgery token.
pub const CSRF_HEADER_ALIASES: &[&str] = &["x-csrf-token", "x-xsrf-token", "csrf-token"];

pub const CSRF_COOKIE: &str = "csrf_token";
pub const ACCESS_COOKIE: &str = "access_token";
pub const REFRESH_COOKIE: &str = "refresh_token";
/// The refresh credential is only ever sent to the auth endpoints.
pub const REFRESH_COOKIE_PATH: &str = "/auth";

/// Machine-readable error codes carried in `error.code`.
pub mod codes {
    pub const CSRF_TOKEN_MISSING: &str = "CSRF_TOKEN_MISSING";
    pub const CSRF_TOKEN_INVALID: &str = "CSRF_TOKEN_INVALID";
    pub const ORIGIN_NOT_ALLOWED: &str = "ORIGIN_NOT_ALLOWED";
    pub const TOKEN_EXPIRED: &str = "TOKEN_EXPIRED";
    pub const REFRESH_TOKEN_INVALID: &str = "REFRESH_TOKEN_INVALID";
    pub const LEGAL_ACCEPTANCE_OUTDATED: &str = "LEGAL_ACCEPTANCE_OUTDATED";
    pub const INVALID_CREDENTIALS: &str = "INVALID_CREDENTIALS";
    pub const EMAIL_TAKEN: &str = "EMAIL_TAKEN";
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    pub const INTERNAL: &str = "INTERNAL";
}

/// Whether `path` is one of the credential lifecycle endpoints.
pub fn is_session_endpoint(path: &str) -> bool {
    let path = path.split('?').next().unwrap_or(path);
    SESSION_ENDPOINTS.contains(&path)
}

/// Whether `path` skips the anti-forgery token comparison.
pub fn is_csrf_exempt(path: &str) -> bool {
    let path = path.split('?').next().unwrap_or(path);
    CSRF_EXEMPT_PATHS.contains(&path)
}

/// Body of `GET /csrf-token`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsrfTokenBody {
    pub token: String,
}

/// `{"error": {...}}` envelope used by every rejection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Legal-document staleness flags attached to a refresh response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegalFlags {
    #[serde(default)]
    pub terms_outdated: bool,
    #[serde(default)]
    pub privacy_policy_outdated: bool,
}

impl LegalFlags {
    pub fn any(&self) -> bool {
        self.terms_outdated || self.privacy_policy_outdated
    }
}

/// Body of a non-2xx `POST /auth/refresh`. Both parts are optional so a
/// bare status with an empty body still parses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefreshFailureBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    #[serde(flatten)]
    pub flags: LegalFlags,
}
