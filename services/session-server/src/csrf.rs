//! Double-submit anti-forgery validation
//!
//! Unsafe requests pass two gates, in order:
//!
//! 1. Origin: the `Origin` header (or the origin part of `Referer`) must be
//!    on the allow-list. Requests that declare neither skip to step 2.
//! 2. Token: the `csrf_token` cookie and one of the accepted headers must
//!    both be present (`CSRF_TOKEN_MISSING`) and equal
//!    (`CSRF_TOKEN_INVALID`). Refresh and logout skip this step.
//!
//! Safe methods bypass both. `GET /csrf-token` issues the pair.

use axum::extract::{Request, State};
use axum::http::header::{CACHE_CONTROL, ORIGIN, REFERER, SET_COOKIE};
use axum::http::{HeaderMap, Method};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use common::Secret;
use common::wire::{CSRF_COOKIE, CSRF_HEADER_ALIASES, CsrfTokenBody, is_csrf_exempt};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::AppState;
use crate::cookies::read_cookie;
use crate::error::ApiError;
use crate::metrics;
use crate::session::random_token;

pub struct CsrfPolicy {
    allowed_origins: Vec<String>,
    token_ttl: Duration,
}

impl CsrfPolicy {
    pub fn new(allowed_origins: Vec<String>, token_ttl: Duration) -> Self {
        let allowed_origins = allowed_origins
            .into_iter()
            .map(|origin| origin_of(&origin).unwrap_or(origin))
            .collect();
        Self {
            allowed_origins,
            token_ttl,
        }
    }

    pub fn token_ttl(&self) -> Duration {
        self.token_ttl
    }

    fn allows(&self, origin: &str) -> bool {
        self.allowed_origins
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(origin))
    }

    /// Run the origin and token gates for one request.
    pub fn check(&self, method: &Method, path: &str, headers: &HeaderMap) -> Result<(), ApiError> {
        if is_safe_method(method) {
            return Ok(());
        }

        if let Some(origin) = declared_origin(headers)
            && !self.allows(&origin)
        {
            return Err(ApiError::OriginNotAllowed(origin));
        }

        if is_csrf_exempt(path) {
            return Ok(());
        }

        let cookie = read_cookie(headers, CSRF_COOKIE).ok_or(ApiError::CsrfTokenMissing)?;
        let submitted = submitted_token(headers).ok_or(ApiError::CsrfTokenMissing)?;
        if Secret::new(cookie).matches(&submitted) {
            Ok(())
        } else {
            Err(ApiError::CsrfTokenInvalid)
        }
    }
}

fn is_safe_method(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// First non-empty anti-forgery header among the accepted names.
fn submitted_token(headers: &HeaderMap) -> Option<String> {
    CSRF_HEADER_ALIASES
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|value| value.to_str().ok())
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

/// The origin a request declares. An unreadable value is reported as
/// `null`, which no allow-list contains.
fn declared_origin(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(ORIGIN).or_else(|| headers.get(REFERER))?;
    Some(
        value
            .to_str()
            .ok()
            .and_then(origin_of)
            .unwrap_or_else(|| "null".into()),
    )
}

/// Serialized origin of an absolute URL, with host case and default
/// ports normalized.
fn origin_of(value: &str) -> Option<String> {
    let url = Url::parse(value).ok()?;
    url.has_host().then(|| url.origin().ascii_serialization())
}

/// Middleware applying `CsrfPolicy::check` to every route.
pub async fn verify_request(State(state): State<AppState>, request: Request, next: Next) -> Response {
    match state
        .csrf
        .check(request.method(), request.uri().path(), request.headers())
    {
        Ok(()) => next.run(request).await,
        Err(err) => {
            metrics::record_csrf_rejection(err.code());
            warn!(
                method = %request.method(),
                path = %request.uri().path(),
                code = err.code(),
                "anti-forgery check rejected request"
            );
            err.into_response()
        }
    }
}

/// `GET /csrf-token`: set a fresh token cookie and return the same value.
pub async fn issue_token(State(state): State<AppState>) -> Result<Response, ApiError> {
    let token = random_token();
    let cookie = state.cookies.csrf(&token, state.csrf.token_ttl())?;
    debug!("issued anti-forgery token");
    Ok((
        [(SET_COOKIE, cookie)],
        [(CACHE_CONTROL, "no-store")],
        Json(CsrfTokenBody { token }),
    )
        .into_response())
}
