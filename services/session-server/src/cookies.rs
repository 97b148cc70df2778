//! `Set-Cookie` construction and `Cookie` parsing
//!
//! All three cookies are `HttpOnly`: the client never reads them, it only
//! echoes the anti-forgery value it received in the `/csrf-token` body.

use axum::http::header::COOKIE;
use axum::http::{HeaderMap, HeaderValue};
use common::wire::{ACCESS_COOKIE, CSRF_COOKIE, REFRESH_COOKIE, REFRESH_COOKIE_PATH};
use std::time::Duration;

use crate::error::ApiError;

#[derive(Debug, Clone, Copy)]
enum SameSite {
    Lax,
    Strict,
}

impl SameSite {
    fn as_str(self) -> &'static str {
        match self {
            SameSite::Lax => "Lax",
            SameSite::Strict => "Strict",
        }
    }
}

/// Attributes shared by every cookie the service sets.
#[derive(Debug, Clone, Copy)]
pub struct CookiePolicy {
    secure: bool,
}

impl CookiePolicy {
    pub fn new(secure: bool) -> Self {
        Self { secure }
    }

    pub fn access(&self, value: &str, ttl: Duration) -> Result<HeaderValue, ApiError> {
        self.build(ACCESS_COOKIE, value, "/", SameSite::Lax, max_age_secs(ttl))
    }

    /// Scoped to `/auth` so only the refresh and logout endpoints see it.
    pub fn refresh(&self, value: &str, ttl: Duration) -> Result<HeaderValue, ApiError> {
        self.build(
            REFRESH_COOKIE,
            value,
            REFRESH_COOKIE_PATH,
            SameSite::Lax,
            max_age_secs(ttl),
        )
    }

    pub fn csrf(&self, value: &str, ttl: Duration) -> Result<HeaderValue, ApiError> {
        self.build(CSRF_COOKIE, value, "/", SameSite::Strict, max_age_secs(ttl))
    }

    /// Expire both credential cookies. Path must match the one they were
    /// set with or the browser keeps them.
    pub fn clear_credentials(&self) -> Result<[HeaderValue; 2], ApiError> {
        Ok([
            self.build(ACCESS_COOKIE, "", "/", SameSite::Lax, 0)?,
            self.build(REFRESH_COOKIE, "", REFRESH_COOKIE_PATH, SameSite::Lax, 0)?,
        ])
    }

    fn build(
        &self,
        name: &str,
        value: &str,
        path: &str,
        same_site: SameSite,
        max_age_secs: u64,
    ) -> Result<HeaderValue, ApiError> {
        let mut cookie = format!(
            "{name}={value}; Path={path}; Max-Age={max_age_secs}; HttpOnly; SameSite={}",
            same_site.as_str()
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie)
            .map_err(|e| ApiError::Internal(format!("invalid {name} cookie: {e}")))
    }
}

/// Whole seconds, rounded up so a sub-second TTL is never `Max-Age=0`.
fn max_age_secs(ttl: Duration) -> u64 {
    ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0)
}

/// Value of cookie `name` across every `Cookie` header. Empty values count
/// as absent.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, value)| *key == name && !value.is_empty())
        .map(|(_, value)| value.to_string())
}
