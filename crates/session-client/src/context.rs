//! Per-request retry state
//!
//! A `RequestContext` travels with one logical request through every attempt.
//! Its two flags only ever move from false to true, and each recovery path
//! checks its own flag before acting, so neither recovery can run twice for
//! the same request.

use common::wire::is_session_endpoint;
use transport::ApiRequest;

/// Which recoveries a logical request has already used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryFlags {
    csrf: bool,
    credential: bool,
}

impl RetryFlags {
    /// Already replayed after an anti-forgery rejection.
    pub fn csrf_retried(&self) -> bool {
        self.csrf
    }

    /// Already handed to the refresh coordinator after a 401.
    pub fn credential_retried(&self) -> bool {
        self.credential
    }
}

/// The original request descriptor plus its retry flags.
///
/// The descriptor is never mutated; each attempt clones it and attaches
/// fresh headers, so a replay starts from what the caller issued.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request: ApiRequest,
    flags: RetryFlags,
}

impl RequestContext {
    pub fn new(request: ApiRequest) -> Self {
        Self {
            request,
            flags: RetryFlags::default(),
        }
    }

    pub fn request(&self) -> &ApiRequest {
        &self.request
    }

    pub fn flags(&self) -> RetryFlags {
        self.flags
    }

    /// An anti-forgery rejection may be recovered: unsafe method, first time.
    pub fn can_retry_csrf(&self) -> bool {
        !self.flags.csrf && !self.request.is_safe()
    }

    /// A 401 may be recovered: first time, and not a credential endpoint.
    pub fn can_retry_credential(&self) -> bool {
        !self.flags.credential && !is_session_endpoint(&self.request.path)
    }

    /// Mark the anti-forgery retry as used.
    pub fn with_csrf_retry(mut self) -> Self {
        self.flags.csrf = true;
        self
    }

    /// Mark the credential retry as used.
    pub fn with_credential_retry(mut self) -> Self {
        self.flags.credential = true;
        self
    }
}
