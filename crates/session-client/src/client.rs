//! Request pipeline
//!
//! `SessionClient` is the single call surface business code uses. It
//! attaches the anti-forgery header to unsafe requests and absorbs the two
//! recoverable failure classes:
//!
//! - `403 CSRF_TOKEN_*`: invalidate the token, refetch, replay once
//! - `401`: hand the request to the refresh coordinator once
//!
//! Both checks read the per-request `RequestContext` flags, so a second
//! failure of the same class is returned to the caller. A request replayed
//! after a refresh still gets its own anti-forgery retry; the reverse holds
//! too. The two classes are resolved one response at a time and never
//! overlap.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use common::wire::{CSRF_HEADER, CSRF_HEADER_ALIASES, LOGOUT_PATH};
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};
use transport::header::{HeaderName, HeaderValue};
use transport::{ApiRequest, ApiResponse, Transport, TransportError};

use crate::classify::{ResponseClass, classify_response};
use crate::context::RequestContext;
use crate::csrf::CsrfTokenCache;
use crate::error::{Error, Result};
use crate::events::{NoopEvents, SessionEvents};
use crate::metrics;
use crate::refresh::{RefreshCoordinator, Replay};

/// Authenticated-session client. Cheap to clone; clones share the token
/// cache and the refresh coordinator.
#[derive(Clone)]
pub struct SessionClient {
    transport: Arc<dyn Transport>,
    csrf: Arc<CsrfTokenCache>,
    coordinator: Arc<RefreshCoordinator>,
    events: Arc<dyn SessionEvents>,
}

impl SessionClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_events(transport, Arc::new(NoopEvents))
    }

    pub fn with_events(transport: Arc<dyn Transport>, events: Arc<dyn SessionEvents>) -> Self {
        let csrf = Arc::new(CsrfTokenCache::new(transport.clone()));
        let coordinator = Arc::new(RefreshCoordinator::new(
            transport.clone(),
            csrf.clone(),
            events.clone(),
        ));
        Self {
            transport,
            csrf,
            coordinator,
            events,
        }
    }

    pub fn csrf(&self) -> &CsrfTokenCache {
        &self.csrf
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Issue `request`, recovering from anti-forgery rejections and expired
    /// credentials. Any other non-2xx status is returned as `Error::Http`.
    #[instrument(skip_all, fields(method = %request.method, path = %request.path))]
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
        self.dispatch(RequestContext::new(request)).await
    }

    /// `execute`, then decode the 2xx body as JSON.
    pub async fn execute_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        let response = self.execute(request).await?;
        Ok(response.json()?)
    }

    /// Revoke the session server-side (best effort), then drop local state.
    ///
    /// Logout is exempt from the anti-forgery check, so it goes straight to
    /// the transport and never waits on a token fetch.
    pub async fn sign_out(&self) {
        match self.transport.send(ApiRequest::post(LOGOUT_PATH)).await {
            Ok(response) if !response.is_success() => {
                let err = Error::from_response(&response);
                warn!(error = %err, "logout rejected, clearing local session anyway");
            }
            Ok(_) => debug!("session revoked"),
            Err(e) => warn!(error = %e, "logout request failed, clearing local session anyway"),
        }
        self.csrf.invalidate();
        self.events.signed_out();
    }

    fn dispatch(
        &self,
        context: RequestContext,
    ) -> Pin<Box<dyn Future<Output = Result<ApiResponse>> + Send + '_>> {
        Box::pin(async move {
            let request = self.prepare(&context).await?;
            let response = self.transport.send(request).await?;

            match classify_response(&response) {
                ResponseClass::Success => Ok(response),
                ResponseClass::AntiForgeryRejected if context.can_retry_csrf() => {
                    self.retry_with_fresh_token(context, response).await
                }
                ResponseClass::CredentialExpired if context.can_retry_credential() => {
                    debug!(path = %context.request().path, "credential expired");
                    metrics::record_retry("credential");
                    self.coordinator
                        .on_credential_expired(context.with_credential_retry(), self)
                        .await
                }
                _ => Err(Error::from_response(&response)),
            }
        })
    }

    /// Clone the caller's descriptor for one attempt. Unsafe methods get the
    /// current token, with any stale alias header removed.
    async fn prepare(&self, context: &RequestContext) -> Result<ApiRequest> {
        let mut request = context.request().clone();
        if request.is_safe() {
            return Ok(request);
        }

        let token = self.csrf.get_token().await?;
        for alias in CSRF_HEADER_ALIASES {
            request.headers.remove(*alias);
        }
        let value = HeaderValue::from_str(token.expose()).map_err(|e| {
            Error::CsrfFetch(format!("anti-forgery token is not a valid header value: {e}"))
        })?;
        request
            .headers
            .insert(HeaderName::from_static(CSRF_HEADER), value);
        Ok(request)
    }

    async fn retry_with_fresh_token(
        &self,
        context: RequestContext,
        rejected: ApiResponse,
    ) -> Result<ApiResponse> {
        let original = Error::from_response(&rejected);
        debug!(path = %context.request().path, code = ?original.code(), "anti-forgery token rejected");
        let context = context.with_csrf_retry();

        self.csrf.invalidate();
        if let Err(e) = self.csrf.get_token().await {
            warn!(error = %e, "anti-forgery token refetch failed");
            return Err(original);
        }

        metrics::record_retry("csrf");
        match self.dispatch(context).await {
            // The replay never produced a response of its own
            Err(Error::Transport(TransportError::Request(_) | TransportError::Timeout(_)))
            | Err(Error::CsrfFetch(_)) => Err(original),
            outcome => outcome,
        }
    }
}

impl Replay for SessionClient {
    fn replay(&self, context: RequestContext) -> BoxFuture<'static, Result<ApiResponse>> {
        let client = self.clone();
        Box::pin(async move { client.dispatch(context).await })
    }
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("csrf_cached", &self.csrf.is_cached())
            .field("refreshing", &self.coordinator.is_refreshing())
            .finish()
    }
}
