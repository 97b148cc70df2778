//! Anti-forgery token cache
//!
//! Holds the token returned by `GET /csrf-token` in process memory. The
//! paired cookie lives in the transport's cookie jar; this cache only ever
//! sees the body value it has to echo back as a header.
//!
//! Concurrent callers that find the cache empty share one in-flight fetch:
//! the fetch is a `Shared` future parked in the cache state, and whichever
//! caller resumes first stores the token and clears the in-flight slot. The
//! slot is cleared on failure as well, so a failed fetch never poisons
//! later calls.

use std::sync::{Arc, Mutex, MutexGuard};

use common::Secret;
use common::wire::{CSRF_TOKEN_PATH, CsrfTokenBody};
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tracing::{debug, warn};
use transport::{ApiRequest, Transport};

use crate::error::{Error, Result};
use crate::metrics;

type TokenFetch = Shared<BoxFuture<'static, Result<Secret<String>>>>;

#[derive(Default)]
struct CacheState {
    token: Option<Secret<String>>,
    /// Fetch id plus the shared fetch. The id keeps a slow caller of an old
    /// fetch from clearing a newer one.
    inflight: Option<(u64, TokenFetch)>,
    next_id: u64,
}

/// Process-wide anti-forgery token cache.
pub struct CsrfTokenCache {
    transport: Arc<dyn Transport>,
    state: Mutex<CacheState>,
}

impl CsrfTokenCache {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Return the cached token, fetching it first if the cache is empty.
    pub async fn get_token(&self) -> Result<Secret<String>> {
        let (id, fetch) = {
            let mut state = self.lock();
            if let Some(token) = &state.token {
                return Ok(token.clone());
            }
            match &state.inflight {
                Some((id, fetch)) => (*id, fetch.clone()),
                None => {
                    let id = state.next_id;
                    state.next_id += 1;
                    let fetch = fetch_token(self.transport.clone()).boxed().shared();
                    state.inflight = Some((id, fetch.clone()));
                    (id, fetch)
                }
            }
        };

        let result = fetch.await;

        let mut state = self.lock();
        if state
            .inflight
            .as_ref()
            .is_some_and(|(current, _)| *current == id)
        {
            state.inflight = None;
            if let Ok(token) = &result {
                state.token = Some(token.clone());
            }
        }
        result
    }

    /// Drop the cached token so the next `get_token` fetches a fresh one.
    /// A fetch already in flight is left alone; its token is newer than the
    /// one being discarded.
    pub fn invalidate(&self) {
        if self.lock().token.take().is_some() {
            debug!("anti-forgery token invalidated");
        }
    }

    pub fn is_cached(&self) -> bool {
        self.lock().token.is_some()
    }

    pub fn is_fetching(&self) -> bool {
        self.lock().inflight.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

async fn fetch_token(transport: Arc<dyn Transport>) -> Result<Secret<String>> {
    let result = request_token(transport.as_ref()).await;
    match &result {
        Ok(_) => {
            metrics::record_csrf_fetch("success");
            debug!("fetched anti-forgery token");
        }
        Err(e) => {
            metrics::record_csrf_fetch("failure");
            warn!(error = %e, "anti-forgery token fetch failed");
        }
    }
    result
}

async fn request_token(transport: &dyn Transport) -> Result<Secret<String>> {
    let response = transport
        .send(ApiRequest::get(CSRF_TOKEN_PATH))
        .await
        .map_err(|e| Error::CsrfFetch(e.to_string()))?;
    if !response.is_success() {
        return Err(Error::CsrfFetch(format!(
            "{CSRF_TOKEN_PATH} returned {}",
            response.status.as_u16()
        )));
    }
    let body: CsrfTokenBody = response
        .json()
        .map_err(|e| Error::CsrfFetch(e.to_string()))?;
    if body.token.is_empty() {
        return Err(Error::CsrfFetch(format!("{CSRF_TOKEN_PATH} returned an empty token")));
    }
    Ok(Secret::new(body.token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockTransport, rejection, token, wait_until};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use transport::StatusCode;

    #[tokio::test]
    async fn first_call_fetches_and_later_calls_hit_the_cache() {
        let transport = MockTransport::new(|_| token("t1"));
        let cache = CsrfTokenCache::new(transport.clone());

        assert!(!cache.is_cached());
        assert_eq!(cache.get_token().await.unwrap().expose(), "t1");
        assert_eq!(cache.get_token().await.unwrap().expose(), "t1");

        assert!(cache.is_cached());
        assert_eq!(transport.log(), vec!["GET /csrf-token"]);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_fetch() {
        let transport = MockTransport::new(|_| token("shared"));
        let gate = transport.gate(CSRF_TOKEN_PATH);
        let cache = Arc::new(CsrfTokenCache::new(transport.clone()));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.get_token().await }));
        }
        wait_until(|| transport.count(CSRF_TOKEN_PATH) == 1).await;
        for _ in 0..100 {
            tokio::task::yield_now().await;
        }
        assert!(cache.is_fetching());

        gate.add_permits(1);
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().expose(), "shared");
        }
        assert_eq!(transport.count(CSRF_TOKEN_PATH), 1);
        assert!(!cache.is_fetching());
    }

    #[tokio::test]
    async fn invalidate_forces_a_refetch() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let counter = fetches.clone();
        let transport = MockTransport::new(move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            token(&format!("t{n}"))
        });
        let cache = CsrfTokenCache::new(transport.clone());

        assert_eq!(cache.get_token().await.unwrap().expose(), "t1");
        cache.invalidate();
        assert!(!cache.is_cached());
        assert_eq!(cache.get_token().await.unwrap().expose(), "t2");
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_fetch_does_not_poison_the_cache() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let transport = MockTransport::new(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                rejection(StatusCode::SERVICE_UNAVAILABLE, "INTERNAL")
            } else {
                token("recovered")
            }
        });
        let cache = CsrfTokenCache::new(transport.clone());

        let err = cache.get_token().await.unwrap_err();
        assert_eq!(err, Error::CsrfFetch("/csrf-token returned 503".into()));
        assert!(!cache.is_fetching());
        assert!(!cache.is_cached());

        assert_eq!(cache.get_token().await.unwrap().expose(), "recovered");
        assert_eq!(transport.count(CSRF_TOKEN_PATH), 2);
    }

    #[tokio::test]
    async fn network_failure_is_a_fetch_error() {
        let transport =
            MockTransport::new(|_| Err(transport::TransportError::Request("refused".into())));
        let cache = CsrfTokenCache::new(transport);

        let err = cache.get_token().await.unwrap_err();
        assert!(matches!(err, Error::CsrfFetch(ref m) if m.contains("refused")), "got: {err:?}");
    }

    #[tokio::test]
    async fn empty_token_is_rejected() {
        let transport = MockTransport::new(|_| token(""));
        let cache = CsrfTokenCache::new(transport);

        assert!(matches!(cache.get_token().await, Err(Error::CsrfFetch(_))));
        assert!(!cache.is_cached());
    }

    #[tokio::test]
    async fn invalidate_during_fetch_keeps_the_fresh_token() {
        let transport = MockTransport::new(|_| token("fresh"));
        let gate = transport.gate(CSRF_TOKEN_PATH);
        let cache = Arc::new(CsrfTokenCache::new(transport.clone()));

        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_token().await })
        };
        wait_until(|| transport.count(CSRF_TOKEN_PATH) == 1).await;
        cache.invalidate();
        gate.add_permits(1);

        assert_eq!(waiter.await.unwrap().unwrap().expose(), "fresh");
        assert!(cache.is_cached());
        assert_eq!(transport.count(CSRF_TOKEN_PATH), 1);
    }
}
