//! Single-flight credential refresh
//!
//! The first request to report an expired credential becomes the leader: it
//! flips the coordinator to `InFlight` and issues the one `POST
//! /auth/refresh`. Every request that reports expiry while that call is
//! outstanding is pushed onto the same queue instead of starting its own.
//! When the call concludes the queue is drained exactly once:
//!
//! - success: every queued request (the leader's included) is replayed in
//!   arrival order on a spawned task, and each caller resolves as soon as
//!   its own replay does. Cancelling the leader after this point does not
//!   affect anyone else
//! - failure: every queued request receives a clone of the refresh error,
//!   and the session side effect (sign-out, or re-acceptance for outdated
//!   legal documents) fires once
//!
//! The state lives behind a `std::sync::Mutex` that is never held across an
//! await, so the check-and-set of the in-flight flag is atomic.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use common::wire::REFRESH_PATH;
use futures_util::future::{BoxFuture, join_all};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use transport::{ApiRequest, ApiResponse, Transport};

use crate::classify::{classify_refresh_failure, legal_document};
use crate::context::RequestContext;
use crate::csrf::CsrfTokenCache;
use crate::error::{Error, Result};
use crate::events::SessionEvents;
use crate::metrics;

/// Re-issues a queued request once fresh credentials are in place.
///
/// Implemented by the request pipeline. The future owns what it needs so
/// the replays can outlive the caller that led the refresh.
pub trait Replay: Send + Sync {
    fn replay(&self, context: RequestContext) -> BoxFuture<'static, Result<ApiResponse>>;
}

/// A request parked behind the in-flight refresh.
struct PendingRequest {
    context: RequestContext,
    responder: oneshot::Sender<Result<ApiResponse>>,
}

enum RefreshState {
    Idle,
    InFlight(VecDeque<PendingRequest>),
}

pub struct RefreshCoordinator {
    transport: Arc<dyn Transport>,
    csrf: Arc<CsrfTokenCache>,
    events: Arc<dyn SessionEvents>,
    state: Mutex<RefreshState>,
}

impl RefreshCoordinator {
    pub fn new(
        transport: Arc<dyn Transport>,
        csrf: Arc<CsrfTokenCache>,
        events: Arc<dyn SessionEvents>,
    ) -> Self {
        Self {
            transport,
            csrf,
            events,
            state: Mutex::new(RefreshState::Idle),
        }
    }

    /// Whether a refresh call is outstanding.
    pub fn is_refreshing(&self) -> bool {
        matches!(*self.lock(), RefreshState::InFlight(_))
    }

    /// Number of requests waiting on the outstanding refresh.
    pub fn pending(&self) -> usize {
        match &*self.lock() {
            RefreshState::InFlight(queue) => queue.len(),
            RefreshState::Idle => 0,
        }
    }

    /// Queue `context` behind a credential refresh and resolve with its
    /// replay (or the refresh error).
    ///
    /// Starts the refresh if none is in flight; otherwise joins the one
    /// that is.
    pub async fn on_credential_expired<R: Replay + ?Sized>(
        &self,
        context: RequestContext,
        replay: &R,
    ) -> Result<ApiResponse> {
        let (responder, outcome) = oneshot::channel();
        let pending = PendingRequest { context, responder };

        let leader = {
            let mut state = self.lock();
            match &mut *state {
                RefreshState::InFlight(queue) => {
                    queue.push_back(pending);
                    debug!(queued = queue.len(), "joined in-flight credential refresh");
                    false
                }
                RefreshState::Idle => {
                    *state = RefreshState::InFlight(VecDeque::from([pending]));
                    true
                }
            }
        };

        if leader {
            self.lead(replay).await;
        }

        outcome.await.unwrap_or(Err(Error::RefreshAbandoned))
    }

    async fn lead<R: Replay + ?Sized>(&self, replay: &R) {
        let guard = InFlightGuard {
            state: &self.state,
            armed: true,
        };
        info!("credential expired, refreshing");
        let result = self.refresh().await;
        let queue = guard.release();

        match result {
            Ok(()) => {
                metrics::record_refresh("success");
                info!(queued = queue.len(), "credential refresh succeeded, replaying queued requests");
                let replays: Vec<_> = queue
                    .into_iter()
                    .map(|pending| {
                        let outcome = replay.replay(pending.context);
                        async move {
                            let _ = pending.responder.send(outcome.await);
                        }
                    })
                    .collect();
                // join_all polls in queue order, so replays are issued FIFO
                tokio::spawn(join_all(replays));
            }
            Err(err) => {
                self.conclude_session(&err);
                for pending in queue {
                    let _ = pending.responder.send(Err(err.clone()));
                }
            }
        }
    }

    /// Issue the refresh call. The refresh credential travels in the
    /// cookie jar, so the request has no body.
    async fn refresh(&self) -> Result<()> {
        let response = self
            .transport
            .send(ApiRequest::post(REFRESH_PATH))
            .await
            .map_err(|e| Error::RefreshFailed(e.to_string()))?;

        if !response.is_success() {
            return Err(classify_refresh_failure(&response));
        }
        // A 2xx that still carries staleness flags suspends the session too
        match legal_document(&response) {
            Some(document) => Err(Error::LegalAcceptanceOutdated(document)),
            None => Ok(()),
        }
    }

    /// Session-level side effect of a failed refresh, run once per refresh.
    fn conclude_session(&self, err: &Error) {
        match err {
            Error::LegalAcceptanceOutdated(document) => {
                metrics::record_refresh("legal_outdated");
                warn!(%document, "legal acceptance outdated, redirecting to re-acceptance");
                self.events.reacceptance_required(*document);
            }
            _ => {
                metrics::record_refresh("failure");
                warn!(error = %err, "credential refresh failed, signing out");
                self.csrf.invalidate();
                self.events.signed_out();
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Resets the coordinator to `Idle` if the leader is dropped mid-refresh.
/// Dropping the queue drops every responder, which wakes each waiter with
/// `RefreshAbandoned`.
struct InFlightGuard<'a> {
    state: &'a Mutex<RefreshState>,
    armed: bool,
}

impl InFlightGuard<'_> {
    /// Clear the in-flight flag and hand over the queue.
    fn release(mut self) -> VecDeque<PendingRequest> {
        self.armed = false;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match std::mem::replace(&mut *state, RefreshState::Idle) {
            RefreshState::InFlight(queue) => queue,
            RefreshState::Idle => VecDeque::new(),
        }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!("credential refresh abandoned before completion");
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            *state = RefreshState::Idle;
        }
    }
}
