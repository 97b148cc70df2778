//! Authenticated-session transport core
//!
//! Keeps a client continuously authenticated against a server that issues
//! short-lived credentials through script-inaccessible cookies, while
//! attaching a double-submit anti-forgery token to every state-changing
//! request. All traffic goes through `SessionClient::execute`:
//!
//! 1. Unsafe methods get the cached anti-forgery token as `x-csrf-token`
//!    (fetched once from `GET /csrf-token` when the cache is empty)
//! 2. `403 CSRF_TOKEN_*` invalidates the cache, refetches and replays once
//! 3. `401` hands the request to the `RefreshCoordinator`, which issues a
//!    single `POST /auth/refresh` no matter how many requests are waiting,
//!    then replays every queued request in arrival order
//! 4. A failed refresh rejects the whole queue and signs the session out,
//!    unless the server reports outdated terms or privacy acceptance, in
//!    which case the session is kept and `SessionEvents` is told to
//!    redirect to re-acceptance
//!
//! Each recovery happens at most once per logical request.

pub mod classify;
pub mod client;
pub mod context;
pub mod csrf;
pub mod error;
pub mod events;
pub mod metrics;
pub mod refresh;

#[cfg(test)]
mod testing;

pub use classify::{ResponseClass, classify_refresh_failure, classify_response};
pub use client::SessionClient;
pub use context::{RequestContext, RetryFlags};
pub use csrf::CsrfTokenCache;
pub use error::{Error, Result};
pub use events::{LegalDocument, NoopEvents, SessionEvents};
pub use refresh::{RefreshCoordinator, Replay};
