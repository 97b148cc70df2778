//! Client-side counters
//!
//! - `session_client_csrf_fetches_total` (counter): label `outcome`
//! - `session_client_refresh_total` (counter): label `outcome`
//! - `session_client_retries_total` (counter): label `reason`
//!
//! Every call is a no-op unless the embedding application installs a
//! `metrics` recorder.

/// Record one anti-forgery token fetch (`success` or `failure`).
pub fn record_csrf_fetch(outcome: &'static str) {
    metrics::counter!("session_client_csrf_fetches_total", "outcome" => outcome).increment(1);
}

/// Record one refresh call outcome (`success`, `failure`, `legal_outdated`).
pub fn record_refresh(outcome: &'static str) {
    metrics::counter!("session_client_refresh_total", "outcome" => outcome).increment(1);
}

/// Record one recovery replay (`csrf` or `credential`).
pub fn record_retry(reason: &'static str) {
    metrics::counter!("session_client_retries_total", "reason" => reason).increment(1);
}
