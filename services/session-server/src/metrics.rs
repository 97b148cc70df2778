//! Prometheus metrics exposition
//!
//! - `session_http_requests_total` (counter): labels `status`, `method`
//! - `session_http_request_duration_seconds` (histogram): label `status`
//! - `session_refresh_total` (counter): label `outcome`
//! - `session_csrf_rejections_total` (counter): label `reason`

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

const DURATION_METRIC: &str = "session_http_request_duration_seconds";

/// 5ms to 10s.
const DURATION_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

fn builder() -> PrometheusBuilder {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(DURATION_METRIC.to_string()), DURATION_BUCKETS)
        .expect("histogram buckets are non-empty")
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// The request-duration histogram gets explicit buckets so it renders as a
/// Prometheus histogram (`_bucket` lines) rather than a summary.
pub fn install_recorder() -> PrometheusHandle {
    builder()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a completed request with status code and HTTP method labels.
pub fn record_request(status: u16, method: &str, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!("session_http_requests_total", "status" => status_str.clone(), "method" => method.to_string())
        .increment(1);
    metrics::histogram!(DURATION_METRIC, "status" => status_str).record(duration_secs);
}

/// Record a refresh outcome: `rotated`, `invalid` or `legal_outdated`.
pub fn record_refresh(outcome: &'static str) {
    metrics::counter!("session_refresh_total", "outcome" => outcome).increment(1);
}

/// Record an anti-forgery rejection labelled with its error code.
pub fn record_csrf_rejection(reason: &'static str) {
    metrics::counter!("session_csrf_rejections_total", "reason" => reason).increment(1);
}

/// Middleware timing every request.
pub async fn track_requests(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let started = Instant::now();
    let response = next.run(request).await;
    record_request(
        response.status().as_u16(),
        &method,
        started.elapsed().as_secs_f64(),
    );
    response
}
