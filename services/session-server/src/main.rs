//! Session Server
//!
//! Single-binary axum service that:
//! 1. Issues double-submit anti-forgery tokens (`GET /csrf-token`)
//! 2. Rejects unsafe requests from foreign origins or without a matching
//!    token
//! 3. Issues, rotates and revokes short-lived credential pairs carried in
//!    `HttpOnly` cookies
//! 4. Flags accounts behind on terms or privacy acceptance at refresh time

mod auth;
mod config;
mod cookies;
mod csrf;
mod error;
mod metrics;
mod session;
mod users;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use common::wire::{CSRF_TOKEN_PATH, LOGIN_PATH, LOGOUT_PATH, REFRESH_PATH, REGISTER_PATH};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::cookies::CookiePolicy;
use crate::csrf::CsrfPolicy;
use crate::session::SessionStore;
use crate::users::UserDirectory;

/// How long in-flight requests get to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    sessions: Arc<SessionStore>,
    users: Arc<UserDirectory>,
    csrf: Arc<CsrfPolicy>,
    cookies: CookiePolicy,
    prometheus: PrometheusHandle,
    started_at: Instant,
}

/// Build the axum router with all routes and shared state.
///
/// The anti-forgery middleware wraps every route; the metrics layer sits
/// outside it so rejections are counted too.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route(CSRF_TOKEN_PATH, get(csrf::issue_token))
        .route(REGISTER_PATH, post(auth::register))
        .route(LOGIN_PATH, post(auth::login))
        .route(REFRESH_PATH, post(auth::refresh))
        .route(LOGOUT_PATH, post(auth::logout))
        .route("/me", get(auth::me))
        .route("/legal/accept", post(auth::accept_legal))
        .layer(from_fn_with_state(state.clone(), csrf::verify_request))
        .layer(from_fn(metrics::track_requests))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting session-server");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        allowed_origins = config.csrf.allowed_origins.len(),
        access_ttl_secs = config.session.access_ttl_secs,
        refresh_ttl_secs = config.session.refresh_ttl_secs,
        secure_cookies = config.cookies.secure,
        "configuration loaded"
    );
    if !config.cookies.secure {
        warn!("secure cookies disabled; credentials will be sent over plain HTTP");
    }

    let sessions = Arc::new(SessionStore::new(
        config.session.access_ttl(),
        config.session.refresh_ttl(),
    ));
    let purge_task =
        session::spawn_purge_task(sessions.clone(), config.session.purge_interval());

    let app_state = AppState {
        sessions,
        users: Arc::new(UserDirectory::new(
            config.legal.terms_version.clone(),
            config.legal.privacy_policy_version.clone(),
        )),
        csrf: Arc::new(CsrfPolicy::new(
            config.csrf.allowed_origins.clone(),
            Duration::from_secs(config.csrf.token_ttl_secs),
        )),
        cookies: CookiePolicy::new(config.cookies.secure),
        prometheus: prometheus_handle,
        started_at: Instant::now(),
    };

    let app = build_router(app_state, config.server.max_connections);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timeout starts when the shutdown signal fires, not when the
    // server starts: notify the server to drain, then race the drain
    // against the timeout.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());
    purge_task.abort();

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Health endpoint: status, uptime and the number of sessions that can
/// still refresh.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": "healthy",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "active_sessions": state.sessions.active_sessions().await,
    });
    (
        axum::http::StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
