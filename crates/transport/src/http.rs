//! `reqwest`-backed transport with a cookie jar
//!
//! The cookie jar is the client-side credential store: the server sets and
//! clears the access, refresh and anti-forgery cookies, and the jar replays
//! them on matching requests. Nothing in this crate reads their values.

use crate::{ApiRequest, ApiResponse, Result, Transport, TransportError};
use reqwest::header::{HeaderMap, HeaderValue, ORIGIN};
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, warn};

/// Connection settings for `HttpTransport`.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpTransportConfig {
    /// Scheme, host and optional port of the API, e.g. `https://api.example.com`.
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Sent as the `Origin` header on every request when set.
    #[serde(default)]
    pub origin: Option<String>,
}

fn default_timeout_secs() -> u64 {
    30
}

impl HttpTransportConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_secs: default_timeout_secs(),
            origin: None,
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }
}

pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &HttpTransportConfig) -> Result<Self> {
        if !config.base_url.starts_with("http://") && !config.base_url.starts_with("https://") {
            return Err(TransportError::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                config.base_url
            )));
        }
        if config.timeout_secs == 0 {
            return Err(TransportError::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        let mut default_headers = HeaderMap::new();
        if let Some(origin) = &config.origin {
            let value = HeaderValue::from_str(origin)
                .map_err(|e| TransportError::Config(format!("invalid origin {origin}: {e}")))?;
            default_headers.insert(ORIGIN, value);
        }

        let client = reqwest::Client::builder()
            .cookie_store(true)
            .default_headers(default_headers)
            .build()
            .map_err(|e| TransportError::Config(format!("building HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }
}

impl Transport for HttpTransport {
    fn send(
        &self,
        request: ApiRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ApiResponse>> + Send + '_>> {
        Box::pin(async move {
            let url = self.url_for(&request.path);
            let method = request.method.clone();

            let mut builder = self
                .client
                .request(request.method, &url)
                .headers(request.headers)
                .timeout(self.timeout);
            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let response = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    warn!(%method, path = %request.path, "request timed out");
                    TransportError::Timeout(format!("{method} {}: {e}", request.path))
                } else {
                    warn!(%method, path = %request.path, error = %e, "request failed");
                    TransportError::Request(format!("{method} {}: {e}", request.path))
                }
            })?;

            let status = response.status();
            let headers = response.headers().clone();
            let body = response
                .bytes()
                .await
                .map_err(|e| TransportError::Body(format!("reading response body: {e}")))?;

            debug!(%method, path = %request.path, status = status.as_u16(), "request completed");
            Ok(ApiResponse {
                status,
                headers,
                body,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StatusCode;
    use axum::http::HeaderMap as AxumHeaders;
    use axum::routing::{get, post};
    use tokio::net::TcpListener;

    /// Start a server that sets a cookie on `/set` and echoes request
    /// headers back from `/echo`.
    async fn start_cookie_server() -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let app = axum::Router::new()
                .route(
                    "/set",
                    post(|| async {
                        (
                            [("set-cookie", "marker=abc; Path=/; HttpOnly")],
                            "ok",
                        )
                    }),
                )
                .route(
                    "/echo",
                    get(|headers: AxumHeaders| async move {
                        let cookie = headers
                            .get("cookie")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("")
                            .to_string();
                        let origin = headers
                            .get("origin")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("")
                            .to_string();
                        axum::Json(serde_json::json!({ "cookie": cookie, "origin": origin }))
                    }),
                )
                .route(
                    "/missing",
                    get(|| async { (axum::http::StatusCode::NOT_FOUND, "nope") }),
                )
                .route(
                    "/slow",
                    get(|| async {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        "late"
                    }),
                );
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}"), handle)
    }

    #[tokio::test]
    async fn cookie_jar_replays_server_cookies() {
        let (base_url, _server) = start_cookie_server().await;
        let transport = HttpTransport::new(&HttpTransportConfig::new(&base_url)).unwrap();

        transport.send(ApiRequest::post("/set")).await.unwrap();
        let response = transport.send(ApiRequest::get("/echo")).await.unwrap();

        let json: serde_json::Value = response.json().unwrap();
        assert_eq!(json["cookie"], "marker=abc");
    }

    #[tokio::test]
    async fn origin_header_is_attached_when_configured() {
        let (base_url, _server) = start_cookie_server().await;
        let config = HttpTransportConfig::new(&base_url).with_origin("https://app.example.com");
        let transport = HttpTransport::new(&config).unwrap();

        let response = transport.send(ApiRequest::get("/echo")).await.unwrap();
        let json: serde_json::Value = response.json().unwrap();
        assert_eq!(json["origin"], "https://app.example.com");
    }

    #[tokio::test]
    async fn error_statuses_are_returned_as_responses() {
        let (base_url, _server) = start_cookie_server().await;
        let transport = HttpTransport::new(&HttpTransportConfig::new(&base_url)).unwrap();

        let response = transport.send(ApiRequest::get("/missing")).await.unwrap();
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(response.text(), "nope");
    }

    #[tokio::test]
    async fn dead_server_is_a_request_error() {
        // Bind then drop to get a port nothing listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport =
            HttpTransport::new(&HttpTransportConfig::new(format!("http://{addr}"))).unwrap();
        let err = transport.send(ApiRequest::get("/echo")).await.unwrap_err();
        assert!(matches!(err, TransportError::Request(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn slow_server_is_a_timeout() {
        let (base_url, _server) = start_cookie_server().await;
        let mut config = HttpTransportConfig::new(&base_url);
        config.timeout_secs = 1;
        let transport = HttpTransport::new(&config).unwrap();

        let err = transport.send(ApiRequest::get("/slow")).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)), "got: {err:?}");
    }

    #[test]
    fn rejects_base_url_without_scheme() {
        let result = HttpTransport::new(&HttpTransportConfig::new("api.example.com"));
        assert!(matches!(result, Err(TransportError::Config(_))));
    }

    #[test]
    fn rejects_zero_timeout() {
        let mut config = HttpTransportConfig::new("http://localhost:8080");
        config.timeout_secs = 0;
        assert!(HttpTransport::new(&config).is_err());
    }

    #[test]
    fn url_for_joins_paths() {
        let transport =
            HttpTransport::new(&HttpTransportConfig::new("http://localhost:8080/")).unwrap();
        assert_eq!(transport.base_url(), "http://localhost:8080");
        assert_eq!(transport.url_for("/me"), "http://localhost:8080/me");
        assert_eq!(transport.url_for("me"), "http://localhost:8080/me");
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: HttpTransportConfig =
            serde_json::from_str(r#"{"base_url":"https://api.example.com"}"#).unwrap();
        assert_eq!(config.timeout_secs, 30);
        assert!(config.origin.is_none());
    }
}
