//! Scripted transport and event recorder shared by the unit tests.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use transport::{ApiRequest, ApiResponse, StatusCode, Transport, TransportError};

use crate::events::{LegalDocument, SessionEvents};

type Handler = dyn Fn(&ApiRequest) -> transport::Result<ApiResponse> + Send + Sync;

/// In-memory transport. Every request is recorded before it is answered,
/// and a gated path holds its requests until the test adds permits.
pub struct MockTransport {
    handler: Box<Handler>,
    calls: Mutex<Vec<ApiRequest>>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl MockTransport {
    pub fn new(
        handler: impl Fn(&ApiRequest) -> transport::Result<ApiResponse> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
            gates: Mutex::new(HashMap::new()),
        })
    }

    /// Hold every request to `path` until permits are added. A permit is
    /// returned after each request, so one permit opens the gate for good.
    pub fn gate(&self, path: &str) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.gates
            .lock()
            .unwrap()
            .insert(path.to_string(), gate.clone());
        gate
    }

    pub fn calls(&self) -> Vec<ApiRequest> {
        self.calls.lock().unwrap().clone()
    }

    /// Recorded requests as `"METHOD /path"`.
    pub fn log(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|r| format!("{} {}", r.method, r.path))
            .collect()
    }

    pub fn count(&self, path: &str) -> usize {
        self.calls().iter().filter(|r| r.path == path).count()
    }
}

impl Transport for MockTransport {
    fn send(
        &self,
        request: ApiRequest,
    ) -> Pin<Box<dyn Future<Output = transport::Result<ApiResponse>> + Send + '_>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(request.clone());
            let gate = self.gates.lock().unwrap().get(&request.path).cloned();
            if let Some(gate) = gate {
                let _permit = gate
                    .acquire()
                    .await
                    .map_err(|e| TransportError::Request(e.to_string()))?;
            }
            (self.handler)(&request)
        })
    }
}

pub fn ok() -> transport::Result<ApiResponse> {
    Ok(ApiResponse::json_value(
        StatusCode::OK,
        &serde_json::json!({"ok": true}),
    ))
}

pub fn token(value: &str) -> transport::Result<ApiResponse> {
    Ok(ApiResponse::json_value(
        StatusCode::OK,
        &serde_json::json!({"token": value}),
    ))
}

pub fn rejection(status: StatusCode, code: &str) -> transport::Result<ApiResponse> {
    Ok(ApiResponse::json_value(
        status,
        &serde_json::json!({"error": {"code": code, "message": "rejected"}}),
    ))
}

pub fn legal_outdated(terms: bool, privacy: bool) -> transport::Result<ApiResponse> {
    Ok(ApiResponse::json_value(
        StatusCode::UNAUTHORIZED,
        &serde_json::json!({
            "error": {"code": "LEGAL_ACCEPTANCE_OUTDATED", "message": "re-accept"},
            "termsOutdated": terms,
            "privacyPolicyOutdated": privacy
        }),
    ))
}

/// Header value the request carried, if any.
pub fn header(request: &ApiRequest, name: &str) -> Option<String> {
    request
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Yield to the scheduler until `condition` holds.
pub async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

#[derive(Default)]
pub struct RecordingEvents {
    signed_out: AtomicUsize,
    reacceptance: Mutex<Vec<LegalDocument>>,
}

impl RecordingEvents {
    pub fn signed_out_count(&self) -> usize {
        self.signed_out.load(Ordering::SeqCst)
    }

    pub fn reacceptance(&self) -> Vec<LegalDocument> {
        self.reacceptance.lock().unwrap().clone()
    }
}

impl SessionEvents for RecordingEvents {
    fn signed_out(&self) {
        self.signed_out.fetch_add(1, Ordering::SeqCst);
    }

    fn reacceptance_required(&self, document: LegalDocument) {
        self.reacceptance.lock().unwrap().push(document);
    }
}
