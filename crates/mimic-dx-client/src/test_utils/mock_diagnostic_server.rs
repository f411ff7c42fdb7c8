// src/test_utils/mock_diagnostic_server.rs
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

/// Scripted behaviour of the mock service.
#[derive(Debug, Clone, Default)]
pub struct MockScript {
    /// Status codes returned by successive probes; 200 once exhausted.
    pub probe_statuses: Vec<u16>,
    /// Data payloads of the `/diagnose` stream, one SSE message each.
    pub sse_events: Vec<String>,
    /// Non-2xx status to reject `/diagnose` with.
    pub diagnose_status: Option<u16>,
    /// `(status, body)` pairs returned by successive `/provide_info` calls.
    pub provide_info_responses: Vec<(u16, Value)>,
    /// `(status, body)` pairs returned by successive `/query` calls.
    pub query_responses: Vec<(u16, Value)>,
}

#[derive(Clone)]
struct MockServerState {
    probe_statuses: Arc<Mutex<VecDeque<u16>>>,
    probe_hits: Arc<AtomicUsize>,
    sse_body: Arc<String>,
    diagnose_status: Option<u16>,
    diagnose_queries: Arc<Mutex<Vec<String>>>,
    provide_info_responses: Arc<Mutex<VecDeque<(u16, Value)>>>,
    provide_info_requests: Arc<Mutex<Vec<Value>>>,
    query_responses: Arc<Mutex<VecDeque<(u16, Value)>>>,
}

impl MockServerState {
    fn new(script: MockScript) -> Self {
        let sse_body = script
            .sse_events
            .iter()
            .map(|data| format!("data: {}\n\n", data))
            .collect::<String>();

        Self {
            probe_statuses: Arc::new(Mutex::new(VecDeque::from(script.probe_statuses))),
            probe_hits: Arc::new(AtomicUsize::new(0)),
            sse_body: Arc::new(sse_body),
            diagnose_status: script.diagnose_status,
            diagnose_queries: Arc::new(Mutex::new(Vec::new())),
            provide_info_responses: Arc::new(Mutex::new(VecDeque::from(
                script.provide_info_responses,
            ))),
            provide_info_requests: Arc::new(Mutex::new(Vec::new())),
            query_responses: Arc::new(Mutex::new(VecDeque::from(script.query_responses))),
        }
    }
}

fn status(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

async fn probe_handler(State(state): State<MockServerState>) -> StatusCode {
    state.probe_hits.fetch_add(1, Ordering::SeqCst);
    let code = state.probe_statuses.lock().unwrap().pop_front().unwrap_or(200);
    status(code)
}

async fn diagnose_handler(
    State(state): State<MockServerState>,
    Query(params): Query<HashMap<String, String>>,
) -> axum::response::Response {
    let query = params.get("query").cloned().unwrap_or_default();
    log::debug!("Mock diagnostic server received query: {}", query);
    state.diagnose_queries.lock().unwrap().push(query);

    if let Some(code) = state.diagnose_status {
        return (status(code), "stream unavailable").into_response();
    }

    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        state.sse_body.as_ref().clone(),
    )
        .into_response()
}

async fn provide_info_handler(
    State(state): State<MockServerState>,
    Json(payload): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.provide_info_requests.lock().unwrap().push(payload);
    match state.provide_info_responses.lock().unwrap().pop_front() {
        Some((code, body)) => (status(code), Json(body)),
        None => {
            log::error!("Mock diagnostic server ran out of provide_info responses!");
            (StatusCode::SERVICE_UNAVAILABLE, Json(Value::Null))
        }
    }
}

async fn query_handler(
    State(state): State<MockServerState>,
    Json(_payload): Json<Value>,
) -> (StatusCode, Json<Value>) {
    match state.query_responses.lock().unwrap().pop_front() {
        Some((code, body)) => (status(code), Json(body)),
        None => (StatusCode::SERVICE_UNAVAILABLE, Json(Value::Null)),
    }
}

pub struct MockDiagnosticServer {
    addr: SocketAddr,
    shutdown_tx: tokio::sync::oneshot::Sender<()>,
    state: MockServerState,
}

impl MockDiagnosticServer {
    pub async fn start(script: MockScript) -> Self {
        let state = MockServerState::new(script);

        let app = Router::new()
            .route("/diagnose-test", get(probe_handler))
            .route("/diagnose", get(diagnose_handler))
            .route("/provide_info", post(provide_info_handler))
            .route("/query", post(query_handler))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap_or_else(|e| {
            panic!("Failed to bind mock server to 127.0.0.1:0. Error: {}", e);
        });
        let addr = listener.local_addr().unwrap();
        log::info!("Mock diagnostic server listening on {}", addr);

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .unwrap_or_else(|e| {
                    log::error!("Mock diagnostic server error: {}", e);
                });
        });

        MockDiagnosticServer {
            addr,
            shutdown_tx,
            state,
        }
    }

    pub fn address(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn probe_hits(&self) -> usize {
        self.state.probe_hits.load(Ordering::SeqCst)
    }

    pub fn diagnose_queries(&self) -> Vec<String> {
        self.state.diagnose_queries.lock().unwrap().clone()
    }

    pub fn provide_info_requests(&self) -> Vec<Value> {
        self.state.provide_info_requests.lock().unwrap().clone()
    }

    pub async fn shutdown(self) {
        if self.shutdown_tx.send(()).is_err() {
            log::warn!("Mock diagnostic server shutdown signal already sent or receiver dropped.");
        }
    }
}
