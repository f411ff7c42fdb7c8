// src/test_utils/scripted_client.rs
use async_trait::async_trait;
use mimic_dx_client::{DiagnosticClient, EventStream, StreamError, TransportError};
use mimic_dx_types::{
    DiagnoseEvent, ProvideInfoRequest, ProvideInfoResponse, QueryRequest, QueryResponse,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

type ScriptedStream = Result<(Vec<Result<DiagnoseEvent, StreamError>>, bool), StreamError>;

/// In-process `DiagnosticClient` that replays scripted responses and counts every
/// call that would have touched the network.
#[derive(Default)]
pub struct ScriptedClient {
    probes: Mutex<VecDeque<Result<(), TransportError>>>,
    streams: Mutex<VecDeque<ScriptedStream>>,
    provide_info: Mutex<VecDeque<Result<ProvideInfoResponse, TransportError>>>,
    queries: Mutex<VecDeque<Result<QueryResponse, TransportError>>>,
    network_calls: AtomicUsize,
    stream_queries: Mutex<Vec<String>>,
    provide_info_requests: Mutex<Vec<ProvideInfoRequest>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_probe_failure(self, err: TransportError) -> Self {
        self.probes.lock().unwrap().push_back(Err(err));
        self
    }

    /// A stream that yields `events` and then ends.
    pub fn with_stream(self, events: Vec<DiagnoseEvent>) -> Self {
        let items = events.into_iter().map(Ok).collect();
        self.streams.lock().unwrap().push_back(Ok((items, false)));
        self
    }

    /// A stream that yields `events` and then stays open forever.
    pub fn with_hanging_stream(self, events: Vec<DiagnoseEvent>) -> Self {
        let items = events.into_iter().map(Ok).collect();
        self.streams.lock().unwrap().push_back(Ok((items, true)));
        self
    }

    pub fn with_stream_open_error(self, err: StreamError) -> Self {
        self.streams.lock().unwrap().push_back(Err(err));
        self
    }

    pub fn with_provide_info(self, response: ProvideInfoResponse) -> Self {
        self.provide_info.lock().unwrap().push_back(Ok(response));
        self
    }

    pub fn with_provide_info_error(self, err: TransportError) -> Self {
        self.provide_info.lock().unwrap().push_back(Err(err));
        self
    }

    pub fn with_query(self, response: QueryResponse) -> Self {
        self.queries.lock().unwrap().push_back(Ok(response));
        self
    }

    pub fn network_calls(&self) -> usize {
        self.network_calls.load(Ordering::SeqCst)
    }

    pub fn stream_queries(&self) -> Vec<String> {
        self.stream_queries.lock().unwrap().clone()
    }

    pub fn provide_info_requests(&self) -> Vec<ProvideInfoRequest> {
        self.provide_info_requests.lock().unwrap().clone()
    }

    fn unscripted(endpoint: &str) -> TransportError {
        TransportError::Status {
            endpoint: endpoint.to_string(),
            status: 503,
            body: "no scripted response".to_string(),
        }
    }
}

#[async_trait]
impl DiagnosticClient for ScriptedClient {
    fn base_url(&self) -> &str {
        "http://scripted.test:8000"
    }

    async fn probe(&self) -> Result<(), TransportError> {
        self.network_calls.fetch_add(1, Ordering::SeqCst);
        self.probes.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }

    async fn query(&self, _request: QueryRequest) -> Result<QueryResponse, TransportError> {
        self.network_calls.fetch_add(1, Ordering::SeqCst);
        self.queries
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Self::unscripted("/query")))
    }

    async fn provide_info(
        &self,
        request: ProvideInfoRequest,
    ) -> Result<ProvideInfoResponse, TransportError> {
        self.network_calls.fetch_add(1, Ordering::SeqCst);
        self.provide_info_requests.lock().unwrap().push(request);
        self.provide_info
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Self::unscripted("/provide_info")))
    }

    async fn open_diagnose_stream(&self, query: &str) -> Result<EventStream, StreamError> {
        self.network_calls.fetch_add(1, Ordering::SeqCst);
        self.stream_queries.lock().unwrap().push(query.to_string());
        let scripted = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(StreamError::Transport(Self::unscripted("/diagnose"))));

        let (items, hang) = scripted?;
        let events = futures::stream::iter(items);
        if hang {
            Ok(Box::pin(futures::StreamExt::chain(
                events,
                futures::stream::pending(),
            )))
        } else {
            Ok(Box::pin(events))
        }
    }
}
