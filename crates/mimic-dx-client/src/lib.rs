//! Client SDK for the mimic-dx diagnostic service
//!
//! This crate owns everything that crosses the network: plain request/response calls
//! wrapped in a bounded retry loop, the reachability probe, and the long-lived
//! `/diagnose` event stream. Callers program against the [`DiagnosticClient`] trait so
//! that orchestration logic can be exercised against scripted clients in tests and
//! against [`http_client::HttpDiagnosticClient`] in production.

use async_trait::async_trait;
use futures::Stream;
use mimic_dx_types::{
    DiagnoseEvent, ProvideInfoRequest, ProvideInfoResponse, QueryRequest, QueryResponse,
};
use std::pin::Pin;
use std::sync::Arc;

pub mod error;
pub mod http_client;
pub mod retry;
pub mod session;
pub mod sse;

#[cfg(test)]
pub mod test_utils;

pub use error::{StreamError, TransportError};
pub use http_client::{ClientConfig, HttpDiagnosticClient};
pub use retry::RetryPolicy;
pub use session::{ProgressSubscription, SessionHandle, SessionState, StreamResult};

/// Decoded events of one `/diagnose` stream, in arrival order.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<DiagnoseEvent, StreamError>> + Send>>;

/// DiagnosticClient trait for talking to the diagnostic service
#[async_trait]
pub trait DiagnosticClient: Send + Sync {
    /// Base address of the service, for diagnostics and user guidance.
    fn base_url(&self) -> &str;

    /// Check that the service is reachable (`GET /diagnose-test`).
    async fn probe(&self) -> Result<(), TransportError>;

    /// Legacy single-shot query (`POST /query`).
    async fn query(&self, request: QueryRequest) -> Result<QueryResponse, TransportError>;

    /// Resume a session with the user's answer (`POST /provide_info`).
    async fn provide_info(
        &self,
        request: ProvideInfoRequest,
    ) -> Result<ProvideInfoResponse, TransportError>;

    /// Open the server-push channel for one diagnostic turn (`GET /diagnose`).
    async fn open_diagnose_stream(&self, query: &str) -> Result<EventStream, StreamError>;
}

/// Factory for creating DiagnosticClient instances
pub struct DiagnosticClientFactory;

impl DiagnosticClientFactory {
    /// Create an HTTP client for a remote service
    pub fn create_http_client(config: ClientConfig) -> Arc<dyn DiagnosticClient> {
        Arc::new(HttpDiagnosticClient::new(config))
    }
}
