use async_stream::stream;
use async_trait::async_trait;
use futures_util::stream::TryStreamExt;
use mimic_dx_types::{
    DiagnoseEvent, ProvideInfoRequest, ProvideInfoResponse, QueryRequest, QueryResponse,
};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio_util::io::StreamReader;

use crate::error::{StreamError, TransportError};
use crate::retry::RetryPolicy;
use crate::sse::SseDecoder;
use crate::{DiagnosticClient, EventStream};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const PROBE_PATH: &str = "/diagnose-test";
const QUERY_PATH: &str = "/query";
const DIAGNOSE_PATH: &str = "/diagnose";
const PROVIDE_INFO_PATH: &str = "/provide_info";

/// Longest error body kept in `TransportError::Status`.
const MAX_ERROR_BODY: usize = 512;

/// Explicit transport configuration: where the service lives and how calls behave.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub base_url: String,
    /// Deadline of each request/response attempt. Streams have none.
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// HTTP client for communicating with a remote diagnostic service
pub struct HttpDiagnosticClient {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
    retry: RetryPolicy,
}

impl HttpDiagnosticClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            timeout: config.timeout,
            retry: config.retry,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a request built by `build` under the retry policy and decode a JSON body.
    async fn call_json<T, B>(&self, path: &str, build: B) -> Result<T, TransportError>
    where
        T: DeserializeOwned,
        B: Fn(&reqwest::Client, &str) -> reqwest::RequestBuilder,
    {
        let url = self.url(path);
        self.retry
            .run(path, |attempt| {
                log::debug!("{} attempt {}", path, attempt);
                let request = build(&self.client, &url).timeout(self.timeout);
                async move {
                    let response = request
                        .send()
                        .await
                        .map_err(|e| TransportError::from_reqwest(path, e))?;
                    let response = check_status(path, response).await?;
                    response
                        .json::<T>()
                        .await
                        .map_err(|e| TransportError::from_reqwest(path, e))
                }
            })
            .await
    }
}

async fn check_status(
    endpoint: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    Err(TransportError::Status {
        endpoint: endpoint.to_string(),
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl DiagnosticClient for HttpDiagnosticClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn probe(&self) -> Result<(), TransportError> {
        let url = self.url(PROBE_PATH);
        self.retry
            .run(PROBE_PATH, |_| {
                let request = self.client.get(&url).timeout(self.timeout);
                async move {
                    let response = request
                        .send()
                        .await
                        .map_err(|e| TransportError::from_reqwest(PROBE_PATH, e))?;
                    check_status(PROBE_PATH, response).await.map(|_| ())
                }
            })
            .await
    }

    async fn query(&self, request: QueryRequest) -> Result<QueryResponse, TransportError> {
        self.call_json(QUERY_PATH, |client, url| client.post(url).json(&request))
            .await
    }

    async fn provide_info(
        &self,
        request: ProvideInfoRequest,
    ) -> Result<ProvideInfoResponse, TransportError> {
        log::debug!(
            "Resuming session with {} history message(s)",
            request.conversation_history.len()
        );
        self.call_json(PROVIDE_INFO_PATH, |client, url| {
            client.post(url).json(&request)
        })
        .await
    }

    async fn open_diagnose_stream(&self, query: &str) -> Result<EventStream, StreamError> {
        let stream_url = format!(
            "{}?query={}",
            self.url(DIAGNOSE_PATH),
            urlencoding::encode(query)
        );

        let response = self
            .client
            .get(&stream_url)
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(DIAGNOSE_PATH, e))?;
        let response = check_status(DIAGNOSE_PATH, response).await?;

        let bytes = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()));

        let mut lines_reader = StreamReader::new(bytes).lines();

        let event_stream = stream! {
            let mut decoder = SseDecoder::new();
            loop {
                let message = match lines_reader.next_line().await {
                    Ok(Some(line)) => decoder.push_line(&line),
                    Ok(None) => {
                        if let Some(message) = decoder.finish() {
                            yield DiagnoseEvent::from_sse_data(&message.data).map_err(StreamError::from);
                        }
                        break;
                    }
                    Err(e) => {
                        yield Err(StreamError::Read(e.to_string()));
                        break;
                    }
                };

                if let Some(message) = message {
                    yield DiagnoseEvent::from_sse_data(&message.data).map_err(StreamError::from);
                }
            }
        };

        Ok(Box::pin(event_stream))
    }
}
