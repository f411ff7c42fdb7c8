//! Stream sessions: one server-push channel per diagnostic turn.
//!
//! [`open`] spawns a task that owns the channel, applies every event to a
//! [`StreamResult`] in arrival order and settles a single-use outcome channel. The
//! channel is dropped before the outcome is sent, so nothing can be applied after the
//! terminal event, and the `oneshot` sender is consumed by the first settlement, so a
//! session can neither resolve twice nor resolve after rejecting. Cancelling drops the
//! channel without settling.

use mimic_dx_types::{DiagnoseEvent, Message, ProgressSnapshot};
use serde::Serialize;
use std::sync::Arc;
use futures_util::StreamExt;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::StreamError;
use crate::DiagnosticClient;

/// Lifecycle of one stream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Receiving,
    Complete,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_settled(&self) -> bool {
        !matches!(self, SessionState::Connecting | SessionState::Receiving)
    }
}

/// What applying one event means for the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Continue,
    Complete,
    Failed(String),
}

/// Accumulated results of one diagnostic turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StreamResult {
    pub status: Vec<String>,
    pub thinking: String,
    /// The follow-up question, when the server needs more information.
    pub search_query: String,
    pub answer: String,
    pub database: String,
    pub full_response: String,
    pub progress: Vec<ProgressSnapshot>,
    /// Conversation snapshot sent by the server, if any.
    pub conversation: Option<Vec<Message>>,
}

impl StreamResult {
    /// Apply one event.
    pub fn apply(&mut self, event: DiagnoseEvent) -> Step {
        match event {
            DiagnoseEvent::Status(line) => self.status.push(line),
            DiagnoseEvent::Thinking(text) => self.thinking = text,
            DiagnoseEvent::Search(text) => self.search_query = text,
            DiagnoseEvent::Answer(text) => self.answer = text,
            DiagnoseEvent::Database(text) => self.database = text,
            DiagnoseEvent::Full(text) => self.full_response = text,
            DiagnoseEvent::ModelProgress(snapshot) => self.progress.push(snapshot),
            DiagnoseEvent::Conversation(messages) => self.conversation = Some(messages),
            DiagnoseEvent::Error(message) => return Step::Failed(message),
            DiagnoseEvent::Done => return Step::Complete,
            DiagnoseEvent::Unknown(event_type) => {
                log::debug!("Skipping unknown stream event type '{}'", event_type);
            }
        }
        Step::Continue
    }

    /// Finalize after `done`: synthesize the conversation from `query` and the full
    /// response when the server sent no snapshot, or one with no valid messages.
    pub fn complete(mut self, query: &str) -> Self {
        if self.conversation.as_ref().map_or(true, Vec::is_empty) {
            self.conversation = Some(vec![
                Message::user(query),
                Message::assistant(self.full_response.clone()),
            ]);
        }
        self
    }

    /// Whether the server is waiting for an answer to a follow-up question.
    pub fn needs_follow_up(&self) -> bool {
        !self.search_query.is_empty()
    }
}

/// Ordered progress snapshots of one session. Buffers everything published since
/// the session opened, so it can be attached at any time before resolution.
pub struct ProgressSubscription {
    receiver: mpsc::UnboundedReceiver<ProgressSnapshot>,
}

impl ProgressSubscription {
    /// Wait for the next snapshot. `None` once the session has ended and the
    /// buffer is drained.
    pub async fn next(&mut self) -> Option<ProgressSnapshot> {
        self.receiver.recv().await
    }

    /// Take a buffered snapshot without waiting.
    pub fn try_next(&mut self) -> Option<ProgressSnapshot> {
        self.receiver.try_recv().ok()
    }
}

type Outcome = Result<StreamResult, StreamError>;

/// Handle to one open stream session.
///
/// Dropping the handle cancels the session.
pub struct SessionHandle {
    outcome: oneshot::Receiver<Outcome>,
    progress: Option<ProgressSubscription>,
    state: watch::Receiver<SessionState>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Open a stream session for `query` on `client`.
pub fn open(client: Arc<dyn DiagnosticClient>, query: impl Into<String>) -> SessionHandle {
    open_with_cancel(client, query, CancellationToken::new())
}

/// Open a stream session that is also cancelled when `cancel` fires.
pub fn open_with_cancel(
    client: Arc<dyn DiagnosticClient>,
    query: impl Into<String>,
    cancel: CancellationToken,
) -> SessionHandle {
    let query = query.into();
    let (outcome_tx, outcome_rx) = oneshot::channel();
    let (progress_tx, progress_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(SessionState::Connecting);

    let task = tokio::spawn(run_session(
        client,
        query,
        progress_tx,
        state_tx,
        cancel.clone(),
        outcome_tx,
    ));

    SessionHandle {
        outcome: outcome_rx,
        progress: Some(ProgressSubscription {
            receiver: progress_rx,
        }),
        state: state_rx,
        cancel,
        task,
    }
}

async fn run_session(
    client: Arc<dyn DiagnosticClient>,
    query: String,
    progress_tx: mpsc::UnboundedSender<ProgressSnapshot>,
    state_tx: watch::Sender<SessionState>,
    cancel: CancellationToken,
    outcome_tx: oneshot::Sender<Outcome>,
) {
    let settled = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        outcome = receive(client.as_ref(), &query, &progress_tx, &state_tx) => Some(outcome),
    };

    match settled {
        None => {
            log::info!("Stream session cancelled before completion");
            state_tx.send_replace(SessionState::Cancelled);
        }
        Some(outcome) => {
            let state = match &outcome {
                Ok(_) => SessionState::Complete,
                Err(err) => {
                    log::warn!("Stream session failed: {}", err);
                    SessionState::Failed
                }
            };
            state_tx.send_replace(state);
            if outcome_tx.send(outcome).is_err() {
                log::debug!("Stream session settled after its handle was dropped");
            }
        }
    }
}

/// Drive the channel until a terminal event. The channel is dropped on return,
/// before the caller settles.
async fn receive(
    client: &dyn DiagnosticClient,
    query: &str,
    progress_tx: &mpsc::UnboundedSender<ProgressSnapshot>,
    state_tx: &watch::Sender<SessionState>,
) -> Outcome {
    let mut events = client.open_diagnose_stream(query).await?;
    state_tx.send_replace(SessionState::Receiving);
    log::debug!("Stream session receiving events");

    let mut result = StreamResult::default();
    while let Some(event) = events.next().await {
        let event = event?;
        if let DiagnoseEvent::ModelProgress(snapshot) = &event {
            // The subscription may have been dropped; the snapshot is still recorded.
            let _ = progress_tx.send(snapshot.clone());
        }
        match result.apply(event) {
            Step::Continue => {}
            Step::Complete => return Ok(result.complete(query)),
            Step::Failed(message) => return Err(StreamError::Server(message)),
        }
    }

    Err(StreamError::Disconnected)
}

enum Next {
    Progress(Option<ProgressSnapshot>),
    Settled(Result<Outcome, oneshot::error::RecvError>),
}

impl SessionHandle {
    /// Take the progress subscription. Only the first call returns it.
    pub fn subscribe_progress(&mut self) -> Option<ProgressSubscription> {
        self.progress.take()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// A token that cancels this session when fired.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Abort the session and release the channel. The outcome is never settled.
    pub fn cancel(self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the terminal outcome. A cancelled session yields
    /// `StreamError::Cancelled`.
    pub async fn outcome(mut self) -> Outcome {
        match (&mut self.outcome).await {
            Ok(outcome) => outcome,
            Err(_) => Err(StreamError::Cancelled),
        }
    }

    /// Wait for the terminal outcome, calling `on_progress` for every snapshot
    /// received before it, in receipt order.
    pub async fn outcome_with_progress<F>(mut self, mut on_progress: F) -> Outcome
    where
        F: FnMut(&ProgressSnapshot),
    {
        let mut subscription = self.progress.take();

        loop {
            let next = match subscription.as_mut() {
                Some(progress) => tokio::select! {
                    biased;
                    settled = &mut self.outcome => Next::Settled(settled),
                    snapshot = progress.next() => Next::Progress(snapshot),
                },
                None => Next::Settled((&mut self.outcome).await),
            };

            match next {
                Next::Progress(Some(snapshot)) => on_progress(&snapshot),
                Next::Progress(None) => subscription = None,
                Next::Settled(settled) => {
                    if let Some(progress) = subscription.as_mut() {
                        while let Some(snapshot) = progress.try_next() {
                            on_progress(&snapshot);
                        }
                    }
                    return settled.unwrap_or(Err(StreamError::Cancelled));
                }
            }
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::EventStream;
    use async_trait::async_trait;
    use mimic_dx_types::{
        ProvideInfoRequest, ProvideInfoResponse, QueryRequest, QueryResponse, Role,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays a fixed list of stream items and counts how many were pulled.
    struct ScriptedStreamClient {
        items: Mutex<Option<Vec<Result<DiagnoseEvent, StreamError>>>>,
        pulled: Arc<AtomicUsize>,
        hang_after_items: bool,
    }

    impl ScriptedStreamClient {
        fn new(items: Vec<Result<DiagnoseEvent, StreamError>>) -> Self {
            Self {
                items: Mutex::new(Some(items)),
                pulled: Arc::new(AtomicUsize::new(0)),
                hang_after_items: false,
            }
        }

        fn hanging(items: Vec<Result<DiagnoseEvent, StreamError>>) -> Self {
            Self {
                hang_after_items: true,
                ..Self::new(items)
            }
        }
    }

    #[async_trait]
    impl DiagnosticClient for ScriptedStreamClient {
        fn base_url(&self) -> &str {
            "http://scripted"
        }

        async fn probe(&self) -> Result<(), TransportError> {
            Ok(())
        }

        async fn query(&self, _request: QueryRequest) -> Result<QueryResponse, TransportError> {
            Ok(QueryResponse::default())
        }

        async fn provide_info(
            &self,
            _request: ProvideInfoRequest,
        ) -> Result<ProvideInfoResponse, TransportError> {
            Ok(ProvideInfoResponse::default())
        }

        async fn open_diagnose_stream(&self, _query: &str) -> Result<EventStream, StreamError> {
            let items = self.items.lock().unwrap().take().unwrap_or_default();
            let pulled = self.pulled.clone();
            let scripted = futures::stream::iter(items).inspect(move |_| {
                pulled.fetch_add(1, Ordering::SeqCst);
            });
            if self.hang_after_items {
                Ok(Box::pin(scripted.chain(futures::stream::pending())))
            } else {
                Ok(Box::pin(scripted))
            }
        }
    }

    fn progress(overall: f64) -> ProgressSnapshot {
        ProgressSnapshot {
            overall_progress: overall,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_follow_up_question_scenario() {
        let client = Arc::new(ScriptedStreamClient::new(vec![
            Ok(DiagnoseEvent::Status("Querying DB".to_string())),
            Ok(DiagnoseEvent::Search("What is the temperature?".to_string())),
            Ok(DiagnoseEvent::Done),
        ]));

        let result = open(client, "does patient X have sepsis").outcome().await.unwrap();

        assert_eq!(result.status, vec!["Querying DB"]);
        assert_eq!(result.search_query, "What is the temperature?");
        assert!(result.needs_follow_up());
        assert_eq!(result.answer, "");
        let conversation = result.conversation.unwrap();
        assert_eq!(
            conversation,
            vec![
                Message::user("does patient X have sepsis"),
                Message::assistant(""),
            ]
        );
    }

    #[tokio::test]
    async fn test_last_write_wins_and_server_snapshot_is_kept() {
        let snapshot = vec![Message::user("q"), Message::assistant("server view")];
        let client = Arc::new(ScriptedStreamClient::new(vec![
            Ok(DiagnoseEvent::Thinking("first".to_string())),
            Ok(DiagnoseEvent::Thinking("second".to_string())),
            Ok(DiagnoseEvent::Answer("maybe".to_string())),
            Ok(DiagnoseEvent::Answer("qSOFA 2: likely sepsis".to_string())),
            Ok(DiagnoseEvent::Database("hr=120".to_string())),
            Ok(DiagnoseEvent::Full("full text".to_string())),
            Ok(DiagnoseEvent::Conversation(snapshot.clone())),
            Ok(DiagnoseEvent::Unknown("heartbeat".to_string())),
            Ok(DiagnoseEvent::Done),
        ]));

        let result = open(client, "q").outcome().await.unwrap();

        assert_eq!(result.thinking, "second");
        assert_eq!(result.answer, "qSOFA 2: likely sepsis");
        assert_eq!(result.database, "hr=120");
        assert_eq!(result.full_response, "full text");
        assert_eq!(result.conversation, Some(snapshot));
        assert!(!result.needs_follow_up());
    }

    #[tokio::test]
    async fn test_done_synthesizes_history_from_full_response() {
        let client = Arc::new(ScriptedStreamClient::new(vec![
            Ok(DiagnoseEvent::Full("Patient meets SIRS criteria".to_string())),
            Ok(DiagnoseEvent::Done),
        ]));

        let conversation = open(client, "q").outcome().await.unwrap().conversation.unwrap();

        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation[0].role, Role::User);
        assert_eq!(conversation[1].role, Role::Assistant);
        assert_eq!(conversation[1].content, "Patient meets SIRS criteria");
    }

    #[tokio::test]
    async fn test_empty_snapshot_is_replaced_by_synthesized_history() {
        let client = Arc::new(ScriptedStreamClient::new(vec![
            Ok(DiagnoseEvent::Search("What is the temperature?".to_string())),
            Ok(DiagnoseEvent::Conversation(Vec::new())),
            Ok(DiagnoseEvent::Done),
        ]));

        let result = open(client, "does patient X have sepsis").outcome().await.unwrap();

        assert_eq!(
            result.conversation,
            Some(vec![
                Message::user("does patient X have sepsis"),
                Message::assistant(""),
            ])
        );
    }

    #[tokio::test]
    async fn test_error_event_rejects_and_stops_processing() {
        let client = Arc::new(ScriptedStreamClient::new(vec![
            Ok(DiagnoseEvent::Status("Querying DB".to_string())),
            Ok(DiagnoseEvent::Error("model offline".to_string())),
            Ok(DiagnoseEvent::Status("late".to_string())),
            Ok(DiagnoseEvent::Done),
        ]));
        let pulled = client.pulled.clone();

        let handle = open(client, "q");
        let mut state = handle.watch_state();
        let outcome = handle.outcome().await;

        assert_eq!(outcome, Err(StreamError::Server("model offline".to_string())));
        assert_eq!(pulled.load(Ordering::SeqCst), 2);
        assert_eq!(*state.borrow_and_update(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_events_after_done_are_ignored() {
        let client = Arc::new(ScriptedStreamClient::new(vec![
            Ok(DiagnoseEvent::Status("one".to_string())),
            Ok(DiagnoseEvent::Done),
            Ok(DiagnoseEvent::Status("late".to_string())),
            Ok(DiagnoseEvent::Error("late error".to_string())),
        ]));
        let pulled = client.pulled.clone();

        let result = open(client, "q").outcome().await.unwrap();

        assert_eq!(result.status, vec!["one"]);
        assert_eq!(pulled.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_malformed_event_rejects_with_parse_error() {
        let parse_error = mimic_dx_types::ProtocolError::malformed("bad");
        let client = Arc::new(ScriptedStreamClient::new(vec![
            Ok(DiagnoseEvent::Status("one".to_string())),
            Err(StreamError::Parse(parse_error.clone())),
            Ok(DiagnoseEvent::Done),
        ]));

        let outcome = open(client, "q").outcome().await;

        assert_eq!(outcome, Err(StreamError::Parse(parse_error)));
    }

    #[tokio::test]
    async fn test_channel_closing_without_terminal_event() {
        let client = Arc::new(ScriptedStreamClient::new(vec![Ok(DiagnoseEvent::Status(
            "one".to_string(),
        ))]));

        assert_eq!(open(client, "q").outcome().await, Err(StreamError::Disconnected));
    }

    #[tokio::test]
    async fn test_progress_is_delivered_in_order_before_resolution() {
        let client = Arc::new(ScriptedStreamClient::new(vec![
            Ok(DiagnoseEvent::ModelProgress(progress(10.0))),
            Ok(DiagnoseEvent::Status("loading".to_string())),
            Ok(DiagnoseEvent::ModelProgress(progress(55.0))),
            Ok(DiagnoseEvent::ModelProgress(progress(120.0))),
            Ok(DiagnoseEvent::Done),
        ]));

        let mut seen = Vec::new();
        let result = open(client, "q")
            .outcome_with_progress(|snapshot| seen.push(snapshot.overall_progress))
            .await
            .unwrap();

        assert_eq!(seen, vec![10.0, 55.0, 120.0]);
        assert_eq!(result.progress.len(), 3);
    }

    #[tokio::test]
    async fn test_progress_subscription_attached_late_sees_buffered_snapshots() {
        let client = Arc::new(ScriptedStreamClient::hanging(vec![
            Ok(DiagnoseEvent::ModelProgress(progress(25.0))),
            Ok(DiagnoseEvent::ModelProgress(progress(50.0))),
        ]));

        let mut handle = open(client, "q");
        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut subscription = handle.subscribe_progress().unwrap();
        assert!(handle.subscribe_progress().is_none());

        assert_eq!(subscription.next().await.unwrap().overall_progress, 25.0);
        assert_eq!(subscription.next().await.unwrap().overall_progress, 50.0);
        assert_eq!(handle.state(), SessionState::Receiving);
        handle.cancel();
        assert_eq!(subscription.next().await, None);
    }

    #[tokio::test]
    async fn test_cancel_releases_channel_without_settling() {
        let client = Arc::new(ScriptedStreamClient::hanging(vec![Ok(DiagnoseEvent::Status(
            "one".to_string(),
        ))]));

        let handle = open(client, "q");
        let token = handle.cancel_token();
        let mut state = handle.watch_state();

        let waiter = tokio::spawn(handle.outcome());
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        assert_eq!(waiter.await.unwrap(), Err(StreamError::Cancelled));
        state
            .wait_for(|state| *state == SessionState::Cancelled)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_session_over_http() {
        use crate::test_utils::{MockDiagnosticServer, MockScript};
        use crate::{ClientConfig, HttpDiagnosticClient};
        use serde_json::json;

        let server = MockDiagnosticServer::start(MockScript {
            sse_events: vec![
                json!({"type": "model_progress", "content": {"overall_progress": 40.0, "files": {}}})
                    .to_string(),
                json!({"type": "status", "content": "Querying DB"}).to_string(),
                json!({"type": "answer", "content": "qSOFA 2"}).to_string(),
                json!({"type": "full", "content": "qSOFA 2: sepsis likely"}).to_string(),
                json!({"type": "done", "content": ""}).to_string(),
            ],
            ..Default::default()
        })
        .await;
        let client = Arc::new(HttpDiagnosticClient::new(ClientConfig::new(server.address())));

        let mut seen = Vec::new();
        let result = open(client, "does patient X have sepsis")
            .outcome_with_progress(|snapshot| seen.push(snapshot.overall_progress))
            .await
            .unwrap();

        assert_eq!(seen, vec![40.0]);
        assert_eq!(result.status, vec!["Querying DB"]);
        assert_eq!(result.answer, "qSOFA 2");
        assert_eq!(
            result.conversation.unwrap()[1],
            Message::assistant("qSOFA 2: sepsis likely")
        );
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_step_for_terminal_events() {
        let mut result = StreamResult::default();
        assert_eq!(result.apply(DiagnoseEvent::Done), Step::Complete);
        assert_eq!(
            result.apply(DiagnoseEvent::Error("x".to_string())),
            Step::Failed("x".to_string())
        );
        assert!(SessionState::Cancelled.is_settled());
        assert!(!SessionState::Receiving.is_settled());
    }
}
