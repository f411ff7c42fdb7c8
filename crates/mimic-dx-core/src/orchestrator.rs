//! Session orchestration: one diagnostic conversation across turns.
//!
//! A session starts with a streamed `/diagnose` turn. When the server answers with a
//! follow-up question, the user's answer is sent to `/provide_info` together with the
//! conversation so far. Both operations take `&mut self`, so a resume can never run
//! while a start stream is still open. Failures never change the conversation; they
//! come back as a [`SessionResult`] carrying `{ error, details }`.

use mimic_dx_client::session;
use mimic_dx_client::DiagnosticClient;
use mimic_dx_types::{Message, ProgressSnapshot, ProvideInfoRequest, QueryRequest, QueryResponse};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::conversation::ConversationManager;
use crate::errors::SessionError;
use crate::result::{SessionFailure, SessionResult};

pub type ProgressCallback = Box<dyn FnMut(&ProgressSnapshot) + Send>;

pub struct SessionOrchestrator {
    client: Arc<dyn DiagnosticClient>,
    history: ConversationManager,
    conversation: Vec<Message>,
    pending_follow_up: Option<String>,
    on_progress: Option<ProgressCallback>,
}

impl SessionOrchestrator {
    pub fn new(client: Arc<dyn DiagnosticClient>, history: ConversationManager) -> Self {
        Self {
            client,
            history,
            conversation: Vec::new(),
            pending_follow_up: None,
            on_progress: None,
        }
    }

    /// Register the callback that receives progress snapshots of streamed turns.
    pub fn on_progress<F>(&mut self, callback: F)
    where
        F: FnMut(&ProgressSnapshot) + Send + 'static,
    {
        self.on_progress = Some(Box::new(callback));
    }

    /// Reload the persisted conversation. Returns the number of messages restored.
    pub async fn restore(&mut self) -> usize {
        self.conversation = self.history.load().await;
        if !self.conversation.is_empty() {
            log::info!(
                "Restored {} conversation messages from storage",
                self.conversation.len()
            );
        }
        self.conversation.len()
    }

    pub fn conversation(&self) -> &[Message] {
        &self.conversation
    }

    /// The follow-up question of the last successful turn, if it asked one.
    pub fn pending_follow_up(&self) -> Option<&str> {
        self.pending_follow_up.as_deref()
    }

    pub fn base_url(&self) -> &str {
        self.client.base_url()
    }

    /// Check that the service is reachable.
    pub async fn probe(&self) -> Result<(), SessionFailure> {
        self.client
            .probe()
            .await
            .map_err(|e| self.failure(&SessionError::Transport(e)))
    }

    /// Run one streamed diagnostic turn for `query`.
    pub async fn start_session(&mut self, query: &str) -> SessionResult {
        self.start_session_cancellable(query, CancellationToken::new())
            .await
    }

    /// Like [`start_session`](Self::start_session); firing `cancel` aborts the stream
    /// and the turn fails with a cancellation error.
    pub async fn start_session_cancellable(
        &mut self,
        query: &str,
        cancel: CancellationToken,
    ) -> SessionResult {
        match self.try_start(query, cancel).await {
            Ok(result) => result,
            Err(e) => self.fail(e),
        }
    }

    async fn try_start(
        &mut self,
        query: &str,
        cancel: CancellationToken,
    ) -> Result<SessionResult, SessionError> {
        self.advisory_probe().await;

        let handle = session::open_with_cancel(self.client.clone(), query, cancel);
        let on_progress = &mut self.on_progress;
        let result = handle
            .outcome_with_progress(|snapshot| {
                if let Some(callback) = on_progress.as_mut() {
                    callback(snapshot);
                }
            })
            .await?;

        let history = result.conversation.clone().unwrap_or_default();

        self.adopt(history.clone(), &result.search_query).await;
        Ok(SessionResult::from_stream(result, history))
    }

    /// Answer the pending follow-up question with `answer`.
    pub async fn resume_session(&mut self, answer: &str) -> SessionResult {
        self.resume_session_cancellable(answer, CancellationToken::new())
            .await
    }

    /// Like [`resume_session`](Self::resume_session); firing `cancel` abandons the
    /// request and leaves the conversation unchanged.
    pub async fn resume_session_cancellable(
        &mut self,
        answer: &str,
        cancel: CancellationToken,
    ) -> SessionResult {
        match self.try_resume(answer, cancel).await {
            Ok(result) => result,
            Err(e) => self.fail(e),
        }
    }

    async fn try_resume(
        &mut self,
        answer: &str,
        cancel: CancellationToken,
    ) -> Result<SessionResult, SessionError> {
        let history = if self.conversation.is_empty() {
            let snapshot = self.history.load_snapshot().await;
            if !snapshot.present {
                return Err(SessionError::MissingHistory);
            }
            if snapshot.messages.is_empty() {
                return Err(SessionError::NoValidHistory {
                    discarded: snapshot.discarded,
                });
            }
            snapshot.messages
        } else {
            self.conversation.clone()
        };

        self.advisory_probe().await;

        let request = ProvideInfoRequest {
            user_response: answer.to_string(),
            conversation_history: history.clone(),
        };
        let mut response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SessionError::Cancelled),
            response = self.client.provide_info(request) => response?,
        };

        let returned = response
            .conversation_history
            .take()
            .map(|entries| ConversationManager::validate_entries(&entries))
            .filter(|messages| !messages.is_empty());
        let updated = match returned {
            Some(messages) => messages,
            None => {
                let mut messages = history;
                messages.push(Message::user(answer));
                messages.push(Message::assistant(
                    response.full_response.clone().unwrap_or_default(),
                ));
                messages
            }
        };

        let result = SessionResult::from_provide_info(response, updated.clone());
        self.adopt(updated, &result.search_query).await;
        Ok(result)
    }

    /// Legacy single-shot query. Does not touch the conversation.
    pub async fn run_query(&self, text: &str) -> Result<QueryResponse, SessionFailure> {
        let request = QueryRequest {
            user_query: text.to_string(),
        };
        self.client
            .query(request)
            .await
            .map_err(|e| self.failure(&SessionError::Transport(e)))
    }

    /// Forget the conversation, in memory and in storage.
    pub async fn clear_history(&mut self) -> Result<(), SessionError> {
        self.conversation.clear();
        self.pending_follow_up = None;
        self.history.clear().await?;
        log::info!("Conversation history cleared");
        Ok(())
    }

    async fn adopt(&mut self, history: Vec<Message>, search_query: &str) {
        if let Err(e) = self.history.save(&history).await {
            log::error!("Failed to persist conversation history: {}", e);
        }
        self.conversation = history;
        self.pending_follow_up = if search_query.is_empty() {
            None
        } else {
            Some(search_query.to_string())
        };
    }

    async fn advisory_probe(&self) {
        match self.client.probe().await {
            Ok(()) => log::debug!("Diagnostic service at {} is reachable", self.base_url()),
            Err(e) => log::warn!("Diagnostic service probe failed, continuing anyway: {}", e),
        }
    }

    fn failure(&self, err: &SessionError) -> SessionFailure {
        SessionFailure::from_error(err, self.client.base_url())
    }

    fn fail(&self, err: SessionError) -> SessionResult {
        if matches!(err, SessionError::Cancelled) {
            log::info!("Resume request cancelled");
        } else if err.is_state_failure() {
            log::warn!("Session cannot continue: {}", err);
        } else {
            log::error!("Diagnostic turn failed: {}", err);
        }
        SessionResult::failed(self.failure(&err))
    }
}
