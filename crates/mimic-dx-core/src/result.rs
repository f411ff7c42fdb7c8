//! Normalized turn results handed to the presentation layer.

use mimic_dx_client::{StreamError, StreamResult, TransportError};
use mimic_dx_types::{Message, ProvideInfoResponse};
use serde::Serialize;

use crate::errors::SessionError;

const GENERIC_FAILURE: &str = "Failed to fetch response from server.";
const RESTART_GUIDANCE: &str = "Please start a new diagnostic session.";

/// `{ error, details? }` as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionFailure {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl SessionFailure {
    /// Normalize `err`. Connectivity failures name `base_url` and say what to check.
    pub fn from_error(err: &SessionError, base_url: &str) -> Self {
        if err.is_connectivity() {
            return SessionFailure {
                error: format!(
                    "Cannot reach the diagnostic service at {}. Check that the server is \
                     running and that the address and port are correct.",
                    base_url
                ),
                details: Some(err.to_string()),
            };
        }

        match err {
            SessionError::MissingHistory | SessionError::NoValidHistory { .. } => SessionFailure {
                error: format!("{}. {}", err, RESTART_GUIDANCE),
                details: None,
            },
            SessionError::Stream(StreamError::Server(message)) => SessionFailure {
                error: message.clone(),
                details: None,
            },
            SessionError::Stream(StreamError::Transport(transport))
            | SessionError::Transport(transport) => Self::from_transport(transport),
            SessionError::Stream(StreamError::Parse(parse)) => SessionFailure {
                error: "Received an unreadable event from the server.".to_string(),
                details: Some(parse.to_string()),
            },
            SessionError::Stream(stream) => SessionFailure {
                error: stream.to_string(),
                details: None,
            },
            SessionError::Storage(_) | SessionError::Config(_) | SessionError::Cancelled => {
                SessionFailure {
                    error: err.to_string(),
                    details: None,
                }
            }
        }
    }

    fn from_transport(err: &TransportError) -> Self {
        SessionFailure {
            error: GENERIC_FAILURE.to_string(),
            details: Some(match err.details() {
                Some(details) => format!("{}: {}", err, details),
                None => err.to_string(),
            }),
        }
    }
}

/// Outcome of one turn: the accumulated fields, or an error with empty fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionResult {
    pub status: Vec<String>,
    pub thinking: String,
    pub search_query: String,
    pub answer: String,
    pub full_response: String,
    /// Database context the server based its reasoning on.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub database_info: String,
    pub conversation_history: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl SessionResult {
    pub fn from_stream(result: StreamResult, conversation_history: Vec<Message>) -> Self {
        SessionResult {
            status: result.status,
            thinking: result.thinking,
            search_query: result.search_query,
            answer: result.answer,
            full_response: result.full_response,
            database_info: result.database,
            conversation_history,
            error: None,
            details: None,
        }
    }

    /// Absent optional fields default to empty.
    pub fn from_provide_info(
        response: ProvideInfoResponse,
        conversation_history: Vec<Message>,
    ) -> Self {
        SessionResult {
            status: response.status.map(|s| s.into_lines()).unwrap_or_default(),
            thinking: response.thinking.unwrap_or_default(),
            search_query: response.search_query.unwrap_or_default(),
            answer: response.answer.unwrap_or_default(),
            full_response: response.full_response.unwrap_or_default(),
            database_info: String::new(),
            conversation_history,
            error: None,
            details: None,
        }
    }

    pub fn failed(failure: SessionFailure) -> Self {
        SessionResult {
            error: Some(failure.error),
            details: failure.details,
            ..Default::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// The server asked a follow-up question.
    pub fn needs_follow_up(&self) -> bool {
        !self.is_error() && !self.search_query.is_empty()
    }

    pub fn failure(&self) -> Option<SessionFailure> {
        self.error.as_ref().map(|error| SessionFailure {
            error: error.clone(),
            details: self.details.clone(),
        })
    }
}
