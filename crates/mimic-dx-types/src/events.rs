//! Event types pushed by the `/diagnose` stream.

use crate::error::{ProtocolError, ProtocolResult};
use crate::types::{Message, ProgressSnapshot};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The type tag of a stream event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Status,
    Thinking,
    Search,
    Answer,
    Database,
    Full,
    ModelProgress,
    Conversation,
    Error,
    Done,
}

impl EventType {
    /// Whether the event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventType::Error | EventType::Done)
    }
}

/// The JSON envelope of every pushed message: `{ "type": ..., "content": ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub content: Value,
}

/// A decoded stream event.
#[derive(Debug, Clone, PartialEq)]
pub enum DiagnoseEvent {
    /// A progress line to append to the status list.
    Status(String),
    /// The model's current reasoning text.
    Thinking(String),
    /// A follow-up question the server needs answered.
    Search(String),
    /// The diagnostic answer.
    Answer(String),
    /// Raw database context used by the model.
    Database(String),
    /// The full raw response text.
    Full(String),
    /// Model loading progress.
    ModelProgress(ProgressSnapshot),
    /// A snapshot of the conversation history, already filtered to well-formed messages.
    Conversation(Vec<Message>),
    /// The server aborted the turn.
    Error(String),
    /// The turn completed.
    Done,
    /// An event type this client does not know about.
    Unknown(String),
}

impl DiagnoseEvent {
    /// Get the event type, or `None` for unknown events.
    pub fn event_type(&self) -> Option<EventType> {
        match self {
            DiagnoseEvent::Status(_) => Some(EventType::Status),
            DiagnoseEvent::Thinking(_) => Some(EventType::Thinking),
            DiagnoseEvent::Search(_) => Some(EventType::Search),
            DiagnoseEvent::Answer(_) => Some(EventType::Answer),
            DiagnoseEvent::Database(_) => Some(EventType::Database),
            DiagnoseEvent::Full(_) => Some(EventType::Full),
            DiagnoseEvent::ModelProgress(_) => Some(EventType::ModelProgress),
            DiagnoseEvent::Conversation(_) => Some(EventType::Conversation),
            DiagnoseEvent::Error(_) => Some(EventType::Error),
            DiagnoseEvent::Done => Some(EventType::Done),
            DiagnoseEvent::Unknown(_) => None,
        }
    }

    /// Creates a `DiagnoseEvent` from the data field of one SSE message.
    ///
    /// # Returns
    ///
    /// The decoded event, or a `ProtocolError` when the data is not a JSON
    /// envelope or the content does not match the declared type.
    pub fn from_sse_data(data: &str) -> ProtocolResult<Self> {
        let envelope: EventEnvelope = serde_json::from_str(data)
            .map_err(|e| ProtocolError::malformed(format!("{}: {}", e, data)))?;
        Self::from_envelope(envelope)
    }

    /// Decode an already parsed envelope.
    pub fn from_envelope(envelope: EventEnvelope) -> ProtocolResult<Self> {
        let EventEnvelope {
            event_type,
            content,
        } = envelope;

        match event_type.as_str() {
            "status" => text_content(&event_type, content).map(DiagnoseEvent::Status),
            "thinking" => text_content(&event_type, content).map(DiagnoseEvent::Thinking),
            "search" => text_content(&event_type, content).map(DiagnoseEvent::Search),
            "answer" => text_content(&event_type, content).map(DiagnoseEvent::Answer),
            "database" => text_content(&event_type, content).map(DiagnoseEvent::Database),
            "full" => text_content(&event_type, content).map(DiagnoseEvent::Full),
            "model_progress" => serde_json::from_value::<ProgressSnapshot>(content)
                .map(DiagnoseEvent::ModelProgress)
                .map_err(|e| ProtocolError::invalid_content(&event_type, e.to_string())),
            "conversation" => match content {
                Value::Array(entries) => Ok(DiagnoseEvent::Conversation(Message::collect_valid(
                    &entries,
                ))),
                other => Err(ProtocolError::invalid_content(
                    &event_type,
                    format!("expected an array of messages, got {}", other),
                )),
            },
            "error" => Ok(DiagnoseEvent::Error(error_content(content))),
            "done" => Ok(DiagnoseEvent::Done),
            _ => Ok(DiagnoseEvent::Unknown(event_type)),
        }
    }
}

fn text_content(event_type: &str, content: Value) -> ProtocolResult<String> {
    match content {
        Value::String(text) => Ok(text),
        Value::Null => Ok(String::new()),
        other => Err(ProtocolError::invalid_content(
            event_type,
            format!("expected a string, got {}", other),
        )),
    }
}

fn error_content(content: Value) -> String {
    match content {
        Value::String(message) => message,
        Value::Null => "Unknown server error".to_string(),
        other => other.to_string(),
    }
}
