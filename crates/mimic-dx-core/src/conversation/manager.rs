use mimic_dx_types::Message;
use serde_json::Value;
use std::sync::Arc;

use super::store::KeyValueStore;
use crate::errors::StoreError;

/// Storage key of the persisted conversation.
pub const HISTORY_KEY: &str = "conversation_history";

/// What durable storage held, after validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistorySnapshot {
    /// Something other than an empty list was stored.
    pub present: bool,
    pub messages: Vec<Message>,
    /// Stored entries dropped by validation.
    pub discarded: usize,
}

/// Validates, loads and persists the conversation history.
#[derive(Clone)]
pub struct ConversationManager {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl ConversationManager {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_key(store, HISTORY_KEY)
    }

    pub fn with_key(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// Keep the well-formed messages of `candidate`, in order. Anything that is not
    /// a list yields nothing.
    pub fn validate(candidate: &Value) -> Vec<Message> {
        match candidate {
            Value::Array(entries) => Self::validate_entries(entries),
            _ => Vec::new(),
        }
    }

    pub fn validate_entries(entries: &[Value]) -> Vec<Message> {
        let messages = Message::collect_valid(entries);
        if messages.len() < entries.len() {
            log::warn!(
                "Discarded {} malformed conversation history entries",
                entries.len() - messages.len()
            );
        }
        messages
    }

    /// Stored history, or empty when missing or unreadable.
    pub async fn load(&self) -> Vec<Message> {
        self.load_snapshot().await.messages
    }

    pub async fn load_snapshot(&self) -> HistorySnapshot {
        let raw = match self.store.load(&self.key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return HistorySnapshot::default(),
            Err(e) => {
                log::warn!("Failed to read conversation history: {}", e);
                return HistorySnapshot::default();
            }
        };

        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Array(entries)) => {
                let messages = Self::validate_entries(&entries);
                HistorySnapshot {
                    present: !entries.is_empty(),
                    discarded: entries.len() - messages.len(),
                    messages,
                }
            }
            Ok(other) => {
                log::warn!(
                    "Stored conversation history is not a list (found {}), ignoring it",
                    json_kind(&other)
                );
                HistorySnapshot {
                    present: true,
                    messages: Vec::new(),
                    discarded: 1,
                }
            }
            Err(e) => {
                log::warn!("Stored conversation history is not valid JSON: {}", e);
                HistorySnapshot {
                    present: true,
                    messages: Vec::new(),
                    discarded: 1,
                }
            }
        }
    }

    /// Replace the stored history with `messages`.
    pub async fn save(&self, messages: &[Message]) -> Result<(), StoreError> {
        let payload = serde_json::to_string(messages)?;
        self.store.save(&self.key, &payload).await?;
        log::debug!("Persisted {} conversation messages", messages.len());
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), StoreError> {
        self.store.clear(&self.key).await
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
