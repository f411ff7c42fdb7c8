//! Core types for the diagnostic session protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Message roles in the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A message written by the person asking.
    User,
    /// A message produced by the diagnostic model.
    Assistant,
}

impl Role {
    /// Parse the wire representation of a role.
    pub fn from_wire(role: &str) -> Option<Self> {
        match role {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// A single entry of the conversation history replayed to the remote model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who authored the message.
    pub role: Role,
    /// The message text. May be empty, never absent.
    pub content: String,
}

impl Message {
    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// Interpret an arbitrary JSON value as a message.
    ///
    /// Returns `None` unless the value is an object with a known string `role`
    /// and a string `content`. Extra fields are ignored.
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let role = Role::from_wire(object.get("role")?.as_str()?)?;
        let content = object.get("content")?.as_str()?;
        Some(Self {
            role,
            content: content.to_string(),
        })
    }

    /// Keep the well-formed messages of `candidates`, in order.
    pub fn collect_valid(candidates: &[Value]) -> Vec<Self> {
        candidates.iter().filter_map(Self::from_value).collect()
    }
}

/// Loading progress of a single model file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FileProgress {
    /// Completion percentage. Not clamped.
    #[serde(default)]
    pub percentage: f64,
    /// Raw progress counter, when the server reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    /// Raw total, when the server reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
}

/// Point-in-time report of backend resource loading.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Average completion across all files. Not clamped.
    #[serde(default)]
    pub overall_progress: f64,
    /// Per-file completion keyed by file name.
    #[serde(default)]
    pub files: BTreeMap<String, FileProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_loading: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

/// Body of `POST /query`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub user_query: String,
}

/// Response of the legacy single-shot `POST /query`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub generated_code: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
}

/// Body of `POST /provide_info`, the resumed turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvideInfoRequest {
    pub user_response: String,
    pub conversation_history: Vec<Message>,
}

/// The `status` field of a resumed turn: a single line or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatusField {
    One(String),
    Many(Vec<String>),
}

impl StatusField {
    pub fn into_lines(self) -> Vec<String> {
        match self {
            StatusField::One(line) => vec![line],
            StatusField::Many(lines) => lines,
        }
    }
}

/// Response of `POST /provide_info`. Every field is optional on the wire.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProvideInfoResponse {
    #[serde(default)]
    pub status: Option<StatusField>,
    #[serde(default)]
    pub thinking: Option<String>,
    #[serde(default)]
    pub search_query: Option<String>,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub full_response: Option<String>,
    /// Kept as raw values so that malformed entries can be discarded
    /// individually instead of failing the whole response.
    #[serde(default)]
    pub conversation_history: Option<Vec<Value>>,
}
