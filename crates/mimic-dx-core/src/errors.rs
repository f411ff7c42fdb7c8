//! Error types for session orchestration
//!
//! Transport and stream failures come from the client crate unchanged. State failures
//! (no history to resume from, or nothing usable in it) are local and never involve the
//! network, so they get their own variants and their own user guidance.

use mimic_dx_client::{StreamError, TransportError};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error("Missing conversation history")]
    MissingHistory,
    #[error("Conversation history contains no valid messages ({discarded} entries discarded)")]
    NoValidHistory { discarded: usize },
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Request was cancelled")]
    Cancelled,
}

impl SessionError {
    /// True when the service could not be reached at all.
    pub fn is_connectivity(&self) -> bool {
        match self {
            SessionError::Transport(err) => err.is_connectivity(),
            SessionError::Stream(err) => err.is_connectivity(),
            _ => false,
        }
    }

    /// True for failures of local conversation state; retrying cannot fix these.
    pub fn is_state_failure(&self) -> bool {
        matches!(
            self,
            SessionError::MissingHistory | SessionError::NoValidHistory { .. }
        )
    }
}

/// Failure of the durable key/value store.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("I/O error on {path}: {message}")]
    Io { path: String, message: String },
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn io(path: impl std::fmt::Display, err: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_string(),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
