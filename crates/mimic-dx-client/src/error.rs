//! Error types for transport calls and stream sessions.

use mimic_dx_types::ProtocolError;
use thiserror::Error;

/// Failure of a single request/response call, after retries.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Request to {endpoint} timed out")]
    Timeout { endpoint: String },

    #[error("Could not connect to {endpoint}: {message}")]
    Connect { endpoint: String, message: String },

    #[error("{endpoint} returned HTTP {status}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Invalid response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },

    #[error("Request to {endpoint} failed: {message}")]
    Request { endpoint: String, message: String },
}

impl TransportError {
    /// Classify a reqwest failure for `endpoint`.
    pub fn from_reqwest(endpoint: impl Into<String>, err: reqwest::Error) -> Self {
        let endpoint = endpoint.into();
        if err.is_timeout() {
            Self::Timeout { endpoint }
        } else if err.is_connect() {
            Self::Connect {
                endpoint,
                message: err.to_string(),
            }
        } else if err.is_decode() {
            Self::Decode {
                endpoint,
                message: err.to_string(),
            }
        } else {
            Self::Request {
                endpoint,
                message: err.to_string(),
            }
        }
    }

    /// True when the service could not be reached at all.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Connect { .. })
    }

    /// Technical details worth showing next to the error message.
    pub fn details(&self) -> Option<String> {
        match self {
            Self::Status { body, .. } if !body.is_empty() => Some(body.clone()),
            Self::Connect { message, .. }
            | Self::Decode { message, .. }
            | Self::Request { message, .. } => Some(message.clone()),
            _ => None,
        }
    }
}

/// Failure of a stream session.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StreamError {
    /// The stream could not be opened.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server sent an `error` event.
    #[error("{0}")]
    Server(String),

    /// An event could not be decoded.
    #[error("Failed to parse server event: {0}")]
    Parse(#[from] ProtocolError),

    /// Reading from the channel failed mid-stream.
    #[error("Stream read failed: {0}")]
    Read(String),

    /// The channel closed before a terminal event.
    #[error("Stream disconnected before the diagnosis completed")]
    Disconnected,

    /// The caller aborted the session.
    #[error("Stream session was cancelled")]
    Cancelled,
}

impl StreamError {
    pub fn is_connectivity(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_connectivity(),
            Self::Read(_) | Self::Disconnected => true,
            _ => false,
        }
    }
}
