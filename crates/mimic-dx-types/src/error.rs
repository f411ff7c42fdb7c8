//! Error types for protocol decoding.

use thiserror::Error;

/// Errors raised while decoding payloads received from the diagnostic service.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// The payload was not valid JSON or did not have the expected envelope.
    #[error("Malformed event payload: {message}")]
    Malformed { message: String },

    /// The envelope was valid but the content did not match the event type.
    #[error("Invalid content for '{event_type}' event: {message}")]
    InvalidContent { event_type: String, message: String },
}

impl ProtocolError {
    /// Create a new malformed payload error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }

    /// Create a new invalid content error.
    pub fn invalid_content(event_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidContent {
            event_type: event_type.into(),
            message: message.into(),
        }
    }
}

/// Result type for protocol decoding.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
