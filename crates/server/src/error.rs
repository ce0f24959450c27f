//! Structured errors for the worker's stdio transport.
//!
//! Worker failures keep the code prefix from `waypost_core::Error`; frames the
//! transport cannot decode get their own code.

use serde::Serialize;

/// Errors raised while handling one inbound line.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The line is not a valid frame.
    #[error("INVALID_FRAME: {0}")]
    InvalidFrame(String),

    #[error(transparent)]
    Worker(#[from] waypost_core::Error),
}

impl TransportError {
    pub fn code(&self) -> &'static str {
        match self {
            TransportError::InvalidFrame(_) => "INVALID_FRAME",
            TransportError::Worker(e) => e.code(),
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::InvalidFrame(err.to_string())
    }
}

/// Wire form of an error reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl From<&TransportError> for ErrorBody {
    fn from(err: &TransportError) -> Self {
        Self { code: err.code().into(), message: err.to_string() }
    }
}
