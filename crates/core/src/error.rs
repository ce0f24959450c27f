//! Unified error types for the waypost worker.
//!
//! Every variant renders with a stable code prefix so the host transport can
//! report failures without parsing free-form text.

use tokio_rusqlite::rusqlite;

/// Unified error type shared by the store, the strategies and the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The fetch was rejected before any response arrived.
    #[error("NETWORK_FAILURE: {0}")]
    NetworkFailure(String),

    /// The fetch did not answer within the allotted milliseconds.
    #[error("NETWORK_TIMEOUT: no response after {0}ms")]
    Timeout(u64),

    /// No stored entry for the request.
    #[error("CACHE_MISS: {0}")]
    CacheMiss(String),

    /// Durable store read or write failed.
    #[error("STORAGE_FAILURE: {0}")]
    Storage(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("STORAGE_FAILURE: migration failed: {0}")]
    MigrationFailed(String),

    /// The replay endpoint answered with a non-success status.
    #[error("REMOTE_REJECTION: endpoint answered {status}")]
    RemoteRejection { status: u16 },

    /// Push data could not be read as a notification payload.
    #[error("MALFORMED_PUSH_PAYLOAD: {0}")]
    MalformedPushPayload(String),

    /// Invalid URL.
    #[error("INVALID_URL: {0}")]
    InvalidUrl(String),

    /// Invalid input (e.g. an unserializable payload).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// A call into the host runtime failed.
    #[error("HOST_ERROR: {0}")]
    Host(String),
}

impl Error {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NetworkFailure(_) => "NETWORK_FAILURE",
            Error::Timeout(_) => "NETWORK_TIMEOUT",
            Error::CacheMiss(_) => "CACHE_MISS",
            Error::Storage(_) | Error::MigrationFailed(_) => "STORAGE_FAILURE",
            Error::RemoteRejection { .. } => "REMOTE_REJECTION",
            Error::MalformedPushPayload(_) => "MALFORMED_PUSH_PAYLOAD",
            Error::InvalidUrl(_) => "INVALID_URL",
            Error::InvalidInput(_) => "INVALID_INPUT",
            Error::Host(_) => "HOST_ERROR",
        }
    }

    /// Whether this error means the network could not be reached in time.
    pub fn is_network(&self) -> bool {
        matches!(self, Error::NetworkFailure(_) | Error::Timeout(_))
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Storage(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Storage(tokio_rusqlite::Error::Close(c)),
            _ => Error::Storage(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Storage(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Storage(tokio_rusqlite::Error::Error(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidInput(err.to_string())
    }
}
