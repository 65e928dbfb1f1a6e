//! Error types for the sync engine.

use carelog_sync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for sync engine operations.
pub type EngineResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// No response was received (connection refused, reset, DNS, ...).
    #[error("network error: {message}")]
    Network {
        /// Error message.
        message: String,
    },

    /// The server answered with a non-success HTTP status.
    #[error("http error {status}: {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },

    /// The request did not complete within the transport timeout.
    #[error("operation timed out")]
    Timeout,

    /// Connectivity dropped between retry attempts.
    #[error("disconnected mid-sync")]
    Disconnected,

    /// The device is offline.
    #[error("not connected to server")]
    NotConnected,

    /// No transport has been configured yet.
    #[error("no sync transport configured")]
    NoTransport,

    /// Protocol error (invalid message or payload).
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Local mutation store error.
    #[error("store error: {0}")]
    Store(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Creates a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates an HTTP status error.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    /// Returns true if this is an HTTP 4xx error.
    ///
    /// Client errors recur identically until the request changes, so they
    /// are never retried.
    pub fn is_client_error(&self) -> bool {
        matches!(self, SyncError::Http { status, .. } if (400..500).contains(status))
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Network { .. } | SyncError::Timeout => true,
            SyncError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
