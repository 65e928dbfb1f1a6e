//! Error types for the sync server.

use carelog_sync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The `X-Device-ID` header is missing or empty.
    #[error("missing X-Device-ID header")]
    MissingDeviceId,

    /// The request carries no valid credentials.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The credentials do not grant access to this request.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// Unknown endpoint.
    #[error("not found: {0}")]
    NotFound(String),

    /// Known endpoint, wrong method.
    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),

    /// Undecodable request body.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::InvalidRequest(_)
            | ServerError::MissingDeviceId
            | ServerError::Protocol(_) => 400,
            ServerError::AuthenticationFailed(_) => 401,
            ServerError::NotAuthorized(_) => 403,
            ServerError::NotFound(_) => 404,
            ServerError::MethodNotAllowed(_) => 405,
            ServerError::Internal(_) => 500,
        }
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }
}
