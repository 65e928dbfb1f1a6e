//! Error types for the sync protocol.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding or interpreting protocol data.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Entity type string is not one of the trackable entity types.
    #[error("unknown entity type: {0}")]
    UnknownEntityType(String),

    /// Operation string is not create, update or delete.
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    /// Entity payload does not have the expected shape.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}
