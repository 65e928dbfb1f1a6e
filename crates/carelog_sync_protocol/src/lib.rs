//! # Carelog Sync Protocol
//!
//! Wire types and conflict resolution for Carelog offline sync.
//!
//! This crate provides:
//! - `SyncChange` for a single local mutation destined for the server
//! - Protocol messages (`SyncPayload`, `SyncResult`, `SyncConflict`)
//! - Last-write-wins conflict resolution with caregiver attribution
//! - JSON encoding/decoding
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod error;
mod messages;
mod operation;

pub use conflict::{resolve_conflict, ConflictResolutionResult, Resolution, VersionInfo};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{SyncConflict, SyncPayload, SyncResult};
pub use operation::{EntityData, EntityType, Operation, SyncChange};

/// Timestamp type used throughout the protocol.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
