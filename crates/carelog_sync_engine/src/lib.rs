//! # Carelog Sync Engine
//!
//! Offline-first synchronization of caregiving events.
//!
//! This crate provides:
//! - Sync engine draining the local mutation queue in sequential batches
//! - Sync status state machine (offline → pending → syncing → synced/error)
//! - Last-write-wins conflict resolution with caregiver attribution
//! - Retry with exponential backoff, jitter and cancellation on disconnect
//! - Local mutation store contract with in-memory and file-backed stores
//! - HTTP transport abstraction
//!
//! ## Architecture
//!
//! Every local mutation is written to the local entity copy and queued.
//! Whenever the device is online the engine pushes queued changes to the
//! server:
//! 1. Read the pending queue in enqueue order
//! 2. Push it in batches, one batch at a time
//! 3. Acknowledge accepted entries, resolve reported conflicts, and keep
//!    failed entries queued with their error for the next cycle
//!
//! ## Key Invariants
//!
//! - A queue entry exists until the server acknowledges its change
//! - At most one sync cycle runs at a time
//! - Client errors (HTTP 4xx) are never retried
//! - Conflict ties go to the local version
//! - Public entry points never fail the caller; failures surface as
//!   status and events

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod connectivity;
mod device;
mod engine;
mod error;
mod events;
mod file_store;
mod http;
mod retry;
mod status;
mod store;
mod transport;

pub use config::{RetryConfig, SyncConfig};
pub use connectivity::Connectivity;
pub use device::DeviceId;
pub use engine::{
    CycleOutcome, CycleReport, SkipReason, SyncEngine, SyncStats, CONFLICT_RESOLUTION_FAILED,
    PUSH_REJECTED,
};
pub use error::{EngineResult, SyncError};
pub use events::SyncEvent;
pub use file_store::FileMutationStore;
pub use http::{
    HttpClient, HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestClient, StaticToken,
    TokenProvider, DEVICE_ID_HEADER,
};
pub use retry::RetryExecutor;
pub use status::SyncStatus;
pub use store::{MemoryMutationStore, MutationStore, QueueEntryId, StoredEntity, SyncQueueEntry};
pub use transport::{MockTransport, SyncTransport};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
