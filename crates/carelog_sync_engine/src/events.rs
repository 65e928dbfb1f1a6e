//! Lifecycle events emitted by the sync engine.
//!
//! Events are delivered to every subscriber in emission order. A subscriber
//! that drops its receiver is pruned on the next emit.

use crate::status::SyncStatus;
use carelog_sync_protocol::{ConflictResolutionResult, EntityType, Timestamp};
use parking_lot::RwLock;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// An event emitted by the sync engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The sync status changed.
    StatusChanged {
        /// Status before the transition.
        previous: SyncStatus,
        /// Status after the transition.
        current: SyncStatus,
    },
    /// A sync cycle started.
    SyncStarted {
        /// Number of queue entries picked up.
        pending: usize,
    },
    /// A sync cycle completed.
    SyncCompleted {
        /// Entries acknowledged or resolved.
        synced: usize,
        /// Entries still queued after the cycle.
        failed: usize,
        /// Completion time.
        completed_at: Timestamp,
    },
    /// A sync cycle aborted on an unexpected error.
    SyncFailed {
        /// Error description.
        error: String,
    },
    /// A queue entry was acknowledged by the server.
    EntrySynced {
        /// Entity type.
        entity_type: EntityType,
        /// Entity identifier.
        entity_id: String,
    },
    /// A queue entry failed and stays queued.
    EntryFailed {
        /// Entity type.
        entity_type: EntityType,
        /// Entity identifier.
        entity_id: String,
        /// Error description.
        error: String,
    },
    /// Connectivity changed.
    NetworkChanged {
        /// Whether the device is now online.
        online: bool,
    },
    /// A server-reported conflict was resolved.
    ConflictResolved(ConflictResolutionResult),
}

/// Fan-out of engine events to subscribers.
#[derive(Debug, Default)]
pub(crate) struct EventBus {
    subscribers: RwLock<Vec<UnboundedSender<SyncEvent>>>,
}

impl EventBus {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Adds a subscriber.
    pub(crate) fn subscribe(&self) -> UnboundedReceiver<SyncEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Delivers an event to all live subscribers.
    pub(crate) fn emit(&self, event: SyncEvent) {
        tracing::trace!(?event, "sync event");
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}
