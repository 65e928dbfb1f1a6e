//! Local mutation store contract.
//!
//! The store owns two things the engine reads and writes:
//! - the durable, ordered queue of mutations not yet acknowledged by the server
//! - the authoritative local copy of every trackable entity, with its
//!   `synced_at` marker

use crate::error::{EngineResult, SyncError};
use async_trait::async_trait;
use carelog_sync_protocol::{
    EntityData, EntityType, Operation, ProtocolResult, SyncChange, Timestamp,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifier of a queue entry.
pub type QueueEntryId = u64;

/// A persisted, not-yet-acknowledged local mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQueueEntry {
    /// Queue entry ID (monotonically increasing).
    pub id: QueueEntryId,
    /// Entity type.
    pub entity_type: EntityType,
    /// Entity identifier.
    pub entity_id: String,
    /// Kind of mutation.
    pub operation: Operation,
    /// Entity body as JSON text.
    pub serialized_data: String,
    /// When the mutation was recorded.
    pub timestamp: Timestamp,
    /// Caregiver who made the mutation.
    pub caregiver_id: Option<String>,
    /// Number of failed cycles this entry has been through.
    pub retry_count: u32,
    /// Error from the most recent failed attempt.
    pub last_error: Option<String>,
    /// Bumped every time a later change is coalesced into this entry.
    #[serde(default)]
    pub revision: u32,
}

impl SyncQueueEntry {
    /// Parses the entry into the change sent to the server.
    pub fn to_change(&self) -> ProtocolResult<SyncChange> {
        let data = EntityData::from_json(&self.serialized_data)?;
        Ok(SyncChange {
            entity_type: self.entity_type,
            entity_id: self.entity_id.clone(),
            operation: self.operation,
            data,
            timestamp: self.timestamp,
            caregiver_id: self.caregiver_id.clone(),
        })
    }

    fn matches_key(&self, change: &SyncChange) -> bool {
        self.entity_type == change.entity_type
            && self.entity_id == change.entity_id
            && self.operation == change.operation
    }
}

/// The local copy of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEntity {
    /// Entity body.
    pub data: EntityData,
    /// When the server last acknowledged this entity.
    pub synced_at: Option<Timestamp>,
}

/// Durable queue of pending local changes plus the local entity copies.
#[async_trait]
pub trait MutationStore: Send + Sync {
    /// Queues a change.
    ///
    /// Queue entries are keyed by `(entity_type, entity_id, operation)`: a
    /// change with an existing key replaces that entry's data and resets
    /// its retry bookkeeping, keeping its position.
    async fn enqueue(&self, change: &SyncChange) -> EngineResult<QueueEntryId>;

    /// Returns all pending entries in queue order.
    async fn pending(&self) -> EngineResult<Vec<SyncQueueEntry>>;

    /// Returns the number of pending entries.
    async fn pending_count(&self) -> EngineResult<usize>;

    /// Removes a queue entry. Removing a missing entry is not an error.
    async fn remove(&self, id: QueueEntryId) -> EngineResult<()>;

    /// Removes a queue entry only if it is still at `revision`.
    ///
    /// Returns false if the entry is gone or a later change has been
    /// coalesced into it since it was read.
    async fn remove_if_unchanged(&self, id: QueueEntryId, revision: u32) -> EngineResult<bool>;

    /// Marks the local copy of an entity as acknowledged by the server.
    async fn mark_synced(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        synced_at: Timestamp,
    ) -> EngineResult<()>;

    /// Persists failure bookkeeping on a queue entry.
    async fn update_with_error(
        &self,
        id: QueueEntryId,
        retry_count: u32,
        last_error: &str,
    ) -> EngineResult<()>;

    /// Persists failure bookkeeping only if the entry is still at `revision`.
    ///
    /// Returns false, leaving the queue untouched, if the entry is gone or
    /// has been coalesced with a later change.
    async fn update_with_error_if_unchanged(
        &self,
        id: QueueEntryId,
        revision: u32,
        retry_count: u32,
        last_error: &str,
    ) -> EngineResult<bool>;

    /// Overwrites the local copy of an entity.
    async fn update_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        data: &EntityData,
    ) -> EngineResult<()>;

    /// Deletes the local copy of an entity.
    async fn delete_entity(&self, entity_type: EntityType, entity_id: &str) -> EngineResult<()>;

    /// Returns true if the entity has at least one pending queue entry.
    async fn has_pending(&self, entity_type: EntityType, entity_id: &str) -> EngineResult<bool> {
        Ok(self
            .pending()
            .await?
            .iter()
            .any(|e| e.entity_type == entity_type && e.entity_id == entity_id))
    }

    /// Returns true if entry `id` is still queued at `revision`.
    async fn is_unchanged(&self, id: QueueEntryId, revision: u32) -> EngineResult<bool> {
        Ok(self
            .pending()
            .await?
            .iter()
            .any(|e| e.id == id && e.revision == revision))
    }

    /// Applies a local mutation to the entity copy and queues it for sync.
    async fn record_change(&self, change: &SyncChange) -> EngineResult<QueueEntryId> {
        match change.operation {
            Operation::Delete => {
                self.delete_entity(change.entity_type, &change.entity_id)
                    .await?
            }
            Operation::Create | Operation::Update => {
                self.update_entity(change.entity_type, &change.entity_id, &change.data)
                    .await?
            }
        }
        self.enqueue(change).await
    }
}

/// Queue and entity state shared by the in-memory and file-backed stores.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StoreState {
    next_id: QueueEntryId,
    queue: Vec<SyncQueueEntry>,
    entities: BTreeMap<EntityType, BTreeMap<String, StoredEntity>>,
}

impl StoreState {
    pub(crate) fn enqueue(&mut self, change: &SyncChange) -> EngineResult<QueueEntryId> {
        let serialized_data = change.data.to_json()?;

        if let Some(existing) = self.queue.iter_mut().find(|e| e.matches_key(change)) {
            existing.serialized_data = serialized_data;
            existing.timestamp = change.timestamp;
            existing.caregiver_id = change.caregiver_id.clone();
            existing.retry_count = 0;
            existing.last_error = None;
            existing.revision = existing.revision.wrapping_add(1);
            return Ok(existing.id);
        }

        self.next_id += 1;
        let id = self.next_id;
        self.queue.push(SyncQueueEntry {
            id,
            entity_type: change.entity_type,
            entity_id: change.entity_id.clone(),
            operation: change.operation,
            serialized_data,
            timestamp: change.timestamp,
            caregiver_id: change.caregiver_id.clone(),
            retry_count: 0,
            last_error: None,
            revision: 0,
        });
        Ok(id)
    }

    pub(crate) fn pending(&self) -> Vec<SyncQueueEntry> {
        self.queue.clone()
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn remove(&mut self, id: QueueEntryId) {
        self.queue.retain(|e| e.id != id);
    }

    pub(crate) fn remove_if_unchanged(&mut self, id: QueueEntryId, revision: u32) -> bool {
        let before = self.queue.len();
        self.queue.retain(|e| !(e.id == id && e.revision == revision));
        self.queue.len() != before
    }

    pub(crate) fn mark_synced(
        &mut self,
        entity_type: EntityType,
        entity_id: &str,
        synced_at: Timestamp,
    ) {
        if let Some(entity) = self
            .entities
            .get_mut(&entity_type)
            .and_then(|m| m.get_mut(entity_id))
        {
            entity.synced_at = Some(synced_at);
        }
    }

    pub(crate) fn update_with_error(
        &mut self,
        id: QueueEntryId,
        retry_count: u32,
        last_error: &str,
    ) -> EngineResult<()> {
        let entry = self
            .queue
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| SyncError::Store(format!("queue entry {id} not found")))?;
        entry.retry_count = retry_count;
        entry.last_error = Some(last_error.to_string());
        Ok(())
    }

    pub(crate) fn update_with_error_if_unchanged(
        &mut self,
        id: QueueEntryId,
        revision: u32,
        retry_count: u32,
        last_error: &str,
    ) -> bool {
        match self
            .queue
            .iter_mut()
            .find(|e| e.id == id && e.revision == revision)
        {
            Some(entry) => {
                entry.retry_count = retry_count;
                entry.last_error = Some(last_error.to_string());
                true
            }
            None => false,
        }
    }

    pub(crate) fn update_entity(
        &mut self,
        entity_type: EntityType,
        entity_id: &str,
        data: &EntityData,
    ) {
        self.entities.entry(entity_type).or_default().insert(
            entity_id.to_string(),
            StoredEntity {
                data: data.clone(),
                synced_at: None,
            },
        );
    }

    pub(crate) fn delete_entity(&mut self, entity_type: EntityType, entity_id: &str) {
        if let Some(entities) = self.entities.get_mut(&entity_type) {
            entities.remove(entity_id);
        }
    }

    pub(crate) fn entity(&self, entity_type: EntityType, entity_id: &str) -> Option<StoredEntity> {
        self.entities
            .get(&entity_type)
            .and_then(|m| m.get(entity_id))
            .cloned()
    }
}

/// An in-memory mutation store.
#[derive(Debug, Default)]
pub struct MemoryMutationStore {
    state: RwLock<StoreState>,
}

impl MemoryMutationStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the local copy of an entity.
    pub fn entity(&self, entity_type: EntityType, entity_id: &str) -> Option<StoredEntity> {
        self.state.read().entity(entity_type, entity_id)
    }
}

#[async_trait]
impl MutationStore for MemoryMutationStore {
    async fn enqueue(&self, change: &SyncChange) -> EngineResult<QueueEntryId> {
        self.state.write().enqueue(change)
    }

    async fn pending(&self) -> EngineResult<Vec<SyncQueueEntry>> {
        Ok(self.state.read().pending())
    }

    async fn pending_count(&self) -> EngineResult<usize> {
        Ok(self.state.read().pending_count())
    }

    async fn remove(&self, id: QueueEntryId) -> EngineResult<()> {
        self.state.write().remove(id);
        Ok(())
    }

    async fn remove_if_unchanged(&self, id: QueueEntryId, revision: u32) -> EngineResult<bool> {
        Ok(self.state.write().remove_if_unchanged(id, revision))
    }

    async fn mark_synced(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        synced_at: Timestamp,
    ) -> EngineResult<()> {
        self.state
            .write()
            .mark_synced(entity_type, entity_id, synced_at);
        Ok(())
    }

    async fn update_with_error(
        &self,
        id: QueueEntryId,
        retry_count: u32,
        last_error: &str,
    ) -> EngineResult<()> {
        self.state
            .write()
            .update_with_error(id, retry_count, last_error)
    }

    async fn update_with_error_if_unchanged(
        &self,
        id: QueueEntryId,
        revision: u32,
        retry_count: u32,
        last_error: &str,
    ) -> EngineResult<bool> {
        Ok(self
            .state
            .write()
            .update_with_error_if_unchanged(id, revision, retry_count, last_error))
    }

    async fn update_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        data: &EntityData,
    ) -> EngineResult<()> {
        self.state.write().update_entity(entity_type, entity_id, data);
        Ok(())
    }

    async fn delete_entity(&self, entity_type: EntityType, entity_id: &str) -> EngineResult<()> {
        self.state.write().delete_entity(entity_type, entity_id);
        Ok(())
    }
}
