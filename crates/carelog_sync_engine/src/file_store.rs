//! Durable JSON-file mutation store.
//!
//! The whole queue and entity state is kept in memory and written out as a
//! JSON snapshot after every mutation. Snapshots are written to a sibling
//! temp file and renamed into place, so a crash leaves either the old or the
//! new snapshot on disk.

use crate::error::EngineResult;
use crate::store::{MutationStore, QueueEntryId, StoreState, StoredEntity, SyncQueueEntry};
use async_trait::async_trait;
use carelog_sync_protocol::{EntityData, EntityType, SyncChange, Timestamp};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// A mutation store persisted to a single JSON file.
#[derive(Debug)]
pub struct FileMutationStore {
    path: PathBuf,
    state: Mutex<StoreState>,
}

impl FileMutationStore {
    /// Opens the store at `path`, loading the existing snapshot if present.
    pub async fn open(path: impl Into<PathBuf>) -> EngineResult<Self> {
        let path = path.into();
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                crate::SyncError::Store(format!("corrupt store {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreState::default(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Returns the snapshot path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the local copy of an entity.
    pub async fn entity(&self, entity_type: EntityType, entity_id: &str) -> Option<StoredEntity> {
        self.state.lock().await.entity(entity_type, entity_id)
    }

    async fn persist(&self, state: &StoreState) -> EngineResult<()> {
        let bytes = serde_json::to_vec_pretty(state)
            .map_err(|e| crate::SyncError::Store(format!("failed to encode store: {e}")))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl MutationStore for FileMutationStore {
    async fn enqueue(&self, change: &SyncChange) -> EngineResult<QueueEntryId> {
        let mut state = self.state.lock().await;
        let id = state.enqueue(change)?;
        self.persist(&state).await?;
        Ok(id)
    }

    async fn pending(&self) -> EngineResult<Vec<SyncQueueEntry>> {
        Ok(self.state.lock().await.pending())
    }

    async fn pending_count(&self) -> EngineResult<usize> {
        Ok(self.state.lock().await.pending_count())
    }

    async fn remove(&self, id: QueueEntryId) -> EngineResult<()> {
        let mut state = self.state.lock().await;
        state.remove(id);
        self.persist(&state).await
    }

    async fn remove_if_unchanged(&self, id: QueueEntryId, revision: u32) -> EngineResult<bool> {
        let mut state = self.state.lock().await;
        let removed = state.remove_if_unchanged(id, revision);
        if removed {
            self.persist(&state).await?;
        }
        Ok(removed)
    }

    async fn mark_synced(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        synced_at: Timestamp,
    ) -> EngineResult<()> {
        let mut state = self.state.lock().await;
        state.mark_synced(entity_type, entity_id, synced_at);
        self.persist(&state).await
    }

    async fn update_with_error(
        &self,
        id: QueueEntryId,
        retry_count: u32,
        last_error: &str,
    ) -> EngineResult<()> {
        let mut state = self.state.lock().await;
        state.update_with_error(id, retry_count, last_error)?;
        self.persist(&state).await
    }

    async fn update_with_error_if_unchanged(
        &self,
        id: QueueEntryId,
        revision: u32,
        retry_count: u32,
        last_error: &str,
    ) -> EngineResult<bool> {
        let mut state = self.state.lock().await;
        let updated = state.update_with_error_if_unchanged(id, revision, retry_count, last_error);
        if updated {
            self.persist(&state).await?;
        }
        Ok(updated)
    }

    async fn update_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        data: &EntityData,
    ) -> EngineResult<()> {
        let mut state = self.state.lock().await;
        state.update_entity(entity_type, entity_id, data);
        self.persist(&state).await
    }

    async fn delete_entity(&self, entity_type: EntityType, entity_id: &str) -> EngineResult<()> {
        let mut state = self.state.lock().await;
        state.delete_entity(entity_type, entity_id);
        self.persist(&state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carelog_sync_protocol::Operation;

    fn change(entity_id: &str) -> SyncChange {
        SyncChange::new(
            EntityType::Sleep,
            entity_id,
            Operation::Create,
            EntityData::new().with("startedAt", "2024-01-01T20:00:00Z"),
            "2024-01-01T20:00:00Z".parse().unwrap(),
        )
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");

        {
            let store = FileMutationStore::open(&path).await.unwrap();
            store.record_change(&change("s-1")).await.unwrap();
            let id = store.record_change(&change("s-2")).await.unwrap();
            store.update_with_error(id, 1, "network error").await.unwrap();
        }

        let store = FileMutationStore::open(&path).await.unwrap();
        let pending = store.pending().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].entity_id, "s-1");
        assert_eq!(pending[1].retry_count, 1);
        assert_eq!(pending[1].last_error.as_deref(), Some("network error"));
        assert!(store.entity(EntityType::Sleep, "s-1").await.is_some());

        // Ids keep increasing across reopen.
        let next = store.enqueue(&change("s-3")).await.unwrap();
        assert!(next > pending[1].id);
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn revision_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");

        {
            let store = FileMutationStore::open(&path).await.unwrap();
            store.enqueue(&change("s-1")).await.unwrap();
            store.enqueue(&change("s-1")).await.unwrap();
        }

        let store = FileMutationStore::open(&path).await.unwrap();
        let entry = store.pending().await.unwrap().remove(0);
        assert_eq!(entry.revision, 1);
        assert!(!store.remove_if_unchanged(entry.id, 0).await.unwrap());
        assert!(store.remove_if_unchanged(entry.id, 1).await.unwrap());

        let reopened = FileMutationStore::open(&path).await.unwrap();
        assert_eq!(reopened.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileMutationStore::open(dir.path().join("nested").join("queue.json"))
            .await
            .unwrap();
        assert_eq!(store.pending_count().await.unwrap(), 0);

        store.enqueue(&change("s-1")).await.unwrap();
        assert!(store.path().exists());
    }

    #[tokio::test]
    async fn corrupt_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        std::fs::write(&path, b"{not json").unwrap();

        assert!(matches!(
            FileMutationStore::open(&path).await,
            Err(crate::SyncError::Store(_))
        ));
    }
}
