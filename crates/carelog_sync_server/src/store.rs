//! Server-side entity state and change log.

use carelog_sync_protocol::{EntityType, Operation, SyncChange, SyncConflict, Timestamp};
use chrono::{Duration, SubsecRound, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;

/// The server's latest version of an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityVersion {
    /// Entity body as last written.
    pub data: Value,
    /// Operation that produced this version.
    pub operation: Operation,
    /// Device that wrote this version.
    pub device_id: String,
    /// When the server received it.
    pub received_at: Timestamp,
}

#[derive(Debug, Clone)]
struct LoggedChange {
    change: SyncChange,
    received_at: Timestamp,
}

#[derive(Debug, Default)]
struct Inner {
    entities: HashMap<(EntityType, String), EntityVersion>,
    log: Vec<LoggedChange>,
}

impl Inner {
    fn last_received(&self) -> Option<Timestamp> {
        self.log.last().map(|logged| logged.received_at)
    }
}

/// Changes returned by a pull, with the cursor for the next one.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeBatch {
    /// Changes received after the requested cursor, in receive order.
    pub changes: Vec<SyncChange>,
    /// Receive time of the newest change the server holds. Pulling from it
    /// returns exactly the changes accepted afterwards.
    pub cursor: Option<Timestamp>,
}

/// Server entity store.
///
/// The store maintains:
/// - The latest version of each entity, with the device that wrote it
/// - All accepted changes in receive order, for pull
#[derive(Debug, Default)]
pub struct EntityStore {
    inner: RwLock<Inner>,
}

impl EntityStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies pushed changes, returning the ones that conflict.
    ///
    /// `last_sync_time` is the pull cursor the device last received, so it
    /// is on the server clock. A change conflicts when the server's version
    /// of the entity was written by another device after that cursor, or at
    /// any time if the device has never pulled. Conflicting changes are not
    /// applied.
    ///
    /// Every push is stamped strictly later than the one before it, so a
    /// cursor never straddles two pushes. Stamps are kept to the
    /// millisecond, the precision of `since` on the wire.
    pub fn apply_push(
        &self,
        device_id: &str,
        last_sync_time: Option<Timestamp>,
        changes: &[SyncChange],
    ) -> Vec<SyncConflict> {
        let mut inner = self.inner.write();
        let now = Utc::now().trunc_subsecs(3);
        let received_at = match inner.last_received() {
            Some(last) if last >= now => last + Duration::milliseconds(1),
            _ => now,
        };
        Self::apply(&mut inner, device_id, last_sync_time, changes, received_at)
    }

    #[cfg(test)]
    pub(crate) fn apply_push_at(
        &self,
        device_id: &str,
        last_sync_time: Option<Timestamp>,
        changes: &[SyncChange],
        received_at: Timestamp,
    ) -> Vec<SyncConflict> {
        let mut inner = self.inner.write();
        Self::apply(&mut inner, device_id, last_sync_time, changes, received_at)
    }

    fn apply(
        inner: &mut Inner,
        device_id: &str,
        last_sync_time: Option<Timestamp>,
        changes: &[SyncChange],
        received_at: Timestamp,
    ) -> Vec<SyncConflict> {
        let mut conflicts = Vec::new();

        for change in changes {
            let key = (change.entity_type, change.entity_id.clone());
            if let Some(current) = inner.entities.get(&key) {
                let foreign = current.device_id != device_id;
                let unseen = last_sync_time.map_or(true, |since| current.received_at > since);
                if foreign && unseen {
                    conflicts.push(SyncConflict::new(
                        change.entity_type,
                        change.entity_id.clone(),
                        current.data.clone(),
                    ));
                    continue;
                }
            }

            inner.entities.insert(
                key,
                EntityVersion {
                    data: Value::Object(change.data.as_map().clone()),
                    operation: change.operation,
                    device_id: device_id.to_string(),
                    received_at,
                },
            );
            inner.log.push(LoggedChange {
                change: change.clone(),
                received_at,
            });
        }

        conflicts
    }

    /// Returns changes received strictly after `since`, in receive order.
    pub fn changes_since(&self, since: Option<Timestamp>) -> Vec<SyncChange> {
        self.pull(since).changes
    }

    /// Returns changes received strictly after `since` and the cursor to
    /// pull from next. The cursor stays at `since` while nothing is new.
    pub fn pull(&self, since: Option<Timestamp>) -> ChangeBatch {
        let inner = self.inner.read();
        let changes = inner
            .log
            .iter()
            .filter(|logged| since.map_or(true, |since| logged.received_at > since))
            .map(|logged| logged.change.clone())
            .collect();
        ChangeBatch {
            changes,
            cursor: inner.last_received().max(since),
        }
    }

    /// Returns the server's version of an entity.
    pub fn entity(&self, entity_type: EntityType, entity_id: &str) -> Option<EntityVersion> {
        self.inner
            .read()
            .entities
            .get(&(entity_type, entity_id.to_string()))
            .cloned()
    }

    /// Number of entities known to the server.
    pub fn entity_count(&self) -> usize {
        self.inner.read().entities.len()
    }

    /// Number of accepted changes.
    pub fn change_count(&self) -> usize {
        self.inner.read().log.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carelog_sync_protocol::EntityData;

    fn at(s: &str) -> Timestamp {
        s.parse().unwrap()
    }

    fn diaper(id: &str, kind: &str) -> SyncChange {
        SyncChange::new(
            EntityType::Diaper,
            id,
            Operation::Update,
            EntityData::new().with("kind", kind),
            at("2024-01-01T00:00:00Z"),
        )
    }

    #[test]
    fn accepts_new_entities() {
        let store = EntityStore::new();
        let conflicts = store.apply_push("a", None, &[diaper("d-1", "wet"), diaper("d-2", "dry")]);

        assert!(conflicts.is_empty());
        assert_eq!(store.entity_count(), 2);
        assert_eq!(store.change_count(), 2);
        assert_eq!(store.entity(EntityType::Diaper, "d-1").unwrap().device_id, "a");
    }

    #[test]
    fn same_device_overwrites_without_conflict() {
        let store = EntityStore::new();
        store.apply_push("a", None, &[diaper("d-1", "wet")]);
        let conflicts = store.apply_push("a", None, &[diaper("d-1", "dry")]);

        assert!(conflicts.is_empty());
        let version = store.entity(EntityType::Diaper, "d-1").unwrap();
        assert_eq!(version.data["kind"], "dry");
    }

    #[test]
    fn foreign_write_after_last_sync_conflicts() {
        let store = EntityStore::new();
        let t0 = at("2024-01-01T10:00:00Z");
        store.apply_push_at("a", None, &[diaper("d-1", "wet")], t0);

        // Never synced: conflicts.
        let conflicts = store.apply_push_at("b", None, &[diaper("d-1", "dry")], t0);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].server_data["kind"], "wet");

        // Synced before the foreign write: conflicts.
        let before = t0 - Duration::minutes(1);
        let conflicts = store.apply_push_at("b", Some(before), &[diaper("d-1", "dry")], t0);
        assert_eq!(conflicts.len(), 1);

        // Synced after the foreign write: accepted.
        let after = t0 + Duration::minutes(1);
        let conflicts = store.apply_push_at("b", Some(after), &[diaper("d-1", "dry")], after);
        assert!(conflicts.is_empty());
        assert_eq!(store.entity(EntityType::Diaper, "d-1").unwrap().device_id, "b");
        assert_eq!(store.change_count(), 2);
    }

    #[test]
    fn changes_since_is_strict() {
        let store = EntityStore::new();
        let t0 = at("2024-01-01T10:00:00Z");
        let t1 = at("2024-01-01T11:00:00Z");
        store.apply_push_at("a", None, &[diaper("d-1", "wet")], t0);
        store.apply_push_at("a", None, &[diaper("d-2", "wet")], t1);

        assert_eq!(store.changes_since(None).len(), 2);
        let since_t0 = store.changes_since(Some(t0));
        assert_eq!(since_t0.len(), 1);
        assert_eq!(since_t0[0].entity_id, "d-2");
        assert!(store.changes_since(Some(t1)).is_empty());
    }

    #[test]
    fn pull_cursor_tracks_newest_change() {
        let store = EntityStore::new();
        let empty = store.pull(None);
        assert!(empty.changes.is_empty());
        assert_eq!(empty.cursor, None);

        store.apply_push("a", None, &[diaper("d-1", "wet")]);
        let first = store.pull(None);
        assert_eq!(first.changes.len(), 1);
        assert!(first.cursor.is_some());

        // Nothing new: same cursor back.
        assert_eq!(store.pull(first.cursor), ChangeBatch { changes: vec![], cursor: first.cursor });

        store.apply_push("b", first.cursor, &[diaper("d-2", "dry")]);
        let second = store.pull(first.cursor);
        assert_eq!(second.changes.len(), 1);
        assert_eq!(second.changes[0].entity_id, "d-2");
        assert!(second.cursor > first.cursor);
    }

    #[test]
    fn pushes_are_stamped_in_increasing_order() {
        let store = EntityStore::new();
        for i in 0..20 {
            store.apply_push("a", None, &[diaper(&format!("d-{i}"), "wet")]);
        }
        let stamps: Vec<_> = store.inner.read().log.iter().map(|l| l.received_at).collect();
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));
        assert!(stamps.iter().all(|t| t.timestamp_subsec_nanos() % 1_000_000 == 0));
    }
}
