//! Protocol messages for sync.
//!
//! `POST /sync/push` carries a [`SyncPayload`] and answers with a
//! [`SyncResult`]; `GET /sync/pull?since=<ISO8601>` answers with a
//! [`SyncPayload`] of server-side changes.

use crate::error::ProtocolResult;
use crate::operation::{EntityType, SyncChange};
use crate::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The unit exchanged with the server on push and returned on pull.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPayload {
    /// Per-installation device identifier.
    pub device_id: String,
    /// Completion time of the sender's last successful cycle.
    #[serde(default)]
    pub last_sync_time: Option<Timestamp>,
    /// Changes carried by this payload.
    #[serde(default)]
    pub changes: Vec<SyncChange>,
}

impl SyncPayload {
    /// Creates a new payload.
    pub fn new(
        device_id: impl Into<String>,
        last_sync_time: Option<Timestamp>,
        changes: Vec<SyncChange>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            last_sync_time,
            changes,
        }
    }

    /// Encodes to JSON bytes.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes from JSON bytes.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// The server's version of an entity that diverged from a pushed change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConflict {
    /// Entity type.
    pub entity_type: EntityType,
    /// Entity identifier.
    pub entity_id: String,
    /// Server's copy of the entity, as sent on the wire.
    ///
    /// Left untyped here; it is validated when the conflict is resolved.
    pub server_data: Value,
}

impl SyncConflict {
    /// Creates a new conflict record.
    pub fn new(entity_type: EntityType, entity_id: impl Into<String>, server_data: Value) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.into(),
            server_data,
        }
    }
}

/// Outcome of one push attempt.
///
/// Conflicts are decoded one at a time: a conflict the client cannot read
/// (an unknown entity type, say) is dropped and counted in
/// `ignored_conflicts` instead of failing the whole response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawSyncResult")]
pub struct SyncResult {
    /// Whether the server processed the push.
    pub success: bool,
    /// Entities whose server version diverged from the pushed change.
    pub conflicts: Vec<SyncConflict>,
    /// Conflicts in the response that could not be decoded.
    #[serde(skip)]
    pub ignored_conflicts: usize,
}

#[derive(Deserialize)]
struct RawSyncResult {
    success: bool,
    #[serde(default)]
    conflicts: Vec<Value>,
}

impl From<RawSyncResult> for SyncResult {
    fn from(raw: RawSyncResult) -> Self {
        let total = raw.conflicts.len();
        let conflicts: Vec<SyncConflict> = raw
            .conflicts
            .into_iter()
            .filter_map(|value| serde_json::from_value(value).ok())
            .collect();
        Self {
            success: raw.success,
            ignored_conflicts: total - conflicts.len(),
            conflicts,
        }
    }
}

impl SyncResult {
    /// Creates a successful result without conflicts.
    pub fn success() -> Self {
        Self::with_conflicts(Vec::new())
    }

    /// Creates a processed result carrying conflicts.
    pub fn with_conflicts(conflicts: Vec<SyncConflict>) -> Self {
        Self {
            success: true,
            conflicts,
            ignored_conflicts: 0,
        }
    }

    /// Creates a rejected result.
    pub fn rejected() -> Self {
        Self {
            success: false,
            conflicts: Vec::new(),
            ignored_conflicts: 0,
        }
    }

    /// Finds the conflict reported for an entity, if any.
    pub fn conflict_for(&self, entity_type: EntityType, entity_id: &str) -> Option<&SyncConflict> {
        self.conflicts
            .iter()
            .find(|c| c.entity_type == entity_type && c.entity_id == entity_id)
    }

    /// Encodes to JSON bytes.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes from JSON bytes.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{EntityData, Operation};
    use serde_json::json;

    #[test]
    fn payload_wire_shape() {
        let change = SyncChange::new(
            EntityType::Diaper,
            "d-1",
            Operation::Update,
            EntityData::new().with("kind", "wet"),
            "2024-03-01T10:00:00Z".parse().unwrap(),
        );
        let payload = SyncPayload::new("device-1", None, vec![change]);

        let value: Value = serde_json::from_slice(&payload.encode().unwrap()).unwrap();
        assert_eq!(value["deviceId"], "device-1");
        assert!(value["lastSyncTime"].is_null());
        assert_eq!(value["changes"][0]["entityType"], "diaper");

        let decoded = SyncPayload::decode(&payload.encode().unwrap()).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn payload_decodes_without_optional_fields() {
        let decoded = SyncPayload::decode(br#"{"deviceId":"server"}"#).unwrap();
        assert_eq!(decoded.device_id, "server");
        assert!(decoded.last_sync_time.is_none());
        assert!(decoded.changes.is_empty());
    }

    #[test]
    fn result_decodes_server_response() {
        let body = json!({
            "success": true,
            "conflicts": [{
                "entityType": "sleep",
                "entityId": "s-9",
                "serverData": {"updatedAt": "2024-01-01T00:00:00Z"}
            }]
        });
        let result = SyncResult::decode(body.to_string().as_bytes()).unwrap();
        assert!(result.success);
        assert!(result.conflict_for(EntityType::Sleep, "s-9").is_some());
        assert!(result.conflict_for(EntityType::Sleep, "s-1").is_none());
        assert!(result.conflict_for(EntityType::Feeding, "s-9").is_none());
    }

    #[test]
    fn result_skips_unreadable_conflicts() {
        let body = json!({
            "success": true,
            "conflicts": [
                {"entityType": "bottle", "entityId": "x", "serverData": {}},
                {"entityType": "sleep", "entityId": "s-1", "serverData": {"kind": "nap"}},
                {"entityId": 7}
            ]
        });
        let result = SyncResult::decode(body.to_string().as_bytes()).unwrap();
        assert!(result.success);
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.ignored_conflicts, 2);
        assert!(result.conflict_for(EntityType::Sleep, "s-1").is_some());

        let encoded: Value = serde_json::from_slice(&result.encode().unwrap()).unwrap();
        assert!(encoded.get("ignoredConflicts").is_none());
        assert!(encoded.get("ignored_conflicts").is_none());
    }

    #[test]
    fn result_without_success_is_error() {
        assert!(SyncResult::decode(br#"{"conflicts":[]}"#).is_err());
    }

    #[test]
    fn result_constructors() {
        assert!(SyncResult::success().success);
        assert!(SyncResult::success().conflicts.is_empty());
        assert!(!SyncResult::rejected().success);
        let with = SyncResult::with_conflicts(vec![SyncConflict::new(
            EntityType::Note,
            "n-1",
            Value::Null,
        )]);
        assert!(with.success);
        assert_eq!(with.conflicts.len(), 1);
    }
}
