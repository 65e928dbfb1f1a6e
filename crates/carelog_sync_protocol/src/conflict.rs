//! Conflict resolution.
//!
//! Conflicts are resolved last-write-wins per entity. The local side wins
//! when its version timestamp is greater than **or equal to** the server's,
//! so exact ties are decided in favour of the side initiating the resolution.

use crate::operation::{EntityData, EntityType, SyncChange};
use crate::Timestamp;
use serde::{Deserialize, Serialize};

/// Which side of a conflict won.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// Keep the local version; nothing is written locally.
    Local,
    /// Accept the server version; it overwrites the local copy.
    Server,
}

impl Resolution {
    /// Decides between two version timestamps.
    pub fn decide(local: Timestamp, server: Timestamp) -> Self {
        if local >= server {
            Resolution::Local
        } else {
            Resolution::Server
        }
    }
}

/// Version metadata of one side of a conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    /// Version timestamp.
    pub timestamp: Timestamp,
    /// Caregiver who authored the version.
    pub caregiver_id: Option<String>,
}

impl VersionInfo {
    /// Creates version metadata.
    pub fn new(timestamp: Timestamp, caregiver_id: Option<String>) -> Self {
        Self {
            timestamp,
            caregiver_id,
        }
    }

    /// Reads version metadata out of an entity body.
    ///
    /// `fallback_caregiver` is used when the body does not name its author.
    pub fn from_data(data: &EntityData, fallback_caregiver: Option<&str>) -> Self {
        Self {
            timestamp: data.timestamp(),
            caregiver_id: data
                .caregiver_id()
                .or_else(|| fallback_caregiver.map(str::to_string)),
        }
    }

    /// Reads version metadata of a locally recorded change.
    ///
    /// The body is consulted first. A body without a usable timestamp (a
    /// delete usually carries `{}`) takes the time the change was recorded,
    /// and a body without an author takes the change's caregiver.
    pub fn from_change(change: &SyncChange) -> Self {
        Self {
            timestamp: change.data.recorded_timestamp().unwrap_or(change.timestamp),
            caregiver_id: change
                .data
                .caregiver_id()
                .or_else(|| change.caregiver_id.clone()),
        }
    }
}

/// Audit record of one resolved conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictResolutionResult {
    /// Entity type.
    pub entity_type: EntityType,
    /// Entity identifier.
    pub entity_id: String,
    /// Winning side.
    pub resolution: Resolution,
    /// Timestamp of the winning version.
    pub winning_timestamp: Timestamp,
    /// Author of the winning version.
    pub winning_caregiver_id: Option<String>,
    /// Timestamp of the discarded version.
    pub losing_timestamp: Timestamp,
    /// Author of the discarded version.
    pub losing_caregiver_id: Option<String>,
}

/// Resolves a conflict between a local and a server version of one entity.
pub fn resolve_conflict(
    entity_type: EntityType,
    entity_id: &str,
    local: &VersionInfo,
    server: &VersionInfo,
) -> ConflictResolutionResult {
    let resolution = Resolution::decide(local.timestamp, server.timestamp);
    let (winner, loser) = match resolution {
        Resolution::Local => (local, server),
        Resolution::Server => (server, local),
    };

    ConflictResolutionResult {
        entity_type,
        entity_id: entity_id.to_string(),
        resolution,
        winning_timestamp: winner.timestamp,
        winning_caregiver_id: winner.caregiver_id.clone(),
        losing_timestamp: loser.timestamp,
        losing_caregiver_id: loser.caregiver_id.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use proptest::prelude::*;

    fn ts(s: &str) -> Timestamp {
        s.parse().unwrap()
    }

    fn version(s: &str, caregiver: &str) -> VersionInfo {
        VersionInfo::new(ts(s), Some(caregiver.to_string()))
    }

    #[test]
    fn tie_favours_local() {
        let local = version("2024-01-01T00:00:00Z", "mom");
        let server = version("2024-01-01T00:00:00Z", "dad");

        let result = resolve_conflict(EntityType::Feeding, "f-1", &local, &server);
        assert_eq!(result.resolution, Resolution::Local);
        assert_eq!(result.winning_caregiver_id.as_deref(), Some("mom"));
        assert_eq!(result.losing_caregiver_id.as_deref(), Some("dad"));
    }

    #[test]
    fn strictly_later_wins() {
        let newer = version("2024-01-02T00:00:00Z", "mom");
        let older = version("2024-01-01T00:00:00Z", "dad");

        let result = resolve_conflict(EntityType::Sleep, "s-1", &newer, &older);
        assert_eq!(result.resolution, Resolution::Local);
        assert_eq!(result.winning_timestamp, ts("2024-01-02T00:00:00Z"));
        assert_eq!(result.losing_timestamp, ts("2024-01-01T00:00:00Z"));

        let result = resolve_conflict(EntityType::Sleep, "s-1", &older, &newer);
        assert_eq!(result.resolution, Resolution::Server);
        assert_eq!(result.winning_timestamp, ts("2024-01-02T00:00:00Z"));
        assert_eq!(result.winning_caregiver_id.as_deref(), Some("mom"));
        assert_eq!(result.losing_caregiver_id.as_deref(), Some("dad"));
    }

    #[test]
    fn version_from_data_uses_fallback_caregiver() {
        let data = EntityData::new().with("timestamp", "2024-05-05T12:00:00Z");
        let info = VersionInfo::from_data(&data, Some("queue-caregiver"));
        assert_eq!(info.timestamp, ts("2024-05-05T12:00:00Z"));
        assert_eq!(info.caregiver_id.as_deref(), Some("queue-caregiver"));

        let data = data.with("caregiverId", "payload-caregiver");
        let info = VersionInfo::from_data(&data, Some("queue-caregiver"));
        assert_eq!(info.caregiver_id.as_deref(), Some("payload-caregiver"));
    }

    #[test]
    fn local_change_without_body_timestamp_uses_record_time() {
        let delete = SyncChange::new(
            EntityType::Feeding,
            "f-1",
            crate::Operation::Delete,
            EntityData::new(),
            ts("2024-02-01T00:00:00Z"),
        )
        .with_caregiver("mom");
        let local = VersionInfo::from_change(&delete);
        assert_eq!(local.timestamp, ts("2024-02-01T00:00:00Z"));
        assert_eq!(local.caregiver_id.as_deref(), Some("mom"));

        let server = version("2024-01-15T00:00:00Z", "dad");
        let result = resolve_conflict(EntityType::Feeding, "f-1", &local, &server);
        assert_eq!(result.resolution, Resolution::Local);

        let edited = SyncChange::new(
            EntityType::Feeding,
            "f-1",
            crate::Operation::Update,
            EntityData::new().with("updatedAt", "2024-01-01T00:00:00Z"),
            ts("2024-02-01T00:00:00Z"),
        );
        assert_eq!(
            VersionInfo::from_change(&edited).timestamp,
            ts("2024-01-01T00:00:00Z")
        );
    }

    #[test]
    fn malformed_server_data_loses() {
        let server = VersionInfo::from_data(&EntityData::new().with("updatedAt", "??"), None);
        let local = version("1999-12-31T23:59:59Z", "mom");

        let result = resolve_conflict(EntityType::Note, "n-1", &local, &server);
        assert_eq!(result.resolution, Resolution::Local);
        assert_eq!(result.losing_timestamp, DateTime::<Utc>::default());
        assert_eq!(result.losing_caregiver_id, None);
    }

    #[test]
    fn audit_record_wire_shape() {
        let result = resolve_conflict(
            EntityType::Growth,
            "g-1",
            &version("2024-01-01T00:00:00Z", "mom"),
            &version("2024-02-01T00:00:00Z", "dad"),
        );
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["resolution"], "server");
        assert_eq!(value["entityType"], "growth");
        assert_eq!(value["winningCaregiverId"], "dad");
    }

    proptest! {
        #[test]
        fn exactly_one_winner(a in 0i64..4_000_000_000_000, b in 0i64..4_000_000_000_000) {
            let local = VersionInfo::new(DateTime::from_timestamp_millis(a).unwrap(), None);
            let server = VersionInfo::new(DateTime::from_timestamp_millis(b).unwrap(), None);
            let result = resolve_conflict(EntityType::Diaper, "d", &local, &server);

            prop_assert_eq!(result.resolution == Resolution::Local, a >= b);
            prop_assert!(result.winning_timestamp >= result.losing_timestamp);
        }
    }
}
