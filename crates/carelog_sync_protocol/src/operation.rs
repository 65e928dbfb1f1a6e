//! Sync changes and the entity types they carry.

use crate::error::{ProtocolError, ProtocolResult};
use crate::Timestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Kind of mutation recorded for an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Entity was created locally.
    Create,
    /// Entity was modified locally.
    Update,
    /// Entity was deleted locally.
    Delete,
}

impl Operation {
    /// Returns the wire name of the operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Operation::Create),
            "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            other => Err(ProtocolError::UnknownOperation(other.to_string())),
        }
    }
}

/// A trackable caregiving entity type.
///
/// Every entity table that participates in sync has exactly one variant here.
/// Queue entries naming anything else are rejected when they are dequeued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    /// Child profile.
    Child,
    /// Breast, bottle or solid feeding.
    Feeding,
    /// Sleep session.
    Sleep,
    /// Diaper change.
    Diaper,
    /// Weight / height / head circumference measurement.
    Growth,
    /// Medication dose.
    Medication,
    /// Temperature reading.
    Temperature,
    /// Developmental milestone.
    Milestone,
    /// Free-form caregiver note.
    Note,
}

impl EntityType {
    /// All trackable entity types.
    pub const ALL: [EntityType; 9] = [
        EntityType::Child,
        EntityType::Feeding,
        EntityType::Sleep,
        EntityType::Diaper,
        EntityType::Growth,
        EntityType::Medication,
        EntityType::Temperature,
        EntityType::Milestone,
        EntityType::Note,
    ];

    /// Returns the wire name of the entity type.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Child => "child",
            EntityType::Feeding => "feeding",
            EntityType::Sleep => "sleep",
            EntityType::Diaper => "diaper",
            EntityType::Growth => "growth",
            EntityType::Medication => "medication",
            EntityType::Temperature => "temperature",
            EntityType::Milestone => "milestone",
            EntityType::Note => "note",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownEntityType(s.to_string()))
    }
}

/// Field names consulted, in order, when extracting a version timestamp.
const TIMESTAMP_FIELDS: [&str; 3] = ["updatedAt", "timestamp", "createdAt"];

/// Field name carrying the authoring caregiver.
const CAREGIVER_FIELD: &str = "caregiverId";

/// The JSON object body of an entity.
///
/// Entity schemas are owned by the local store; the sync layer only needs to
/// read version metadata out of them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityData(Map<String, Value>);

impl EntityData {
    /// Creates an empty entity body.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Interprets a JSON value as an entity body.
    pub fn from_value(value: Value) -> ProtocolResult<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(ProtocolError::InvalidPayload(format!(
                "expected JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Parses a serialized JSON entity body.
    pub fn from_json(json: &str) -> ProtocolResult<Self> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Serializes the body to a JSON string.
    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(&self.0)?)
    }

    /// Sets a field, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    /// Builder-style field setter.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Returns a field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns the underlying JSON object.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Extracts the version timestamp of this entity.
    ///
    /// Looks at `updatedAt`, then `timestamp`, then `createdAt`, taking the
    /// first one that parses (RFC 3339 string or epoch milliseconds). Falls
    /// back to the Unix epoch, so malformed data only ever loses conflicts.
    pub fn timestamp(&self) -> Timestamp {
        self.recorded_timestamp().unwrap_or_default()
    }

    /// Like [`EntityData::timestamp`], but `None` when no field parses.
    pub fn recorded_timestamp(&self) -> Option<Timestamp> {
        TIMESTAMP_FIELDS
            .iter()
            .filter_map(|field| self.0.get(*field))
            .find_map(parse_timestamp)
    }

    /// Returns the caregiver recorded as the author of this version.
    pub fn caregiver_id(&self) -> Option<String> {
        match self.0.get(CAREGIVER_FIELD)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

impl From<Map<String, Value>> for EntityData {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn parse_timestamp(value: &Value) -> Option<Timestamp> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One mutation destined for the server.
///
/// Produced from a queue entry on dequeue and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncChange {
    /// Entity type.
    pub entity_type: EntityType,
    /// Entity identifier.
    pub entity_id: String,
    /// Kind of mutation.
    pub operation: Operation,
    /// Entity body at the time of the mutation.
    pub data: EntityData,
    /// When the mutation was recorded locally.
    pub timestamp: Timestamp,
    /// Caregiver who made the mutation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caregiver_id: Option<String>,
}

impl SyncChange {
    /// Creates a new change.
    pub fn new(
        entity_type: EntityType,
        entity_id: impl Into<String>,
        operation: Operation,
        data: EntityData,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.into(),
            operation,
            data,
            timestamp,
            caregiver_id: None,
        }
    }

    /// Sets the authoring caregiver.
    pub fn with_caregiver(mut self, caregiver_id: impl Into<String>) -> Self {
        self.caregiver_id = Some(caregiver_id.into());
        self
    }

    /// Returns true if this change targets the given entity.
    pub fn targets(&self, entity_type: EntityType, entity_id: &str) -> bool {
        self.entity_type == entity_type && self.entity_id == entity_id
    }
}
