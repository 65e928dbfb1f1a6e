//! Enqueue command implementation.

use super::{CommandResult, DataDir};
use carelog_sync_engine::MutationStore;
use carelog_sync_protocol::{EntityData, EntityType, Operation, SyncChange, Timestamp};
use chrono::{SecondsFormat, Utc};

/// Arguments of the enqueue command.
#[derive(Debug)]
pub struct EnqueueArgs {
    /// Entity type name.
    pub entity_type: String,
    /// Entity identifier.
    pub entity_id: String,
    /// Operation name.
    pub operation: String,
    /// Entity body as a JSON object.
    pub data: String,
    /// Authoring caregiver.
    pub caregiver: Option<String>,
}

/// Builds the change described by `args`, stamped at `now`.
///
/// A body without `updatedAt` gets one, so conflict resolution sees the
/// time of the edit rather than the epoch.
pub fn build_change(args: &EnqueueArgs, now: Timestamp) -> Result<SyncChange, Box<dyn std::error::Error>> {
    let entity_type: EntityType = args.entity_type.parse()?;
    let operation: Operation = args.operation.parse()?;
    let mut data = EntityData::from_json(&args.data)?;
    if data.get("updatedAt").is_none() {
        data.insert(
            "updatedAt",
            now.to_rfc3339_opts(SecondsFormat::Millis, true).into(),
        );
    }
    if let Some(caregiver) = &args.caregiver {
        if data.get("caregiverId").is_none() {
            data.insert("caregiverId", caregiver.clone().into());
        }
    }

    let mut change = SyncChange::new(entity_type, args.entity_id.clone(), operation, data, now);
    change.caregiver_id = args.caregiver.clone();
    Ok(change)
}

/// Records a local mutation and queues it for sync.
pub async fn run(data_dir: &DataDir, args: EnqueueArgs) -> CommandResult {
    let change = build_change(&args, Utc::now())?;
    let store = data_dir.open_store().await?;
    let id = store.record_change(&change).await?;

    tracing::info!(
        id,
        entity_type = %change.entity_type,
        entity_id = %change.entity_id,
        operation = %change.operation,
        "change queued"
    );
    println!("queued entry {id}");
    Ok(())
}
