//! Status command implementation.

use super::{CommandResult, DataDir, Format};
use carelog_sync_engine::{MutationStore, SyncQueueEntry};
use serde::Serialize;

/// Queue inspection result.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    /// Device ID.
    pub device_id: String,
    /// Store file path.
    pub store_path: String,
    /// Number of pending entries.
    pub pending: usize,
    /// Entries that have failed at least once.
    pub failing: usize,
    /// Pending entries, in queue order.
    pub entries: Vec<SyncQueueEntry>,
}

/// Prints the pending queue.
pub async fn run(data_dir: &DataDir, format: Format) -> CommandResult {
    let device_id = data_dir.device_id()?;
    let store = data_dir.open_store().await?;
    let entries = store.pending().await?;

    let report = StatusReport {
        device_id: device_id.to_string(),
        store_path: store.path().display().to_string(),
        pending: entries.len(),
        failing: entries.iter().filter(|e| e.retry_count > 0).count(),
        entries,
    };

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        Format::Text => print_text(&report),
    }
    Ok(())
}

fn print_text(report: &StatusReport) {
    println!("Device:  {}", report.device_id);
    println!("Store:   {}", report.store_path);
    println!("Pending: {} ({} failing)", report.pending, report.failing);

    if report.entries.is_empty() {
        return;
    }
    println!();
    println!(
        "{:>6}  {:<12} {:<38} {:<8} {:>7}  LAST ERROR",
        "ID", "TYPE", "ENTITY", "OP", "RETRIES"
    );
    for entry in &report.entries {
        println!(
            "{:>6}  {:<12} {:<38} {:<8} {:>7}  {}",
            entry.id,
            entry.entity_type.as_str(),
            entry.entity_id,
            entry.operation.as_str(),
            entry.retry_count,
            entry.last_error.as_deref().unwrap_or("-")
        );
    }
}
