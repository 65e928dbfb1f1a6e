//! Sync and pull command implementations.

use super::{CommandResult, DataDir};
use carelog_sync_engine::{
    Connectivity, CycleOutcome, FileMutationStore, HttpTransport, ReqwestClient, RetryConfig,
    StaticToken, SyncConfig, SyncEngine, SyncEvent,
};
use std::sync::Arc;
use std::time::Duration;

/// Connection options shared by sync and pull.
#[derive(Debug, Clone)]
pub struct RemoteArgs {
    /// Sync server base URL.
    pub server: String,
    /// Bearer token.
    pub token: Option<String>,
    /// Request timeout.
    pub timeout: Duration,
    /// Changes per push.
    pub batch_size: usize,
    /// Push attempts per batch.
    pub max_attempts: u32,
}

async fn engine(
    data_dir: &DataDir,
    remote: &RemoteArgs,
) -> Result<SyncEngine<FileMutationStore>, Box<dyn std::error::Error>> {
    let device_id = data_dir.device_id()?;
    let store = Arc::new(data_dir.open_store().await?);
    let config = SyncConfig::new(device_id, remote.server.clone())
        .with_batch_size(remote.batch_size)
        .with_timeout(remote.timeout)
        .with_retry(RetryConfig::new(remote.max_attempts));

    let client = ReqwestClient::new(config.timeout)?;
    let mut transport = HttpTransport::new(remote.server.clone(), device_id, client);
    if let Some(token) = &remote.token {
        transport = transport.with_token_provider(Arc::new(StaticToken(token.clone())));
    }

    // The CLI only runs when asked to, so it treats the network as up.
    let engine = SyncEngine::new(config, store, Connectivity::new(true));
    engine.set_transport(Arc::new(transport));
    engine.set_pull_cursor(data_dir.pull_cursor()?);
    Ok(engine)
}

/// Runs one sync cycle against the server.
pub async fn run_sync(data_dir: &DataDir, remote: RemoteArgs) -> CommandResult {
    let engine = engine(data_dir, &remote).await?;
    let mut events = engine.subscribe();

    let outcome = engine.process_queue().await;

    while let Ok(event) = events.try_recv() {
        match event {
            SyncEvent::EntryFailed {
                entity_type,
                entity_id,
                error,
            } => println!("failed    {entity_type}/{entity_id}: {error}"),
            SyncEvent::ConflictResolved(result) => println!(
                "conflict  {}/{}: {:?} version kept",
                result.entity_type, result.entity_id, result.resolution
            ),
            _ => {}
        }
    }

    match outcome {
        CycleOutcome::Completed(report) => {
            println!(
                "{}: {} synced, {} failed, {} conflicts",
                report.status, report.synced, report.failed, report.conflicts
            );
            Ok(())
        }
        CycleOutcome::Skipped(reason) => Err(format!("sync skipped: {reason:?}").into()),
        CycleOutcome::Failed(error) => Err(format!("sync failed: {error}").into()),
    }
}

/// Pulls server changes and applies them to the local store.
pub async fn run_pull(data_dir: &DataDir, remote: RemoteArgs) -> CommandResult {
    let engine = engine(data_dir, &remote).await?;
    let applied = engine.pull_remote().await?;
    if let Some(cursor) = engine.pull_cursor() {
        data_dir.save_pull_cursor(cursor)?;
    }
    println!("applied {applied} changes");
    Ok(())
}
