//! The sync engine.
//!
//! The engine drains the local mutation queue against the sync server in
//! sequential batches. Each cycle is driven by one of three triggers (the
//! periodic timer, a reconnect, or the user) and all of them go through
//! [`SyncEngine::process_queue`], which runs at most one cycle at a time.

use crate::config::SyncConfig;
use crate::connectivity::Connectivity;
use crate::error::EngineResult;
use crate::events::{EventBus, SyncEvent};
use crate::retry::RetryExecutor;
use crate::status::{StatusCell, SyncStatus};
use crate::store::{MutationStore, SyncQueueEntry};
use crate::transport::SyncTransport;
use carelog_sync_protocol::{
    resolve_conflict, ConflictResolutionResult, EntityData, Operation, Resolution, SyncChange,
    SyncConflict, SyncPayload, Timestamp, VersionInfo,
};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Error recorded on a queue entry whose conflict could not be resolved.
pub const CONFLICT_RESOLUTION_FAILED: &str = "Conflict resolution failed";

/// Error recorded on a queue entry the server declined without a conflict.
pub const PUSH_REJECTED: &str = "push rejected by server";

/// Cumulative sync statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Cycles that ran to completion.
    pub cycles_completed: u64,
    /// Cycles aborted by an unexpected error.
    pub cycles_failed: u64,
    /// Queue entries acknowledged or resolved.
    pub entries_synced: u64,
    /// Queue entry failures, counted once per cycle.
    pub entries_failed: u64,
    /// Conflicts resolved.
    pub conflicts_resolved: u64,
    /// Push or pull retries performed by the retry executor.
    pub retries: u64,
    /// Server changes applied locally by pulls.
    pub changes_pulled: u64,
    /// Message of the last cycle-level error.
    pub last_error: Option<String>,
}

/// Why a cycle did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another cycle is in flight.
    AlreadySyncing,
    /// The device is offline.
    Offline,
    /// No transport has been configured.
    NoTransport,
}

/// Counts of a completed cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    /// Entries acknowledged or resolved.
    pub synced: usize,
    /// Entries still queued.
    pub failed: usize,
    /// Conflicts resolved (included in `synced`).
    pub conflicts: usize,
    /// Status after the cycle.
    pub status: SyncStatus,
    /// Completion time.
    pub completed_at: Timestamp,
}

/// Result of a call to [`SyncEngine::process_queue`].
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// No cycle ran.
    Skipped(SkipReason),
    /// The cycle ran to completion.
    Completed(CycleReport),
    /// The cycle aborted on an unexpected error.
    Failed(String),
}

#[derive(Debug, Default)]
struct BatchReport {
    synced: usize,
    failed: usize,
    conflicts: usize,
}

/// Clears the in-flight flag when a cycle ends, including on cancellation.
struct CycleGuard<'a>(&'a AtomicBool);

impl<'a> CycleGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Offline-first sync engine.
///
/// Construct one per application with the device's mutation store and
/// connectivity monitor, hand it a transport once the session is known,
/// and call [`SyncEngine::initialize`] to start the background triggers.
pub struct SyncEngine<S: MutationStore> {
    config: SyncConfig,
    store: Arc<S>,
    connectivity: Connectivity,
    transport: RwLock<Option<Arc<dyn SyncTransport>>>,
    retry: RetryExecutor,
    status: StatusCell,
    events: EventBus,
    last_sync_time: RwLock<Option<Timestamp>>,
    pull_cursor: RwLock<Option<Timestamp>>,
    stats: RwLock<SyncStats>,
    syncing: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<S: MutationStore + 'static> SyncEngine<S> {
    /// Creates an engine. The status starts as `offline`.
    pub fn new(config: SyncConfig, store: Arc<S>, connectivity: Connectivity) -> Self {
        let retry = RetryExecutor::new(config.retry.clone(), connectivity.clone());
        Self {
            config,
            store,
            connectivity,
            transport: RwLock::new(None),
            retry,
            status: StatusCell::new(SyncStatus::Offline),
            events: EventBus::new(),
            last_sync_time: RwLock::new(None),
            pull_cursor: RwLock::new(None),
            stats: RwLock::new(SyncStats::default()),
            syncing: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Sets the transport used by subsequent cycles.
    pub fn set_transport(&self, transport: Arc<dyn SyncTransport>) {
        *self.transport.write() = Some(transport);
    }

    /// Starts the background triggers and runs one cycle if online.
    ///
    /// Subscribes to connectivity transitions and starts the periodic
    /// timer. Calling it again while running has no effect.
    pub async fn initialize(self: &Arc<Self>) {
        {
            let mut tasks = self.tasks.lock();
            if !tasks.is_empty() {
                return;
            }
            tasks.push(self.spawn_connectivity_listener());
            tasks.push(self.spawn_timer());
        }

        let online = self.is_online();
        self.set_status(if online {
            SyncStatus::Pending
        } else {
            SyncStatus::Offline
        });
        tracing::info!(
            device_id = %self.config.device_id,
            online,
            interval_secs = self.config.sync_interval.as_secs(),
            "sync engine initialized"
        );

        if online {
            self.process_queue().await;
        }
    }

    fn spawn_connectivity_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::downgrade(self);
        let mut rx = self.connectivity.subscribe();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let online = *rx.borrow_and_update();
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                engine.on_connectivity_changed(online).await;
            }
        })
    }

    fn spawn_timer(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::downgrade(self);
        let period = self.config.sync_interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                if engine.is_online() && !engine.is_syncing() {
                    engine.process_queue().await;
                }
            }
        })
    }

    async fn on_connectivity_changed(&self, online: bool) {
        tracing::info!(online, "connectivity changed");
        self.events.emit(SyncEvent::NetworkChanged { online });
        if online {
            self.set_status(SyncStatus::Pending);
            self.process_queue().await;
        } else {
            self.set_status(SyncStatus::Offline);
        }
    }

    /// Runs a user-initiated cycle. Does nothing while offline.
    pub async fn trigger_sync(&self) -> CycleOutcome {
        if !self.is_online() {
            tracing::debug!("manual sync ignored while offline");
            return CycleOutcome::Skipped(SkipReason::Offline);
        }
        self.process_queue().await
    }

    /// Runs one sync cycle.
    ///
    /// Returns immediately if a cycle is already running, the device is
    /// offline, or no transport is configured. Errors never escape: an
    /// unexpected failure sets the status to `error`, emits
    /// [`SyncEvent::SyncFailed`] and is reported as [`CycleOutcome::Failed`].
    pub async fn process_queue(&self) -> CycleOutcome {
        let Some(_guard) = CycleGuard::acquire(&self.syncing) else {
            tracing::debug!("sync cycle already running");
            return CycleOutcome::Skipped(SkipReason::AlreadySyncing);
        };
        if !self.is_online() {
            return CycleOutcome::Skipped(SkipReason::Offline);
        }
        let transport = self.transport.read().clone();
        let Some(transport) = transport else {
            tracing::debug!("no sync transport configured");
            return CycleOutcome::Skipped(SkipReason::NoTransport);
        };

        match self.run_cycle(transport.as_ref()).await {
            Ok(report) => {
                self.stats.write().cycles_completed += 1;
                CycleOutcome::Completed(report)
            }
            Err(e) => {
                tracing::error!(error = %e, "sync cycle failed");
                {
                    let mut stats = self.stats.write();
                    stats.cycles_failed += 1;
                    stats.last_error = Some(e.to_string());
                }
                self.set_status(self.unless_offline(SyncStatus::Error));
                self.events.emit(SyncEvent::SyncFailed {
                    error: e.to_string(),
                });
                CycleOutcome::Failed(e.to_string())
            }
        }
    }

    async fn run_cycle(&self, transport: &dyn SyncTransport) -> EngineResult<CycleReport> {
        self.set_status(SyncStatus::Syncing);
        let pending = self.store.pending().await?;
        tracing::debug!(pending = pending.len(), "sync cycle started");
        self.events.emit(SyncEvent::SyncStarted {
            pending: pending.len(),
        });

        let mut totals = BatchReport::default();
        for batch in pending.chunks(self.config.batch_size.max(1)) {
            let report = self.process_batch(transport, batch).await?;
            totals.synced += report.synced;
            totals.failed += report.failed;
            totals.conflicts += report.conflicts;
        }

        let status = self.unless_offline(SyncStatus::after_cycle(totals.synced, totals.failed));
        let completed_at = Utc::now();
        *self.last_sync_time.write() = Some(completed_at);
        {
            let mut stats = self.stats.write();
            stats.entries_synced += totals.synced as u64;
            stats.entries_failed += totals.failed as u64;
            stats.conflicts_resolved += totals.conflicts as u64;
        }
        self.set_status(status);
        self.events.emit(SyncEvent::SyncCompleted {
            synced: totals.synced,
            failed: totals.failed,
            completed_at,
        });
        tracing::info!(
            synced = totals.synced,
            failed = totals.failed,
            conflicts = totals.conflicts,
            %status,
            "sync cycle completed"
        );

        Ok(CycleReport {
            synced: totals.synced,
            failed: totals.failed,
            conflicts: totals.conflicts,
            status,
            completed_at,
        })
    }

    async fn process_batch(
        &self,
        transport: &dyn SyncTransport,
        entries: &[SyncQueueEntry],
    ) -> EngineResult<BatchReport> {
        let mut report = BatchReport::default();
        let mut sendable = Vec::with_capacity(entries.len());
        let mut changes = Vec::with_capacity(entries.len());

        for entry in entries {
            match entry.to_change() {
                Ok(change) => {
                    changes.push(change.clone());
                    sendable.push((entry, change));
                }
                Err(e) => {
                    self.fail_entry(entry, &format!("malformed queue entry: {e}"))
                        .await?;
                    report.failed += 1;
                }
            }
        }
        if changes.is_empty() {
            return Ok(report);
        }

        let cursor = *self.pull_cursor.read();
        let payload = SyncPayload::new(self.config.device_id.to_string(), cursor, changes);
        let result = self.retrying("push", || transport.push(&payload)).await;

        let result = match result {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(entries = sendable.len(), error = %e, "push failed");
                let message = e.to_string();
                for (entry, _) in &sendable {
                    self.fail_entry(entry, &message).await?;
                    report.failed += 1;
                }
                return Ok(report);
            }
        };

        if result.ignored_conflicts > 0 {
            tracing::warn!(
                ignored = result.ignored_conflicts,
                "push response carried unreadable conflicts"
            );
        }

        for (entry, change) in &sendable {
            if let Some(conflict) = result.conflict_for(entry.entity_type, &entry.entity_id) {
                match self.apply_conflict(entry, change, conflict).await {
                    Ok(resolution) => {
                        if let Some(resolution) = resolution {
                            self.events.emit(SyncEvent::ConflictResolved(resolution));
                            report.conflicts += 1;
                        }
                        report.synced += 1;
                    }
                    Err(e) => {
                        tracing::warn!(
                            entity_type = %entry.entity_type,
                            entity_id = %entry.entity_id,
                            error = %e,
                            "conflict resolution failed"
                        );
                        self.store
                            .update_with_error_if_unchanged(
                                entry.id,
                                entry.revision,
                                entry.retry_count,
                                CONFLICT_RESOLUTION_FAILED,
                            )
                            .await?;
                        report.failed += 1;
                    }
                }
            } else if result.success {
                self.acknowledge(entry).await?;
                report.synced += 1;
            } else {
                self.fail_entry(entry, PUSH_REJECTED).await?;
                report.failed += 1;
            }
        }

        Ok(report)
    }

    /// Drops an acknowledged entry. An entry that picked up a newer change
    /// while the push was in flight stays queued, and so does the entity's
    /// unsynced state.
    async fn acknowledge(&self, entry: &SyncQueueEntry) -> EngineResult<()> {
        if self.store.remove_if_unchanged(entry.id, entry.revision).await? {
            self.store
                .mark_synced(entry.entity_type, &entry.entity_id, Utc::now())
                .await?;
        } else {
            tracing::debug!(
                entity_type = %entry.entity_type,
                entity_id = %entry.entity_id,
                "entry changed during push, keeping newer change queued"
            );
        }
        self.events.emit(SyncEvent::EntrySynced {
            entity_type: entry.entity_type,
            entity_id: entry.entity_id.clone(),
        });
        Ok(())
    }

    /// Records a failed attempt, leaving entries at the retry limit parked.
    async fn fail_entry(&self, entry: &SyncQueueEntry, error: &str) -> EngineResult<()> {
        if entry.retry_count < self.config.max_entry_retries {
            self.store
                .update_with_error_if_unchanged(
                    entry.id,
                    entry.revision,
                    entry.retry_count + 1,
                    error,
                )
                .await?;
        } else {
            tracing::warn!(
                entity_type = %entry.entity_type,
                entity_id = %entry.entity_id,
                retry_count = entry.retry_count,
                "queue entry parked at retry limit"
            );
        }
        self.events.emit(SyncEvent::EntryFailed {
            entity_type: entry.entity_type,
            entity_id: entry.entity_id.clone(),
            error: error.to_string(),
        });
        Ok(())
    }

    /// Resolves a server-reported conflict and applies the winner locally.
    ///
    /// Returns `None` when a newer local change was queued for the entity
    /// while the push was in flight: that change meets the server version
    /// on the next push, so nothing is applied now.
    async fn apply_conflict(
        &self,
        entry: &SyncQueueEntry,
        change: &SyncChange,
        conflict: &SyncConflict,
    ) -> EngineResult<Option<ConflictResolutionResult>> {
        let server_data = EntityData::from_value(conflict.server_data.clone())?;
        let local = VersionInfo::from_change(change);
        let server = VersionInfo::from_data(&server_data, None);
        let resolution = resolve_conflict(entry.entity_type, &entry.entity_id, &local, &server);

        if !self.store.is_unchanged(entry.id, entry.revision).await? {
            tracing::debug!(
                entity_type = %entry.entity_type,
                entity_id = %entry.entity_id,
                "entry changed during push, conflict left for the next cycle"
            );
            return Ok(None);
        }

        if resolution.resolution == Resolution::Server {
            self.store
                .update_entity(entry.entity_type, &entry.entity_id, &server_data)
                .await?;
        }
        self.store
            .mark_synced(entry.entity_type, &entry.entity_id, Utc::now())
            .await?;
        self.store
            .remove_if_unchanged(entry.id, entry.revision)
            .await?;

        tracing::info!(
            entity_type = %entry.entity_type,
            entity_id = %entry.entity_id,
            resolution = ?resolution.resolution,
            "conflict resolved"
        );
        Ok(Some(resolution))
    }

    async fn retrying<T, F, Fut>(&self, label: &str, call: F) -> EngineResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = EngineResult<T>>,
    {
        let before = self.retry.total_retries();
        let result = self.retry.run(label, call).await;
        self.stats.write().retries += self.retry.total_retries() - before;
        result
    }

    /// Pulls server changes since the pull cursor and applies them locally.
    ///
    /// The cursor is the `lastSyncTime` of the previous pull response, so it
    /// is on the server clock and only moves when a pull succeeds. Entities
    /// with a pending queue entry are skipped; their local mutation meets
    /// the server version through the push conflict path. Returns the
    /// number of applied changes, or 0 when offline, without a transport, or
    /// while a cycle is running.
    pub async fn pull_remote(&self) -> EngineResult<usize> {
        let Some(_guard) = CycleGuard::acquire(&self.syncing) else {
            return Ok(0);
        };
        if !self.is_online() {
            return Ok(0);
        }
        let transport = self.transport.read().clone();
        let Some(transport) = transport else {
            return Ok(0);
        };

        let since = *self.pull_cursor.read();
        let payload = self.retrying("pull", || transport.pull(since)).await?;

        let mut applied = 0;
        for change in &payload.changes {
            if self
                .store
                .has_pending(change.entity_type, &change.entity_id)
                .await?
            {
                tracing::debug!(
                    entity_type = %change.entity_type,
                    entity_id = %change.entity_id,
                    "skipping pulled change for entity with pending mutation"
                );
                continue;
            }
            match change.operation {
                Operation::Delete => {
                    self.store
                        .delete_entity(change.entity_type, &change.entity_id)
                        .await?
                }
                Operation::Create | Operation::Update => {
                    self.store
                        .update_entity(change.entity_type, &change.entity_id, &change.data)
                        .await?;
                    self.store
                        .mark_synced(change.entity_type, &change.entity_id, Utc::now())
                        .await?;
                }
            }
            applied += 1;
        }

        if payload.last_sync_time > since {
            *self.pull_cursor.write() = payload.last_sync_time;
        }
        self.stats.write().changes_pulled += applied as u64;
        tracing::info!(received = payload.changes.len(), applied, "pull completed");
        Ok(applied)
    }

    /// Stops the background triggers. Safe to call more than once.
    pub fn stop(&self) {
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        if !tasks.is_empty() {
            tracing::info!("sync engine stopped");
        }
        for task in tasks {
            task.abort();
        }
    }

    /// The end-of-cycle status, unless connectivity dropped meanwhile.
    fn unless_offline(&self, status: SyncStatus) -> SyncStatus {
        if self.is_online() {
            status
        } else {
            SyncStatus::Offline
        }
    }

    fn set_status(&self, status: SyncStatus) {
        if let Some(previous) = self.status.set(status) {
            tracing::debug!(%previous, current = %status, "sync status changed");
            self.events.emit(SyncEvent::StatusChanged {
                previous,
                current: status,
            });
        }
    }
}

impl<S: MutationStore> SyncEngine<S> {
    /// Returns the current status.
    pub fn status(&self) -> SyncStatus {
        self.status.get()
    }

    /// Returns when the last cycle completed.
    pub fn last_sync_time(&self) -> Option<Timestamp> {
        *self.last_sync_time.read()
    }

    /// Returns the server-clock cursor the next pull starts from.
    pub fn pull_cursor(&self) -> Option<Timestamp> {
        *self.pull_cursor.read()
    }

    /// Restores a pull cursor saved from an earlier session.
    pub fn set_pull_cursor(&self, cursor: Option<Timestamp>) {
        *self.pull_cursor.write() = cursor;
    }

    /// Returns true if the device is online.
    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    /// Returns true while a cycle is running.
    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    /// Returns the number of pending queue entries.
    pub async fn pending_count(&self) -> EngineResult<usize> {
        self.store.pending_count().await
    }

    /// Returns a snapshot of the statistics.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Subscribes to engine events.
    pub fn subscribe(&self) -> UnboundedReceiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Returns the mutation store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }
}

impl<S: MutationStore> Drop for SyncEngine<S> {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}
