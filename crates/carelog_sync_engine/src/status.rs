//! Sync status state machine.
//!
//! ```text
//!            disconnected (from any state)
//!   * ─────────────────────────────────────▶ offline
//!   offline ── reconnected ──▶ pending ── cycle starts ──▶ syncing
//!   syncing ── zero failures ─────▶ synced
//!   syncing ── partial success ───▶ pending
//!   syncing ── total failure / unhandled error ──▶ error
//! ```
//!
//! There is no terminal state.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Process-wide synchronization status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// The device has no connectivity.
    Offline,
    /// Online, with local changes possibly awaiting a cycle.
    Pending,
    /// A sync cycle is running.
    Syncing,
    /// The last cycle completed without failures.
    Synced,
    /// The last cycle failed entirely.
    Error,
}

impl SyncStatus {
    /// Returns the status name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Offline => "offline",
            SyncStatus::Pending => "pending",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Synced => "synced",
            SyncStatus::Error => "error",
        }
    }

    /// Status at the end of a cycle with the given counts.
    pub fn after_cycle(synced: usize, failed: usize) -> Self {
        if failed == 0 {
            SyncStatus::Synced
        } else if synced > 0 {
            SyncStatus::Pending
        } else {
            SyncStatus::Error
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Holds the current status and reports only real transitions.
#[derive(Debug)]
pub(crate) struct StatusCell {
    current: RwLock<SyncStatus>,
}

impl StatusCell {
    pub(crate) fn new(initial: SyncStatus) -> Self {
        Self {
            current: RwLock::new(initial),
        }
    }

    pub(crate) fn get(&self) -> SyncStatus {
        *self.current.read()
    }

    /// Sets the status, returning the previous one if it changed.
    pub(crate) fn set(&self, status: SyncStatus) -> Option<SyncStatus> {
        let mut current = self.current.write();
        if *current == status {
            return None;
        }
        let previous = *current;
        *current = status;
        Some(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_after_cycle() {
        assert_eq!(SyncStatus::after_cycle(0, 0), SyncStatus::Synced);
        assert_eq!(SyncStatus::after_cycle(3, 0), SyncStatus::Synced);
        assert_eq!(SyncStatus::after_cycle(2, 1), SyncStatus::Pending);
        assert_eq!(SyncStatus::after_cycle(0, 4), SyncStatus::Error);
    }

    #[test]
    fn cell_reports_only_changes() {
        let cell = StatusCell::new(SyncStatus::Offline);
        assert_eq!(cell.set(SyncStatus::Offline), None);
        assert_eq!(cell.set(SyncStatus::Pending), Some(SyncStatus::Offline));
        assert_eq!(cell.set(SyncStatus::Pending), None);
        assert_eq!(cell.get(), SyncStatus::Pending);
    }

    #[test]
    fn status_names() {
        assert_eq!(SyncStatus::Syncing.to_string(), "syncing");
        assert_eq!(
            serde_json::to_value(SyncStatus::Error).unwrap(),
            serde_json::json!("error")
        );
    }
}
