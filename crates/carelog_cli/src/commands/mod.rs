//! CLI command implementations.

pub mod device;
pub mod enqueue;
pub mod serve;
pub mod status;
pub mod sync;

use carelog_sync_engine::{DeviceId, EngineResult, FileMutationStore};
use carelog_sync_protocol::Timestamp;
use chrono::{DateTime, SecondsFormat, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Result type of every command.
pub type CommandResult = Result<(), Box<dyn std::error::Error>>;

/// Local client state: device identity, the durable queue and the pull
/// cursor.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Wraps a data directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the directory path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Loads the device ID, creating it on first use.
    pub fn device_id(&self) -> EngineResult<DeviceId> {
        DeviceId::load_or_create(&self.root.join("device_id"))
    }

    /// Opens the mutation store.
    pub async fn open_store(&self) -> EngineResult<FileMutationStore> {
        FileMutationStore::open(self.root.join("queue.json")).await
    }

    /// Loads the server-clock cursor saved by the last pull.
    pub fn pull_cursor(&self) -> Result<Option<Timestamp>, Box<dyn std::error::Error>> {
        match std::fs::read_to_string(self.root.join("pull_cursor")) {
            Ok(text) => Ok(Some(
                DateTime::parse_from_rfc3339(text.trim())?.with_timezone(&Utc),
            )),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Saves the pull cursor.
    pub fn save_pull_cursor(&self, cursor: Timestamp) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::write(
            self.root.join("pull_cursor"),
            cursor.to_rfc3339_opts(SecondsFormat::Millis, true),
        )
    }
}

/// Output format of inspection commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    /// Human-readable text.
    Text,
    /// JSON.
    Json,
}
