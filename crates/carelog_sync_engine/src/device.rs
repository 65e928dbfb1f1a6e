//! Per-installation device identity.

use crate::error::{EngineResult, SyncError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

/// A per-installation device identifier.
///
/// Generated once, persisted, and sent as `X-Device-ID` on every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(Uuid);

impl DeviceId {
    /// Generates a new random device ID.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// The all-zero device ID.
    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Loads the device ID stored at `path`, generating and persisting one
    /// if the file does not exist yet.
    pub fn load_or_create(path: &Path) -> EngineResult<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)?;
            return contents.trim().parse().map_err(|_| {
                SyncError::Store(format!("invalid device id in {}", path.display()))
            });
        }

        let id = Self::generate();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, id.to_string())?;
        tracing::info!(device_id = %id, "generated new device id");
        Ok(id)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for DeviceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}
