//! Device-id command implementation.

use super::{CommandResult, DataDir};

/// Prints the device ID, generating it on first use.
pub fn run(data_dir: &DataDir) -> CommandResult {
    let device_id = data_dir.device_id()?;
    println!("{device_id}");
    Ok(())
}
