//! Configuration files
//!
//! Reads and writes solver configuration as JSON.

use crate::storage::StorageError;
use crate::types::config::SolverConfig;
use std::fs;
use std::path::Path;

/// Load a solver configuration from a JSON file
pub fn load_config(path: &Path) -> Result<SolverConfig, StorageError> {
    let json = fs::read_to_string(path)?;
    let mut config: SolverConfig = serde_json::from_str(&json)?;

    // Validate loaded settings
    config.validate();

    tracing::debug!("Loaded solver config from {:?}", path);
    Ok(config)
}

/// Save a solver configuration to a JSON file
pub fn save_config(path: &Path, config: &SolverConfig) -> Result<(), StorageError> {
    // Ensure the parent directory exists
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json)?;

    tracing::debug!("Saved solver config to {:?}", path);
    Ok(())
}
