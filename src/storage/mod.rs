//! Persistent storage
//!
//! Model cache location, remote model fetching, and configuration files.

pub mod huggingface;
pub mod settings;

use std::path::PathBuf;
use thiserror::Error;

/// Storage and fetch errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Invalid repository reference: {0}")]
    InvalidRepo(String),
    #[error("Could not determine data directory")]
    NoDataDir,
    #[error("Invalid filename pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        source: glob::PatternError,
    },
    #[error("No file found in {repo_id} that matches {pattern}. Available files: {}", .available.join(", "))]
    NoMatchingFile {
        repo_id: String,
        pattern: String,
        available: Vec<String>,
    },
    #[error("Multiple files found in {repo_id} matching {pattern}: {}", .matches.join(", "))]
    MultipleMatches {
        repo_id: String,
        pattern: String,
        matches: Vec<String>,
    },
    #[error("Download failed: {0}")]
    Download(String),
}

/// Application data directory
pub fn get_data_dir() -> Result<PathBuf, StorageError> {
    directories::ProjectDirs::from("com", "GgufSolver", "gguf-solver")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or(StorageError::NoDataDir)
}

/// Directory downloaded models are stored in
pub fn get_models_dir() -> Result<PathBuf, StorageError> {
    Ok(get_data_dir()?.join("models"))
}
