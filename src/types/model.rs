//! Model types
//!
//! Where a model comes from, how to load it, and what got loaded.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::types::config::SolverConfig;

/// Where the model weights come from, decided once from configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelSource {
    /// A GGUF file on the local filesystem
    Local { path: PathBuf },
    /// A file in a remote model repository, selected by glob
    Remote {
        repo_id: String,
        filename_pattern: String,
        revision: String,
    },
}

impl ModelSource {
    /// An existing regular file means local; anything else is a repository id
    pub fn from_config(config: &SolverConfig) -> Result<Self> {
        let model = config.model()?;
        let path = Path::new(model);
        if path.is_file() {
            Ok(ModelSource::Local {
                path: path.to_path_buf(),
            })
        } else {
            Ok(ModelSource::Remote {
                repo_id: model.to_string(),
                filename_pattern: config.remote_filename.clone(),
                revision: config.revision.clone(),
            })
        }
    }
}

/// Options passed through to the engine when loading
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadOptions {
    pub chat_format: Option<String>,
    pub verbose: bool,
    pub n_ctx: u32,
    pub n_gpu_layers: u32,
    pub cache_dir: Option<PathBuf>,
}

impl From<&SolverConfig> for LoadOptions {
    fn from(config: &SolverConfig) -> Self {
        Self {
            chat_format: config.chat_format.clone(),
            verbose: config.verbose,
            n_ctx: config.n_ctx,
            n_gpu_layers: config.n_gpu_layers,
            cache_dir: config.cache_dir.clone(),
        }
    }
}

/// Information about a loaded model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Display name of the model
    pub name: String,
    /// Path to the GGUF file
    pub path: String,
    /// Model size in bytes
    pub size_bytes: u64,
    /// Number of parameters (if known)
    pub parameters: Option<u64>,
    /// Context length the model was trained with
    pub n_ctx_train: u32,
}
