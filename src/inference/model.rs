//! Model resolution
//!
//! Turns a [`ModelSource`] into a loaded [`ChatModel`].

use std::path::Path;

use crate::error::Result;
use crate::inference::ChatModel;
use crate::types::model::{LoadOptions, ModelSource};

/// Loads models from either side of a [`ModelSource`]
pub trait ModelLoader {
    type Model: ChatModel;

    /// Load a GGUF file from disk
    fn load_local(&self, path: &Path, options: &LoadOptions) -> Result<Self::Model>;

    /// Fetch the file matching `filename_pattern` from a remote repository and load it
    fn load_remote(
        &self,
        repo_id: &str,
        filename_pattern: &str,
        revision: &str,
        options: &LoadOptions,
    ) -> Result<Self::Model>;
}

/// Load the model `source` points at. Failures are returned as-is, without retry.
pub fn resolve_model<L: ModelLoader>(
    loader: &L,
    source: &ModelSource,
    options: &LoadOptions,
) -> Result<L::Model> {
    match source {
        ModelSource::Local { path } => {
            tracing::info!("Loading GGUF model: {}", path.display());
            loader.load_local(path, options)
        }
        ModelSource::Remote {
            repo_id,
            filename_pattern,
            revision,
        } => {
            tracing::info!(
                "Loading GGUF model from hub: {} from file: {}",
                repo_id,
                filename_pattern
            );
            loader.load_remote(repo_id, filename_pattern, revision, options)
        }
    }
}
