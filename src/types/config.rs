//! Configuration types
//!
//! Solver configuration as handed over by the host framework.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Result, SolverError};
use crate::types::message::SamplingParams;

/// Default glob used to pick a file from a remote repository
pub const DEFAULT_REMOTE_FILENAME: &str = "*Q4_K_M.gguf";

/// Default system prompt
pub const DEFAULT_PERSONA: &str = "You are a helpful assistant who gives short factual answers";

/// Solver configuration
///
/// Unknown keys are ignored so the host can pass its whole plugin section through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Local GGUF file path or remote repository id (required)
    #[serde(default)]
    pub model: Option<String>,
    /// Glob selecting the file to fetch when `model` is remote
    #[serde(default = "default_remote_filename")]
    pub remote_filename: String,
    /// Repository revision used for remote models
    #[serde(default = "default_revision")]
    pub revision: String,
    /// Name of a built-in chat template; the model's embedded template otherwise
    #[serde(default)]
    pub chat_format: Option<String>,
    /// System prompt prepended to every request
    #[serde(default = "default_persona")]
    pub persona: String,
    /// Maximum number of tokens to generate per request
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Forward llama.cpp logs
    #[serde(default = "default_verbose")]
    pub verbose: bool,
    /// Context window size (0 = model's training context)
    #[serde(default = "default_n_ctx")]
    pub n_ctx: u32,
    /// Number of GPU layers to offload (0 = CPU only)
    #[serde(default)]
    pub n_gpu_layers: u32,
    /// Where downloaded models are stored
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// Temperature parameter for text generation (0.0 - 2.0)
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Top-p (nucleus sampling) parameter (0.0 - 1.0)
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    /// Top-k sampling parameter
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    /// Min-p sampling parameter (0.0 - 1.0)
    #[serde(default = "default_min_p")]
    pub min_p: f32,
    /// Sampling seed, random when unset
    #[serde(default)]
    pub seed: Option<u32>,
}

fn default_remote_filename() -> String {
    DEFAULT_REMOTE_FILENAME.to_string()
}

fn default_revision() -> String {
    "main".to_string()
}

fn default_persona() -> String {
    DEFAULT_PERSONA.to_string()
}

fn default_verbose() -> bool {
    true
}

fn default_n_ctx() -> u32 {
    512
}

fn default_temperature() -> f32 {
    0.2
}

fn default_top_p() -> f32 {
    0.95
}

fn default_top_k() -> u32 {
    40
}

fn default_min_p() -> f32 {
    0.05
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            model: None,
            remote_filename: default_remote_filename(),
            revision: default_revision(),
            chat_format: None,
            persona: default_persona(),
            max_tokens: None,
            verbose: default_verbose(),
            n_ctx: default_n_ctx(),
            n_gpu_layers: 0,
            cache_dir: None,
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: default_top_k(),
            min_p: default_min_p(),
            seed: None,
        }
    }
}

impl SolverConfig {
    /// Config for a model reference with every other option defaulted
    pub fn for_model(model: impl Into<String>) -> Self {
        Self {
            model: Some(model.into()),
            ..Self::default()
        }
    }

    /// Build a config from the host's option mapping
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let mut config: SolverConfig = serde_json::from_value(value)
            .map_err(|e| SolverError::Configuration(e.to_string()))?;
        config.validate();
        Ok(config)
    }

    /// The model reference, or a configuration error if none was given
    pub fn model(&self) -> Result<&str> {
        self.model
            .as_deref()
            .ok_or_else(|| SolverError::Configuration("no 'model' set in config".to_string()))
    }

    /// Clamp sampling values into their legal ranges
    pub fn validate(&mut self) {
        self.temperature = self.temperature.clamp(0.0, 2.0);
        self.top_p = self.top_p.clamp(0.0, 1.0);
        self.min_p = self.min_p.clamp(0.0, 1.0);
    }

    pub fn sampling(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature,
            top_p: self.top_p,
            top_k: self.top_k,
            min_p: self.min_p,
            seed: self.seed,
        }
    }
}
