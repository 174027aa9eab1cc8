//! LLM inference engine
//!
//! This module handles all interaction with llama-cpp for model loading and inference,
//! behind the [`ChatModel`] and [`ModelLoader`] seams.

pub mod engine;
pub mod model;
pub mod streaming;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{LlamaEngine, LlamaLoader};
pub use model::{resolve_model, ModelLoader};
pub use streaming::{UtteranceChunker, Utterances};

use crate::error::Result;
use crate::types::message::{ChatCompletion, ChatCompletionRequest, CompletionChunk};

/// Lazily produced chunks of a streaming completion. Finite, not restartable.
pub type ChunkStream<'a> = Box<dyn Iterator<Item = Result<CompletionChunk>> + 'a>;

/// A loaded model able to answer chat completion requests
pub trait ChatModel {
    /// Run a request to completion
    fn create_chat_completion(&self, request: &ChatCompletionRequest) -> Result<ChatCompletion>;

    /// Start a request and return its chunks as they are generated
    fn create_chat_completion_stream(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChunkStream<'_>>;
}
