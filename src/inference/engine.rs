//! llama.cpp-backed chat model
//!
//! Loads GGUF files through `llama-cpp-2` and runs chat completions token by token.

use std::num::NonZeroU32;
use std::path::Path;

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaChatMessage, LlamaChatTemplate, LlamaModel};
use llama_cpp_2::sampling::LlamaSampler;
use llama_cpp_2::token::LlamaToken;
use llama_cpp_2::{send_logs_to_tracing, LogOptions};
use once_cell::sync::OnceCell;

use crate::error::{Result, SolverError};
use crate::inference::{ChatModel, ChunkStream, ModelLoader};
use crate::storage::get_models_dir;
use crate::storage::huggingface::fetch_model_blocking;
use crate::types::message::{
    completion_id, created_now, ChatCompletion, ChatCompletionRequest, Choice, CompletionChunk,
    Delta, FinishReason, Message, Role, SamplingParams, Usage,
};
use crate::types::model::{LoadOptions, ModelInfo};

/// llama.cpp picks a random seed for this value
const DEFAULT_SEED: u32 = u32::MAX;

/// The llama backend may only be initialized once per process
static BACKEND: OnceCell<LlamaBackend> = OnceCell::new();

fn backend() -> Result<&'static LlamaBackend> {
    BACKEND
        .get_or_try_init(LlamaBackend::init)
        .map_err(|e| SolverError::ModelLoad(format!("Failed to init llama backend: {}", e)))
}

fn generation_error(err: impl std::fmt::Display) -> SolverError {
    SolverError::Generation(err.to_string())
}

/// A loaded GGUF model and the chat template used to prompt it
pub struct LlamaEngine {
    model: LlamaModel,
    template: LlamaChatTemplate,
    n_ctx: u32,
    info: ModelInfo,
}

impl LlamaEngine {
    /// Load a GGUF file from disk
    pub fn load(path: &Path, options: &LoadOptions) -> Result<Self> {
        let backend = backend()?;
        send_logs_to_tracing(LogOptions::default().with_logs_enabled(options.verbose));

        let params = LlamaModelParams::default().with_n_gpu_layers(options.n_gpu_layers);
        let model = LlamaModel::load_from_file(backend, path, &params).map_err(|e| {
            SolverError::ModelLoad(format!("Failed to load {}: {}", path.display(), e))
        })?;

        let template = select_template(&model, options.chat_format.as_deref())?;

        let n_ctx_train = model.n_ctx_train();
        let n_ctx = if options.n_ctx == 0 {
            n_ctx_train
        } else {
            options.n_ctx
        };

        let info = ModelInfo {
            name: path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string()),
            path: path.display().to_string(),
            size_bytes: model.size(),
            parameters: Some(model.n_params()),
            n_ctx_train,
        };

        tracing::info!(
            "Model loaded successfully: {} ({} parameters, context {})",
            info.name,
            info.parameters.unwrap_or(0),
            n_ctx
        );

        Ok(Self {
            model,
            template,
            n_ctx,
            info,
        })
    }

    pub fn info(&self) -> &ModelInfo {
        &self.info
    }

    /// Start generating for `request`
    pub fn stream(&self, request: &ChatCompletionRequest) -> Result<TokenStream<'_>> {
        let messages = request
            .messages
            .iter()
            .map(|m| {
                LlamaChatMessage::new(
                    m.role.as_str().to_string(),
                    m.content.clone().unwrap_or_default(),
                )
            })
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(generation_error)?;

        let prompt = self
            .model
            .apply_chat_template(&self.template, &messages, true)
            .map_err(|e| SolverError::Generation(format!("Failed to apply chat template: {}", e)))?;

        let tokens = self
            .model
            .str_to_token(&prompt, AddBos::Never)
            .map_err(|e| SolverError::Generation(format!("Failed to tokenize prompt: {}", e)))?;

        let n_ctx = self.n_ctx as usize;
        if tokens.is_empty() {
            return Err(SolverError::Generation("Prompt is empty".to_string()));
        }
        if tokens.len() >= n_ctx {
            return Err(SolverError::Generation(format!(
                "Requested tokens ({}) exceed context window of {}",
                tokens.len(),
                n_ctx
            )));
        }
        let available = n_ctx - tokens.len();
        let budget = request
            .max_tokens
            .map_or(available, |max| (max as usize).min(available));

        let ctx_params = LlamaContextParams::default().with_n_ctx(NonZeroU32::new(self.n_ctx));
        let mut ctx = self
            .model
            .new_context(backend()?, ctx_params)
            .map_err(|e| SolverError::Generation(format!("Failed to create context: {}", e)))?;

        let n_batch = ctx.n_batch() as usize;
        for chunk in tokens.chunks(n_batch) {
            let mut batch = LlamaBatch::get_one(chunk)
                .map_err(|e| SolverError::Generation(format!("Failed to create batch: {}", e)))?;
            ctx.decode(&mut batch)
                .map_err(|e| SolverError::Generation(format!("Prefill decode failed: {}", e)))?;
        }

        tracing::debug!(
            "Prompt prefilled: {} tokens, up to {} new tokens",
            tokens.len(),
            budget
        );

        Ok(TokenStream {
            model: &self.model,
            ctx,
            sampler: build_sampler(&request.sampling),
            decoder: encoding_rs::UTF_8.new_decoder(),
            id: completion_id(),
            created: created_now(),
            model_name: self.info.name.clone(),
            pending: None,
            remaining: budget,
            prompt_tokens: tokens.len() as u32,
            completion_tokens: 0,
            finish_reason: FinishReason::Stop,
            state: StreamState::Start,
        })
    }
}

impl ChatModel for LlamaEngine {
    fn create_chat_completion(&self, request: &ChatCompletionRequest) -> Result<ChatCompletion> {
        let stream = self.stream(request)?;
        let id = stream.id.clone();
        let created = stream.created;

        let mut content = String::new();
        let mut finish_reason = None;
        let mut usage = Usage::default();
        for chunk in stream {
            let chunk = chunk?;
            if let Some(text) = chunk.content() {
                content.push_str(text);
            }
            if let Some(reason) = chunk.finish_reason() {
                finish_reason = Some(reason);
            }
            if let Some(u) = chunk.usage {
                usage = u;
            }
        }

        Ok(ChatCompletion {
            id,
            created,
            model: self.info.name.clone(),
            choices: vec![Choice {
                index: 0,
                message: Message::new(Role::Assistant, content),
                finish_reason,
            }],
            usage,
        })
    }

    fn create_chat_completion_stream(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChunkStream<'_>> {
        Ok(Box::new(self.stream(request)?))
    }
}

fn select_template(model: &LlamaModel, chat_format: Option<&str>) -> Result<LlamaChatTemplate> {
    if let Some(name) = chat_format {
        return LlamaChatTemplate::new(name)
            .map_err(|e| SolverError::ModelLoad(format!("Invalid chat format '{}': {}", name, e)));
    }

    match model.chat_template(None) {
        Ok(template) => Ok(template),
        Err(_) => {
            tracing::warn!("Model has no embedded chat template, falling back to chatml");
            LlamaChatTemplate::new("chatml").map_err(|e| {
                SolverError::ModelLoad(format!("Failed to create fallback chat template: {}", e))
            })
        }
    }
}

fn build_sampler(params: &SamplingParams) -> LlamaSampler {
    if params.temperature <= 0.0 {
        return LlamaSampler::greedy();
    }

    LlamaSampler::chain_simple([
        LlamaSampler::top_k(params.top_k as i32),
        LlamaSampler::top_p(params.top_p, 1),
        LlamaSampler::min_p(params.min_p, 1),
        LlamaSampler::temp(params.temperature),
        LlamaSampler::dist(params.seed.unwrap_or(DEFAULT_SEED)),
    ])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Start,
    Generating,
    Finished,
}

/// Lazily generated completion chunks.
///
/// Yields a role-only chunk, one chunk per decoded piece, then a final chunk with the
/// finish reason and token usage. Each `next` call generates at most what is needed for
/// one chunk.
pub struct TokenStream<'a> {
    model: &'a LlamaModel,
    ctx: LlamaContext<'a>,
    sampler: LlamaSampler,
    decoder: encoding_rs::Decoder,
    id: String,
    created: i64,
    model_name: String,
    /// Sampled token not yet fed back into the context
    pending: Option<LlamaToken>,
    remaining: usize,
    prompt_tokens: u32,
    completion_tokens: u32,
    finish_reason: FinishReason,
    state: StreamState,
}

impl TokenStream<'_> {
    fn chunk(&self, delta: Delta, finish_reason: Option<FinishReason>) -> CompletionChunk {
        CompletionChunk::new(
            self.id.clone(),
            self.created,
            self.model_name.clone(),
            delta,
            finish_reason,
        )
    }

    /// Next non-empty piece of text, or `None` once generation has stopped
    fn next_piece(&mut self) -> Result<Option<String>> {
        loop {
            if self.remaining == 0 {
                self.finish_reason = FinishReason::Length;
                return Ok(None);
            }

            if let Some(token) = self.pending.take() {
                let next_tokens = [token];
                let mut batch = LlamaBatch::get_one(&next_tokens).map_err(generation_error)?;
                self.ctx
                    .decode(&mut batch)
                    .map_err(|e| SolverError::Generation(format!("Decode failed: {}", e)))?;
            }

            let token = self.sampler.sample(&self.ctx, -1);
            self.sampler.accept(token);

            if self.model.is_eog_token(token) {
                self.finish_reason = FinishReason::Stop;
                return Ok(None);
            }

            self.remaining -= 1;
            self.completion_tokens += 1;
            self.pending = Some(token);

            let piece = self
                .model
                .token_to_piece(token, &mut self.decoder, false, None)
                .map_err(|e| SolverError::Generation(format!("Failed to decode token: {}", e)))?;
            if !piece.is_empty() {
                return Ok(Some(piece));
            }
        }
    }
}

impl Iterator for TokenStream<'_> {
    type Item = Result<CompletionChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.state {
            StreamState::Start => {
                self.state = StreamState::Generating;
                Some(Ok(self.chunk(
                    Delta {
                        role: Some(Role::Assistant),
                        content: None,
                    },
                    None,
                )))
            }
            StreamState::Generating => match self.next_piece() {
                Ok(Some(piece)) => Some(Ok(self.chunk(
                    Delta {
                        role: None,
                        content: Some(piece),
                    },
                    None,
                ))),
                Ok(None) => {
                    self.state = StreamState::Finished;
                    tracing::debug!(
                        "Generation finished ({:?}) after {} tokens",
                        self.finish_reason,
                        self.completion_tokens
                    );
                    let mut chunk = self.chunk(Delta::default(), Some(self.finish_reason));
                    chunk.usage = Some(Usage::new(self.prompt_tokens, self.completion_tokens));
                    Some(Ok(chunk))
                }
                Err(e) => {
                    self.state = StreamState::Finished;
                    Some(Err(e))
                }
            },
            StreamState::Finished => None,
        }
    }
}

/// Loads models with llama.cpp, fetching remote ones into the model cache first
#[derive(Debug, Clone, Copy, Default)]
pub struct LlamaLoader;

impl ModelLoader for LlamaLoader {
    type Model = LlamaEngine;

    fn load_local(&self, path: &Path, options: &LoadOptions) -> Result<LlamaEngine> {
        LlamaEngine::load(path, options)
    }

    fn load_remote(
        &self,
        repo_id: &str,
        filename_pattern: &str,
        revision: &str,
        options: &LoadOptions,
    ) -> Result<LlamaEngine> {
        let models_dir = match &options.cache_dir {
            Some(dir) => dir.clone(),
            None => get_models_dir()?,
        };
        let path = fetch_model_blocking(repo_id, filename_pattern, revision, &models_dir)?;
        LlamaEngine::load(&path, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_rejects_non_gguf_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"definitely not a gguf file").unwrap();

        let options = LoadOptions {
            verbose: false,
            ..LoadOptions::default()
        };
        let result = LlamaEngine::load(file.path(), &options);
        assert!(matches!(result, Err(SolverError::ModelLoad(_))));
    }

    #[test]
    fn test_remote_load_with_invalid_reference_fails() {
        let dir = tempfile::tempdir().unwrap();
        let options = LoadOptions {
            cache_dir: Some(dir.path().to_path_buf()),
            ..LoadOptions::default()
        };
        let result = LlamaLoader.load_remote("not-a-repo", "*Q4_K_M.gguf", "main", &options);
        assert!(matches!(result, Err(SolverError::ModelLoad(_))));
    }
}
