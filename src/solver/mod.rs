//! Question solvers
//!
//! [`QuestionSolver`] is the interface the voice assistant queries; [`GgufSolver`]
//! implements it on top of a local GGUF model.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SolverError};
use crate::inference::{resolve_model, ChatModel, LlamaEngine, LlamaLoader, ModelLoader, Utterances};
use crate::types::config::SolverConfig;
use crate::types::message::{ChatCompletionRequest, Message};
use crate::types::model::{LoadOptions, ModelSource};

/// Extra data the host may attach to a query
pub type SolverContext = serde_json::Map<String, serde_json::Value>;

/// Utterances of a streamed answer, in generation order
pub type UtteranceStream<'a> = Box<dyn Iterator<Item = Result<String>> + 'a>;

/// One step of an expanded answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerStep {
    pub title: String,
    pub summary: String,
}

/// Interface the host framework uses to ask questions
pub trait QuestionSolver {
    /// Whether the host should translate queries and answers for this solver
    fn enable_tx(&self) -> bool;

    /// Ranking among solvers; lower runs first
    fn priority(&self) -> u32;

    /// One complete answer
    fn get_spoken_answer(&self, query: &str, context: Option<&SolverContext>) -> Result<String>;

    /// Answer as sentence-sized utterances, produced while the answer is generated
    fn stream_utterances<'a>(
        &'a self,
        query: &str,
        context: Option<&SolverContext>,
    ) -> Result<UtteranceStream<'a>>;

    /// Answer broken into steps; a single step holding the spoken answer by default
    fn get_expanded_answer(
        &self,
        query: &str,
        context: Option<&SolverContext>,
    ) -> Result<Vec<AnswerStep>> {
        Ok(vec![AnswerStep {
            title: query.to_string(),
            summary: self.get_spoken_answer(query, context)?,
        }])
    }
}

/// Question solver backed by a local GGUF model
pub struct GgufSolver<M = LlamaEngine> {
    config: SolverConfig,
    model: M,
}

impl GgufSolver<LlamaEngine> {
    /// Resolve and load the configured model with llama.cpp
    pub fn new(config: SolverConfig) -> Result<Self> {
        Self::with_loader(config, &LlamaLoader)
    }
}

impl<M: ChatModel> GgufSolver<M> {
    pub const ENABLE_TX: bool = false;
    pub const PRIORITY: u32 = 60;

    /// Resolve and load the configured model with `loader`
    pub fn with_loader<L>(config: SolverConfig, loader: &L) -> Result<Self>
    where
        L: ModelLoader<Model = M>,
    {
        let source = ModelSource::from_config(&config)?;
        let model = resolve_model(loader, &source, &LoadOptions::from(&config))?;
        Ok(Self { config, model })
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    fn build_request(&self, query: &str) -> ChatCompletionRequest {
        ChatCompletionRequest::new(vec![
            Message::system(self.config.persona.clone()),
            Message::user(query),
        ])
        .with_max_tokens(self.config.max_tokens)
        .with_sampling(self.config.sampling())
    }
}

impl<M: ChatModel> QuestionSolver for GgufSolver<M> {
    fn enable_tx(&self) -> bool {
        Self::ENABLE_TX
    }

    fn priority(&self) -> u32 {
        Self::PRIORITY
    }

    fn get_spoken_answer(&self, query: &str, _context: Option<&SolverContext>) -> Result<String> {
        let completion = self.model.create_chat_completion(&self.build_request(query))?;
        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| SolverError::Generation("Completion returned no choices".to_string()))?;
        Ok(choice.message.content.unwrap_or_default())
    }

    fn stream_utterances<'a>(
        &'a self,
        query: &str,
        _context: Option<&SolverContext>,
    ) -> Result<UtteranceStream<'a>> {
        let chunks = self
            .model
            .create_chat_completion_stream(&self.build_request(query))?;
        Ok(Box::new(Utterances::new(chunks)))
    }
}
