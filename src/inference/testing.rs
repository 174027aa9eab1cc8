//! Test doubles for the inference seams

use std::cell::RefCell;
use std::path::{Path, PathBuf};

use crate::error::{Result, SolverError};
use crate::inference::{ChatModel, ChunkStream, ModelLoader};
use crate::types::message::{
    ChatCompletion, ChatCompletionRequest, Choice, CompletionChunk, Delta, FinishReason, Message,
    Role, Usage,
};
use crate::types::model::LoadOptions;

pub(crate) fn text_chunk(content: Option<&str>) -> CompletionChunk {
    CompletionChunk::new(
        "chatcmpl-test",
        0,
        "fake",
        Delta {
            role: None,
            content: content.map(str::to_string),
        },
        None,
    )
}

pub(crate) fn role_chunk() -> CompletionChunk {
    CompletionChunk::new(
        "chatcmpl-test",
        0,
        "fake",
        Delta {
            role: Some(Role::Assistant),
            content: None,
        },
        None,
    )
}

pub(crate) fn text_chunks(fragments: &[&str]) -> Vec<Result<CompletionChunk>> {
    fragments
        .iter()
        .map(|f| Ok(text_chunk(Some(*f))))
        .collect()
}

/// Chat model replaying a scripted answer and recording every request
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeModel {
    /// Returned by the non-streaming call; `None` yields no choices
    pub answer: Option<String>,
    /// Streamed fragments; `None` entries are chunks without content
    pub fragments: Vec<Option<String>>,
    /// Fail the stream after this many fragments
    pub fail_after: Option<usize>,
    pub requests: RefCell<Vec<ChatCompletionRequest>>,
}

impl FakeModel {
    pub fn answering(answer: &str) -> Self {
        Self {
            answer: Some(answer.to_string()),
            ..Self::default()
        }
    }

    pub fn streaming(fragments: &[&str]) -> Self {
        Self {
            fragments: fragments.iter().map(|f| Some(f.to_string())).collect(),
            ..Self::default()
        }
    }

    pub fn last_request(&self) -> ChatCompletionRequest {
        self.requests
            .borrow()
            .last()
            .cloned()
            .expect("no request recorded")
    }
}

impl ChatModel for FakeModel {
    fn create_chat_completion(&self, request: &ChatCompletionRequest) -> Result<ChatCompletion> {
        self.requests.borrow_mut().push(request.clone());
        let choices = match &self.answer {
            Some(answer) => vec![Choice {
                index: 0,
                message: Message::new(Role::Assistant, answer.clone()),
                finish_reason: Some(FinishReason::Stop),
            }],
            None => Vec::new(),
        };
        Ok(ChatCompletion {
            id: "chatcmpl-test".to_string(),
            created: 0,
            model: "fake".to_string(),
            choices,
            usage: Usage::default(),
        })
    }

    fn create_chat_completion_stream(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChunkStream<'_>> {
        self.requests.borrow_mut().push(request.clone());

        let mut items = vec![Ok(role_chunk())];
        for (i, fragment) in self.fragments.iter().enumerate() {
            if self.fail_after == Some(i) {
                items.push(Err(SolverError::Generation("stream interrupted".to_string())));
                return Ok(Box::new(items.into_iter()));
            }
            items.push(Ok(text_chunk(fragment.as_deref())));
        }
        items.push(Ok(CompletionChunk::new(
            "chatcmpl-test",
            0,
            "fake",
            Delta::default(),
            Some(FinishReason::Stop),
        )));
        Ok(Box::new(items.into_iter()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum LoadCall {
    Local(PathBuf),
    Remote {
        repo_id: String,
        filename_pattern: String,
        revision: String,
    },
}

/// Loader recording which branch was taken and handing out clones of `model`
#[derive(Debug, Default)]
pub(crate) struct FakeLoader {
    pub model: FakeModel,
    pub fail: bool,
    pub calls: RefCell<Vec<(LoadCall, LoadOptions)>>,
}

impl FakeLoader {
    pub fn with_model(model: FakeModel) -> Self {
        Self {
            model,
            ..Self::default()
        }
    }

    fn load(&self, call: LoadCall, options: &LoadOptions) -> Result<FakeModel> {
        self.calls.borrow_mut().push((call, options.clone()));
        if self.fail {
            return Err(SolverError::ModelLoad("no file found".to_string()));
        }
        Ok(self.model.clone())
    }
}

impl ModelLoader for FakeLoader {
    type Model = FakeModel;

    fn load_local(&self, path: &Path, options: &LoadOptions) -> Result<FakeModel> {
        self.load(LoadCall::Local(path.to_path_buf()), options)
    }

    fn load_remote(
        &self,
        repo_id: &str,
        filename_pattern: &str,
        revision: &str,
        options: &LoadOptions,
    ) -> Result<FakeModel> {
        self.load(
            LoadCall::Remote {
                repo_id: repo_id.to_string(),
                filename_pattern: filename_pattern.to_string(),
                revision: revision.to_string(),
            },
            options,
        )
    }
}
