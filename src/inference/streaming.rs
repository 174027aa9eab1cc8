//! Utterance streaming
//!
//! Regroups the token fragments of a streaming completion into sentence-sized
//! utterances that can be handed to text-to-speech one at a time.

use std::iter::FusedIterator;

use crate::error::Result;
use crate::types::message::CompletionChunk;

/// Characters that close an utterance when a fragment ends with them
pub const SENTENCE_TERMINATORS: [char; 5] = ['.', '!', '?', '\n', ':'];

/// Whether `text` ends an utterance.
///
/// Only the last two characters matter. A period right after an ASCII digit is part
/// of a number and does not count.
pub fn ends_utterance(text: &str) -> bool {
    let mut chars = text.chars().rev();
    match chars.next() {
        Some('.') => !chars.next().is_some_and(|c| c.is_ascii_digit()),
        Some(last) => SENTENCE_TERMINATORS.contains(&last),
        None => false,
    }
}

/// Accumulates fragments until one of them closes an utterance
#[derive(Debug, Default)]
pub struct UtteranceChunker {
    buffer: String,
}

impl UtteranceChunker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment, returning the finished utterance if it closed one.
    ///
    /// The buffer is reset on every boundary; whitespace-only utterances are dropped.
    pub fn push(&mut self, fragment: &str) -> Option<String> {
        if fragment.is_empty() {
            return None;
        }
        self.buffer.push_str(fragment);
        // The boundary character is always the fragment's last one, but the digit before
        // a lone "." lives in the previous fragment, so the check reads the buffer.
        if !ends_utterance(&self.buffer) {
            return None;
        }

        let utterance = self.buffer.trim().to_string();
        self.buffer.clear();
        if utterance.is_empty() {
            None
        } else {
            Some(utterance)
        }
    }

    /// Text received since the last boundary
    pub fn pending(&self) -> &str {
        &self.buffer
    }
}

/// Iterator adapter turning completion chunks into utterances.
///
/// Chunks without content are skipped. Text left over when the chunks run out without
/// a closing terminator is not emitted. The first error ends the iteration; utterances
/// yielded before it stay delivered.
pub struct Utterances<I> {
    chunks: I,
    chunker: UtteranceChunker,
    done: bool,
}

impl<I> Utterances<I> {
    pub fn new(chunks: I) -> Self {
        Self {
            chunks,
            chunker: UtteranceChunker::new(),
            done: false,
        }
    }
}

impl<I> Iterator for Utterances<I>
where
    I: Iterator<Item = Result<CompletionChunk>>,
{
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            match self.chunks.next() {
                Some(Ok(chunk)) => {
                    let Some(fragment) = chunk.content() else {
                        continue;
                    };
                    if let Some(utterance) = self.chunker.push(fragment) {
                        return Some(Ok(utterance));
                    }
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    if !self.chunker.pending().trim().is_empty() {
                        tracing::debug!(
                            "Stream ended without terminator, dropping: {:?}",
                            self.chunker.pending()
                        );
                    }
                    return None;
                }
            }
        }
    }
}

impl<I> FusedIterator for Utterances<I> where I: Iterator<Item = Result<CompletionChunk>> {}
