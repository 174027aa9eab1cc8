//! GGUF Solver Library
//!
//! Answers voice-assistant questions with a locally executed GGUF model, either as one
//! complete answer or as a stream of sentence-sized utterances ready for text-to-speech.

pub mod error;
pub mod inference;
pub mod solver;
pub mod storage;
pub mod types;

pub use error::{Result, SolverError};
pub use solver::{GgufSolver, QuestionSolver};
pub use types::config::SolverConfig;
