//! Command-line smoke test
//!
//! Loads a GGUF model and prints the streamed answer to a query, one utterance per line.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use gguf_solver::storage::settings::load_config;
use gguf_solver::{GgufSolver, QuestionSolver, SolverConfig};
use tracing_subscriber::EnvFilter;

const DEFAULT_MODEL: &str = "TheBloke/phi-2-orange-GGUF";
const DEFAULT_QUERY: &str = "tell me a joke about aliens";

/// Ask a GGUF model one question and print the answer
#[derive(Parser, Debug)]
#[command(name = "gguf-solver", version, about, long_about = None)]
struct Args {
    /// Local .gguf file or Hugging Face repository id
    #[arg(value_name = "MODEL")]
    model: Option<String>,

    /// Glob selecting the file inside a remote repository
    #[arg(value_name = "REMOTE_FILENAME")]
    remote_filename: Option<String>,

    /// JSON configuration file; command-line values take precedence
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Question to ask
    #[arg(long, value_name = "TEXT", default_value = DEFAULT_QUERY)]
    query: String,

    /// Upper bound on generated tokens
    #[arg(long, value_name = "N")]
    max_tokens: Option<u32>,

    /// Chat template name, overriding the one embedded in the model
    #[arg(long, value_name = "NAME")]
    chat_format: Option<String>,

    /// Print the whole answer at once instead of streaming utterances
    #[arg(long)]
    full: bool,

    /// Silence llama.cpp logging
    #[arg(long)]
    quiet: bool,
}

fn build_config(args: &Args) -> Result<SolverConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => SolverConfig::default(),
    };

    if let Some(model) = &args.model {
        config.model = Some(model.clone());
    }
    if config.model.is_none() {
        config.model = Some(DEFAULT_MODEL.to_string());
    }
    if let Some(pattern) = &args.remote_filename {
        config.remote_filename = pattern.clone();
    }
    if args.max_tokens.is_some() {
        config.max_tokens = args.max_tokens;
    }
    if args.chat_format.is_some() {
        config.chat_format = args.chat_format.clone();
    }
    if args.quiet {
        config.verbose = false;
    }
    Ok(config)
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = build_config(&args)?;
    let solver = GgufSolver::new(config)?;
    let query = args.query.as_str();

    tracing::info!("Query: {}", query);
    if args.full {
        println!("{}", solver.get_spoken_answer(query, None)?);
        return Ok(());
    }

    for utterance in solver.stream_utterances(query, None)? {
        println!("{}", utterance?);
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("gguf-solver").chain(args.iter().copied()))
    }

    #[test]
    fn test_parse_positional_model_and_pattern() {
        let args = parse(&["Qwen/Qwen2-0.5B-Instruct-GGUF", "*q8_0.gguf", "--full"]).unwrap();
        assert_eq!(args.model.as_deref(), Some("Qwen/Qwen2-0.5B-Instruct-GGUF"));
        assert_eq!(args.remote_filename.as_deref(), Some("*q8_0.gguf"));
        assert!(args.full);
    }

    #[test]
    fn test_parse_options() {
        let args = parse(&["--query", "hi there", "--max-tokens", "20", "--quiet"]).unwrap();
        assert_eq!(args.query, "hi there");
        assert_eq!(args.max_tokens, Some(20));
        assert!(args.quiet);
        assert!(args.model.is_none());
    }

    #[test]
    fn test_parse_defaults() {
        let args = parse(&[]).unwrap();
        assert_eq!(args.query, DEFAULT_QUERY);
        assert!(args.config.is_none());
        assert!(!args.full);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse(&["--max-tokens", "lots"]).is_err());
        assert!(parse(&["--query"]).is_err());
        assert!(parse(&["--bogus"]).is_err());
        assert!(parse(&["a", "b", "c"]).is_err());
    }

    #[test]
    fn test_build_config_defaults_to_demo_model() {
        let config = build_config(&parse(&[]).unwrap()).unwrap();
        assert_eq!(config.model.as_deref(), Some(DEFAULT_MODEL));
        assert_eq!(config.remote_filename, "*Q4_K_M.gguf");
    }

    #[test]
    fn test_build_config_overrides() {
        let args = parse(&["owner/repo", "*Q5_K_M.gguf", "--max-tokens", "8", "--quiet"]).unwrap();
        let config = build_config(&args).unwrap();
        assert_eq!(config.model.as_deref(), Some("owner/repo"));
        assert_eq!(config.remote_filename, "*Q5_K_M.gguf");
        assert_eq!(config.max_tokens, Some(8));
        assert!(!config.verbose);
    }

    #[test]
    fn test_build_config_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("solver.json");
        std::fs::write(&path, r#"{"model": "from/file", "max_tokens": 16}"#).unwrap();

        let args = parse(&["--config", path.to_str().unwrap()]).unwrap();
        let config = build_config(&args).unwrap();
        assert_eq!(config.model.as_deref(), Some("from/file"));
        assert_eq!(config.max_tokens, Some(16));
    }
}
