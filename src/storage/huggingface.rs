//! HuggingFace model fetcher
//!
//! Resolves a repository id and filename glob to a single GGUF file and downloads it
//! into the local model cache.

use crate::storage::StorageError;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

const DEFAULT_ENDPOINT: &str = "https://huggingface.co";

/// A repository reference, optionally naming a file and revision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub repo_id: String,
    pub filename: Option<String>,
    pub revision: Option<String>,
}

impl RepoRef {
    /// Parse the supported reference formats:
    /// 1. https://huggingface.co/username/repo/blob/main/model.gguf
    /// 2. https://huggingface.co/username/repo/resolve/main/model.gguf
    /// 3. https://huggingface.co/username/repo
    /// 4. username/repo
    pub fn parse(reference: &str) -> Result<Self, StorageError> {
        let url = reference.trim();
        let url = url.split('?').next().unwrap_or(url);
        let url = url.split('#').next().unwrap_or(url);

        if url.contains("huggingface.co") {
            let path = url
                .replace("https://huggingface.co/", "")
                .replace("http://huggingface.co/", "");

            let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
            if parts.len() < 2 {
                return Err(StorageError::InvalidRepo(reference.to_string()));
            }
            let repo_id = format!("{}/{}", parts[0], parts[1]);

            if let Some(pos) = parts.iter().position(|&p| p == "blob" || p == "resolve") {
                let revision = parts.get(pos + 1).map(|r| r.to_string());
                let filename = if parts.len() > pos + 2 {
                    Some(parts[pos + 2..].join("/"))
                } else {
                    None
                };
                return Ok(Self {
                    repo_id,
                    filename,
                    revision,
                });
            }

            return Ok(Self {
                repo_id,
                filename: None,
                revision: None,
            });
        }

        let parts: Vec<&str> = url.split('/').collect();
        if parts.len() == 2 && parts.iter().all(|p| !p.is_empty()) {
            return Ok(Self {
                repo_id: url.to_string(),
                filename: None,
                revision: None,
            });
        }

        Err(StorageError::InvalidRepo(reference.to_string()))
    }
}

fn endpoint() -> String {
    std::env::var("HF_ENDPOINT")
        .ok()
        .filter(|e| !e.is_empty())
        .map(|e| e.trim_end_matches('/').to_string())
        .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
}

fn build_client() -> Result<reqwest::Client, StorageError> {
    let mut headers = reqwest::header::HeaderMap::new();
    if let Ok(token) = std::env::var("HF_TOKEN") {
        let value = reqwest::header::HeaderValue::from_str(&format!("Bearer {}", token.trim()))
            .map_err(|e| StorageError::Download(format!("Invalid HF_TOKEN: {}", e)))?;
        headers.insert(reqwest::header::AUTHORIZATION, value);
    }

    Ok(reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(3600)) // 1 hour timeout for large models
        .user_agent(concat!("gguf-solver/", env!("CARGO_PKG_VERSION")))
        .default_headers(headers)
        .build()?)
}

/// Pick the single file matching `pattern`.
///
/// `*` may cross directory separators, so `*Q4_K_M.gguf` also finds files in subfolders.
pub fn select_matching_file(
    repo_id: &str,
    files: &[String],
    pattern: &str,
) -> Result<String, StorageError> {
    let glob = glob::Pattern::new(pattern).map_err(|source| StorageError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })?;

    let matches: Vec<String> = files
        .iter()
        .filter(|f| glob.matches(f))
        .cloned()
        .collect();

    match matches.len() {
        0 => Err(StorageError::NoMatchingFile {
            repo_id: repo_id.to_string(),
            pattern: pattern.to_string(),
            available: files.to_vec(),
        }),
        1 => Ok(matches[0].clone()),
        _ => Err(StorageError::MultipleMatches {
            repo_id: repo_id.to_string(),
            pattern: pattern.to_string(),
            matches,
        }),
    }
}

fn sanitize_local_filename(filename: &str) -> Result<String, StorageError> {
    let trimmed = filename.trim();
    if trimmed.is_empty() {
        return Err(StorageError::Download("Invalid model filename".to_string()));
    }

    let no_leading = trimmed.trim_start_matches('/');
    let flattened = no_leading.replace('\\', "/").replace('/', "__");

    let mut sanitized = String::with_capacity(flattened.len());
    for ch in flattened.chars() {
        let invalid = matches!(ch, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*');
        if invalid || ch.is_control() {
            sanitized.push('_');
        } else {
            sanitized.push(ch);
        }
    }

    while sanitized.ends_with('.') || sanitized.ends_with(' ') {
        sanitized.pop();
    }

    if sanitized.is_empty() {
        return Err(StorageError::Download("Invalid model filename".to_string()));
    }

    Ok(sanitized)
}

/// Cache location for a repository file
pub fn cached_model_path(
    models_dir: &Path,
    repo_id: &str,
    filename: &str,
) -> Result<PathBuf, StorageError> {
    let repo_dir = sanitize_local_filename(repo_id)?;
    Ok(models_dir.join(repo_dir).join(sanitize_local_filename(filename)?))
}

/// Cached file of `repo_id` matching `pattern`, if exactly one non-empty file does.
///
/// Cached names are flattened, so patterns containing `/` never match here.
pub fn find_cached_model(
    models_dir: &Path,
    repo_id: &str,
    pattern: &str,
) -> Result<Option<PathBuf>, StorageError> {
    let repo_dir = models_dir.join(sanitize_local_filename(repo_id)?);
    if !repo_dir.is_dir() {
        return Ok(None);
    }

    let mut names = Vec::new();
    for entry in fs::read_dir(&repo_dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if !metadata.is_file() || metadata.len() == 0 {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.ends_with(".tmp") {
            names.push(name);
        }
    }

    match select_matching_file(repo_id, &names, pattern) {
        Ok(name) => Ok(Some(repo_dir.join(name))),
        Err(e @ StorageError::InvalidPattern { .. }) => Err(e),
        Err(_) => Ok(None),
    }
}

/// List every file in a repository revision
pub async fn list_repo_files(
    client: &reqwest::Client,
    repo_id: &str,
    revision: &str,
) -> Result<Vec<String>, StorageError> {
    let api_url = format!(
        "{}/api/models/{}/tree/{}?recursive=true",
        endpoint(),
        repo_id,
        revision
    );

    let response = client.get(&api_url).send().await?;
    if !response.status().is_success() {
        return Err(StorageError::Download(format!(
            "Failed to list files of {}: {}",
            repo_id,
            response.status()
        )));
    }

    let entries: Vec<TreeEntry> = response.json().await?;
    Ok(entries
        .into_iter()
        .filter(|e| e.kind == "file")
        .map(|e| e.path)
        .collect())
}

#[derive(Debug, serde::Deserialize)]
struct TreeEntry {
    #[serde(rename = "type")]
    kind: String,
    path: String,
}

/// Fetch the file matching `pattern` from `reference` into `models_dir`.
///
/// A single cached file matching the pattern is reused without contacting the hub.
/// Otherwise the repository is listed and the selected file is downloaded unless a
/// non-empty copy is already cached.
pub async fn fetch_model(
    reference: &str,
    pattern: &str,
    revision: &str,
    models_dir: &Path,
) -> Result<PathBuf, StorageError> {
    let repo = RepoRef::parse(reference)?;
    let revision = repo.revision.as_deref().unwrap_or(revision);
    let pattern = repo.filename.as_deref().unwrap_or(pattern);

    if let Some(cached) = find_cached_model(models_dir, &repo.repo_id, pattern)? {
        tracing::info!("Using cached model: {:?}", cached);
        return Ok(cached);
    }

    let client = build_client()?;
    let files = list_repo_files(&client, &repo.repo_id, revision).await?;
    let filename = select_matching_file(&repo.repo_id, &files, pattern)?;

    let output_path = cached_model_path(models_dir, &repo.repo_id, &filename)?;
    if output_path.exists() {
        let metadata = fs::metadata(&output_path)?;
        if metadata.len() > 0 {
            tracing::info!("Model already exists: {:?}", output_path);
            return Ok(output_path);
        }
    }

    let download_url = format!(
        "{}/{}/resolve/{}/{}",
        endpoint(),
        repo.repo_id,
        revision,
        filename
    );
    download_file(&client, &download_url, &output_path).await?;
    Ok(output_path)
}

/// Blocking wrapper around [`fetch_model`].
///
/// Runs on a private current-thread runtime, so it must not be called from inside
/// an async task.
pub fn fetch_model_blocking(
    reference: &str,
    pattern: &str,
    revision: &str,
    models_dir: &Path,
) -> Result<PathBuf, StorageError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(fetch_model(reference, pattern, revision, models_dir))
}

async fn download_file(
    client: &reqwest::Client,
    url: &str,
    output_path: &Path,
) -> Result<(), StorageError> {
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let temp_path = output_path.with_extension("gguf.tmp");

    tracing::info!("Downloading from: {}", url);
    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(StorageError::Download(format!(
            "Download failed with status: {}",
            response.status()
        )));
    }

    let total_size = response
        .content_length()
        .ok_or_else(|| StorageError::Download("Could not determine file size".to_string()))?;
    tracing::info!("File size: {}", format_size(total_size));

    let mut temp_file = File::create(&temp_path).await?;
    let mut response = response;
    let mut downloaded: u64 = 0;
    let mut last_reported = 0;
    while let Some(chunk) = response.chunk().await? {
        temp_file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;

        let percent = downloaded * 100 / total_size.max(1);
        if percent >= last_reported + 10 {
            last_reported = percent;
            tracing::debug!(
                "Downloaded {} of {} ({}%)",
                format_size(downloaded),
                format_size(total_size),
                percent
            );
        }
    }
    temp_file.flush().await?;

    if downloaded != total_size {
        return Err(StorageError::Download(format!(
            "Download incomplete: got {} bytes, expected {}",
            downloaded, total_size
        )));
    }

    // Rename temp file to final location (atomic operation)
    fs::rename(&temp_path, output_path)?;
    tracing::info!("Download complete: {:?}", output_path);

    Ok(())
}

/// Get a human-readable size string
pub fn format_size(bytes: u64) -> String {
    let bytes = bytes as f64;
    if bytes < 1024.0 {
        format!("{} B", bytes as u64)
    } else if bytes < 1024.0 * 1024.0 {
        format!("{:.2} KB", bytes / 1024.0)
    } else if bytes < 1024.0 * 1024.0 * 1024.0 {
        format!("{:.2} MB", bytes / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_parse_repo_id() {
        let parsed = RepoRef::parse("TheBloke/phi-2-orange-GGUF").unwrap();
        assert_eq!(parsed.repo_id, "TheBloke/phi-2-orange-GGUF");
        assert_eq!(parsed.filename, None);
        assert_eq!(parsed.revision, None);
    }

    #[test]
    fn test_parse_full_url_with_file() {
        let url = "https://huggingface.co/TheBloke/Llama-2-7B-GGUF/blob/dev/llama-2-7b.Q4_K_M.gguf";
        let parsed = RepoRef::parse(url).unwrap();
        assert_eq!(parsed.repo_id, "TheBloke/Llama-2-7B-GGUF");
        assert_eq!(parsed.filename.as_deref(), Some("llama-2-7b.Q4_K_M.gguf"));
        assert_eq!(parsed.revision.as_deref(), Some("dev"));
    }

    #[test]
    fn test_parse_repo_url() {
        let parsed = RepoRef::parse("https://huggingface.co/Qwen/Qwen2-0.5B-Instruct-GGUF/").unwrap();
        assert_eq!(parsed.repo_id, "Qwen/Qwen2-0.5B-Instruct-GGUF");
        assert_eq!(parsed.filename, None);
    }

    #[test]
    fn test_parse_rejects_non_repo() {
        assert!(RepoRef::parse("model.gguf").is_err());
        assert!(RepoRef::parse("/tmp/missing/model.gguf").is_err());
        assert!(RepoRef::parse("owner/").is_err());
    }

    #[test]
    fn test_select_single_match() {
        let available = files(&[
            "README.md",
            "phi-2-orange.Q4_K_M.gguf",
            "phi-2-orange.Q8_0.gguf",
        ]);
        let selected = select_matching_file("r", &available, "*Q4_K_M.gguf").unwrap();
        assert_eq!(selected, "phi-2-orange.Q4_K_M.gguf");
    }

    #[test]
    fn test_select_matches_in_subfolder() {
        let available = files(&["q4/model-Q4_K_M.gguf", "q8/model-Q8_0.gguf"]);
        let selected = select_matching_file("r", &available, "*Q4_K_M.gguf").unwrap();
        assert_eq!(selected, "q4/model-Q4_K_M.gguf");
    }

    #[test]
    fn test_select_is_case_sensitive() {
        let available = files(&["bode-7b.q4_k_m.gguf"]);
        assert!(matches!(
            select_matching_file("r", &available, "*Q4_K_M.gguf"),
            Err(StorageError::NoMatchingFile { .. })
        ));
        assert!(select_matching_file("r", &available, "*q4_k_m.gguf").is_ok());
    }

    #[test]
    fn test_select_no_match_lists_available() {
        let available = files(&["a.gguf", "b.gguf"]);
        match select_matching_file("owner/repo", &available, "*Q4_K_M.gguf") {
            Err(StorageError::NoMatchingFile { available, .. }) => assert_eq!(available.len(), 2),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_select_multiple_matches_is_error() {
        let available = files(&["a-Q4_K_M.gguf", "b-Q4_K_M.gguf"]);
        match select_matching_file("owner/repo", &available, "*Q4_K_M.gguf") {
            Err(StorageError::MultipleMatches { matches, .. }) => assert_eq!(matches.len(), 2),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_select_invalid_pattern() {
        let available = files(&["a.gguf"]);
        assert!(matches!(
            select_matching_file("r", &available, "[*.gguf"),
            Err(StorageError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_cached_model_path() {
        let path =
            cached_model_path(Path::new("/cache"), "Qwen/Qwen2-GGUF", "q4/model.gguf").unwrap();
        assert_eq!(path, PathBuf::from("/cache/Qwen__Qwen2-GGUF/q4__model.gguf"));
    }

    #[test]
    fn test_find_cached_model_skips_listing() {
        let dir = tempfile::tempdir().unwrap();
        let path = cached_model_path(dir.path(), "TheBloke/phi-2-GGUF", "phi-2.Q4_K_M.gguf").unwrap();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"GGUF").unwrap();

        let found = find_cached_model(dir.path(), "TheBloke/phi-2-GGUF", "*Q4_K_M.gguf").unwrap();
        assert_eq!(found, Some(path.clone()));

        // Offline: the cache hit returns before any request is made
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let fetched = rt
            .block_on(fetch_model("TheBloke/phi-2-GGUF", "*Q4_K_M.gguf", "main", dir.path()))
            .unwrap();
        assert_eq!(fetched, path);
    }

    #[test]
    fn test_find_cached_model_ignores_partial_and_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        let repo_dir = dir.path().join("owner__repo");
        fs::create_dir_all(&repo_dir).unwrap();
        fs::write(repo_dir.join("model.Q4_K_M.gguf"), b"").unwrap();
        fs::write(repo_dir.join("other.Q4_K_M.gguf.tmp"), b"partial").unwrap();

        assert_eq!(find_cached_model(dir.path(), "owner/repo", "*Q4_K_M.gguf*").unwrap(), None);
    }

    #[test]
    fn test_find_cached_model_needs_single_match() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(find_cached_model(dir.path(), "owner/repo", "*.gguf").unwrap(), None);

        let repo_dir = dir.path().join("owner__repo");
        fs::create_dir_all(&repo_dir).unwrap();
        fs::write(repo_dir.join("a.Q4_K_M.gguf"), b"GGUF").unwrap();
        fs::write(repo_dir.join("a.Q8_0.gguf"), b"GGUF").unwrap();
        assert_eq!(find_cached_model(dir.path(), "owner/repo", "*.gguf").unwrap(), None);
        assert!(find_cached_model(dir.path(), "owner/repo", "[").is_err());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.00 MB");
    }
}
