use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub integrations: IntegrationsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RepositoryConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Access token embedded into the clone URL as `scheme://token@host/...`.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    /// Files longer than this many characters are skipped, not failed.
    #[serde(default = "default_max_file_chars")]
    pub max_file_chars: usize,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            branch: default_branch(),
            token: None,
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            max_file_chars: default_max_file_chars(),
        }
    }
}

fn default_branch() -> String {
    "main".to_string()
}
fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.py".to_string(),
        "**/*.yml".to_string(),
        "**/*.yaml".to_string(),
    ]
}
fn default_max_file_chars() -> usize {
    100_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the `ollama` provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            timeout_secs: default_embedding_timeout(),
        }
    }
}

fn default_embedding_provider() -> String {
    "hash".to_string()
}
fn default_embedding_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default = "default_ollama_url")]
    pub url: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            url: default_ollama_url(),
            model: default_generation_model(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_tokens: None,
            timeout_secs: default_generation_timeout(),
        }
    }
}

fn default_generation_provider() -> String {
    "ollama".to_string()
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_generation_model() -> String {
    "codellama".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_top_p() -> f32 {
    0.9
}
fn default_generation_timeout() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Upper bound on embedded chunks loaded per query.
    #[serde(default = "default_candidate_cap")]
    pub candidate_cap: usize,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default = "default_context_matches")]
    pub context_matches: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            candidate_cap: default_candidate_cap(),
            top_n: default_top_n(),
            context_matches: default_context_matches(),
        }
    }
}

fn default_candidate_cap() -> usize {
    1000
}
fn default_top_n() -> usize {
    5
}
fn default_context_matches() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8001".to_string()
}

/// Credentials for the external services probed by `tsg health`.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct IntegrationsConfig {
    pub gitlab_url: Option<String>,
    pub gitlab_token: Option<String>,
    pub jira_url: Option<String>,
    pub jira_username: Option<String>,
    pub jira_token: Option<String>,
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

/// Parse and validate a configuration document.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!(
            "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
            config.chunking.chunk_overlap,
            config.chunking.chunk_size
        );
    }

    if config.repository.max_file_chars == 0 {
        anyhow::bail!("repository.max_file_chars must be > 0");
    }

    // Validate retrieval
    if config.retrieval.candidate_cap < 1 {
        anyhow::bail!("retrieval.candidate_cap must be >= 1");
    }
    if config.retrieval.top_n < 1 {
        anyhow::bail!("retrieval.top_n must be >= 1");
    }
    if config.retrieval.context_matches < 1 {
        anyhow::bail!("retrieval.context_matches must be >= 1");
    }

    match config.embedding.provider.as_str() {
        "hash" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be hash, ollama, or local.",
            other
        ),
    }
    if config.embedding.dims == Some(0) {
        anyhow::bail!("embedding.dims must be > 0");
    }

    match config.generation.provider.as_str() {
        "ollama" | "disabled" => {}
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be ollama or disabled.",
            other
        ),
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config("[db]\npath = \"./data/tsg.sqlite\"\n").unwrap();
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.chunk_overlap, 200);
        assert_eq!(config.repository.branch, "main");
        assert_eq!(config.repository.max_file_chars, 100_000);
        assert_eq!(config.retrieval.candidate_cap, 1000);
        assert_eq!(config.retrieval.top_n, 5);
        assert_eq!(config.retrieval.context_matches, 3);
        assert_eq!(config.embedding.provider, "hash");
        assert_eq!(config.generation.model, "codellama");
        assert!(config.generation.is_enabled());
    }

    #[test]
    fn test_example_config_parses() {
        let config = parse_config(include_str!("../config/tsg.example.toml")).unwrap();
        assert_eq!(config.embedding.provider, "local");
        assert_eq!(config.repository.exclude_globs, vec!["**/tests/**"]);
        assert!(config.integrations.gitlab_token.is_none());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let err = parse_config(
            "[db]\npath = \"x.sqlite\"\n[chunking]\nchunk_size = 100\nchunk_overlap = 100\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn test_unknown_embedding_provider_rejected() {
        let err = parse_config("[db]\npath = \"x.sqlite\"\n[embedding]\nprovider = \"magic\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn test_unknown_generation_provider_rejected() {
        let err = parse_config("[db]\npath = \"x.sqlite\"\n[generation]\nprovider = \"gpt\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("Unknown generation provider"));
    }
}
