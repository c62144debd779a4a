//! Core data models used throughout the suggestion pipeline.
//!
//! These types represent the chunks, ingestion runs, similarity matches and
//! suggestion records that flow between ingestion and retrieval.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Source language detected from a file's suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Yaml,
    Unknown,
}

impl Language {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("py") => Language::Python,
            Some("yml") | Some("yaml") => Language::Yaml,
            _ => Language::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Yaml => "yaml",
            Language::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "python" => Language::Python,
            "yaml" => Language::Yaml,
            _ => Language::Unknown,
        }
    }
}

/// Metadata derived from a file's text by [`crate::extract`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileFeatures {
    pub language: Language,
    pub primary_symbol: Option<String>,
    pub primary_container: Option<String>,
    /// Imported modules in order of appearance; duplicates are kept.
    pub imports: Vec<String>,
    pub complexity: f64,
}

impl FileFeatures {
    /// Unknown language, no symbols, complexity 1.0.
    pub fn baseline() -> Self {
        Self::empty(Language::Unknown)
    }

    pub fn empty(language: Language) -> Self {
        Self {
            language,
            primary_symbol: None,
            primary_container: None,
            imports: Vec::new(),
            complexity: 1.0,
        }
    }
}

/// A window of a source file, the unit of embedding and retrieval.
///
/// Immutable once persisted. `chunk_index < total_chunks` always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeChunk {
    pub id: String,
    pub file_path: String,
    pub text: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub language: Language,
    pub primary_symbol: Option<String>,
    pub primary_container: Option<String>,
    pub imports: Vec<String>,
    pub complexity: f64,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    pub embedding_model: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    NotStarted,
    InProgress,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::NotStarted => "not_started",
            RunStatus::InProgress => "in_progress",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

/// Progress and result record of one ingestion run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionRun {
    pub id: String,
    pub status: RunStatus,
    pub repository: String,
    pub branch: String,
    pub total_files: u64,
    pub processed_files: u64,
    pub failed_files: u64,
    pub skipped_files: u64,
    pub total_chunks: u64,
    pub processed_chunks: u64,
    pub files_per_second: f64,
    /// Candidate files per extension (`.py`, `.yml`, ...).
    pub file_types: BTreeMap<String, u64>,
    pub details: Vec<String>,
    pub errors: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl IngestionRun {
    pub fn not_started() -> Self {
        Self {
            id: String::new(),
            status: RunStatus::NotStarted,
            repository: String::new(),
            branch: String::new(),
            total_files: 0,
            processed_files: 0,
            failed_files: 0,
            skipped_files: 0,
            total_chunks: 0,
            processed_chunks: 0,
            files_per_second: 0.0,
            file_types: BTreeMap::new(),
            details: vec!["No ingestion has been performed yet".to_string()],
            errors: Vec::new(),
            started_at: None,
            last_updated: Utc::now(),
            completed_at: None,
        }
    }

    pub fn started(repository: &str, branch: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            status: RunStatus::InProgress,
            repository: repository.to_string(),
            branch: branch.to_string(),
            details: vec![format!("Ingestion of {} ({}) started", repository, branch)],
            started_at: Some(now),
            last_updated: now,
            ..Self::not_started()
        }
    }

    pub fn note(&mut self, detail: impl Into<String>) {
        self.details.push(detail.into());
        self.last_updated = Utc::now();
    }

    pub fn complete(&mut self, elapsed_secs: f64) {
        self.files_per_second = throughput(self.processed_files, elapsed_secs);
        self.status = RunStatus::Completed;
        self.details.push(format!(
            "Completed: {} files, {} chunks in {:.2}s",
            self.processed_files, self.processed_chunks, elapsed_secs
        ));
        self.finish();
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = RunStatus::Failed;
        self.errors.push(error.into());
        self.finish();
    }

    fn finish(&mut self) {
        let now = Utc::now();
        self.last_updated = now;
        self.completed_at = Some(now);
    }
}

/// Files per second; zero when no time has elapsed.
pub fn throughput(processed_files: u64, elapsed_secs: f64) -> f64 {
    if elapsed_secs > 0.0 {
        processed_files as f64 / elapsed_secs
    } else {
        0.0
    }
}

/// A stored chunk scored against a query. Never persisted on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityMatch {
    pub chunk: CodeChunk,
    /// Cosine similarity in `[-1, 1]`.
    pub score: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuggestionRequest {
    pub ticket_id: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub description: String,
    /// Generation model override for this request.
    #[serde(default)]
    pub model: Option<String>,
}

/// Audit record of one suggestion. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionResult {
    pub id: String,
    pub ticket_id: String,
    pub summary: String,
    pub description: String,
    pub matches: Vec<SimilarityMatch>,
    pub prompt: String,
    pub suggested_code: String,
    pub file_path: String,
    pub explanation: String,
    /// In `[0, 1]`.
    pub confidence_score: f64,
    pub model_used: String,
    pub processing_time_secs: f64,
    /// Set when the result is a fallback stub.
    pub degraded_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A result that is either genuine or a degraded stand-in.
///
/// Both variants carry a well-formed value; `Degraded` also says why.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Ok(T),
    Degraded { result: T, reason: String },
}

impl<T> Outcome<T> {
    pub fn result(&self) -> &T {
        match self {
            Outcome::Ok(r) => r,
            Outcome::Degraded { result, .. } => result,
        }
    }

    pub fn into_result(self) -> T {
        match self {
            Outcome::Ok(r) => r,
            Outcome::Degraded { result, .. } => result,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Outcome::Degraded { .. })
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Outcome::Ok(_) => None,
            Outcome::Degraded { reason, .. } => Some(reason),
        }
    }
}
