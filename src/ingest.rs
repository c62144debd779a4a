//! Ingestion pipeline orchestration.
//!
//! One run acquires a working copy of the repository, discovers candidate
//! files, and for each file extracts features, chunks the text, embeds every
//! chunk and appends it to the store:
//!
//! ```text
//! acquire → discover → per file: read → extract → chunk → per chunk: embed → append
//! ```
//!
//! Failures are isolated at the smallest unit that can absorb them:
//! - a chunk whose embedding (or append) fails is logged and dropped;
//! - a file that cannot be read as UTF-8 counts toward `failed_files`;
//! - a file longer than `max_file_chars` is skipped, counted in neither;
//! - acquisition failure, discovery failure or cancellation fail the run.
//!
//! [`run_ingestion`] never returns an error: the outcome is the final
//! [`IngestionRun`], which is also persisted and published to the
//! [`ProgressSlot`].

use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::chunk::{chunk_text, validate_chunking};
use crate::config::{ChunkingConfig, RepositoryConfig};
use crate::connector_git::{discover_files, redact_url, requires_token, RepositorySource};
use crate::embedding::Embedder;
use crate::error::PreconditionError;
use crate::extract::extract;
use crate::models::{CodeChunk, IngestionRun};
use crate::progress::{IngestProgressEvent, IngestProgressReporter, ProgressSlot};
use crate::store::Store;

/// Per-run overrides of the configured repository and chunking.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct IngestRequest {
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub chunk_size: Option<usize>,
    #[serde(default)]
    pub chunk_overlap: Option<usize>,
}

/// Fully resolved, validated parameters of one run.
#[derive(Debug, Clone)]
pub struct IngestParams {
    pub repository: String,
    pub branch: String,
    pub token: Option<String>,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
    pub max_file_chars: usize,
}

impl IngestParams {
    /// Merge `request` over the configuration and check preconditions.
    pub fn resolve(
        repo: &RepositoryConfig,
        chunking: &ChunkingConfig,
        request: &IngestRequest,
    ) -> Result<Self, PreconditionError> {
        let repository = request
            .repository
            .clone()
            .unwrap_or_else(|| repo.url.clone())
            .trim()
            .to_string();
        if repository.is_empty() {
            return Err(PreconditionError::MissingRepository);
        }

        let token = repo.token.clone().filter(|t| !t.is_empty());
        if token.is_none() && requires_token(&repository) {
            return Err(PreconditionError::MissingCredentials {
                url: redact_url(&repository),
            });
        }

        let chunk_size = request.chunk_size.unwrap_or(chunking.chunk_size);
        let chunk_overlap = request.chunk_overlap.unwrap_or(chunking.chunk_overlap);
        validate_chunking(chunk_size, chunk_overlap)?;

        Ok(Self {
            repository,
            branch: request.branch.clone().unwrap_or_else(|| repo.branch.clone()),
            token,
            chunk_size,
            chunk_overlap,
            include_globs: repo.include_globs.clone(),
            exclude_globs: repo.exclude_globs.clone(),
            max_file_chars: repo.max_file_chars,
        })
    }

    pub fn display_repository(&self) -> String {
        redact_url(&self.repository)
    }
}

/// Collaborators of a run. Cheap to clone into a background task.
#[derive(Clone)]
pub struct IngestDeps {
    pub store: Arc<dyn Store>,
    pub embedder: Arc<Embedder>,
    pub source: Arc<dyn RepositorySource>,
    pub progress: Arc<ProgressSlot>,
    pub reporter: Arc<dyn IngestProgressReporter>,
}

enum FileOutcome {
    Processed { chunks: u64, stored: u64 },
    Skipped { chars: usize },
}

/// Run one ingestion to a terminal state and return the final record.
#[instrument(skip_all, fields(repository = %params.display_repository(), branch = %params.branch))]
pub async fn run_ingestion(
    deps: &IngestDeps,
    params: &IngestParams,
    cancel: CancellationToken,
) -> IngestionRun {
    let started = Instant::now();
    let mut run = IngestionRun::started(&params.display_repository(), &params.branch);
    tracing::info!(run_id = %run.id, "ingestion started");
    publish(deps, &run).await;

    deps.reporter.report(IngestProgressEvent::Acquiring {
        repository: run.repository.clone(),
        branch: run.branch.clone(),
    });

    let acquired = if cancel.is_cancelled() {
        Err(anyhow::anyhow!("ingestion cancelled"))
    } else {
        deps.source
            .acquire(&params.repository, &params.branch, params.token.as_deref())
            .await
    };

    match acquired {
        Ok(snapshot) => {
            match snapshot.head() {
                Some(sha) => run.note(format!("Cloned {} at {}", run.repository, sha)),
                None => run.note(format!("Using working copy of {}", run.repository)),
            }
            let outcome = process_snapshot(deps, params, snapshot.root(), &mut run, &cancel).await;
            match outcome {
                Ok(()) => run.complete(started.elapsed().as_secs_f64()),
                Err(e) => {
                    tracing::warn!(error = %e, "ingestion aborted");
                    run.fail(redact_url(&format!("{:#}", e)));
                }
            }
            // Working copy is removed here.
            drop(snapshot);
        }
        Err(e) => {
            let msg = redact_url(&format!("{:#}", e));
            tracing::warn!(error = %msg, "repository acquisition failed");
            run.fail(msg);
        }
    }

    tracing::info!(
        status = run.status.as_str(),
        processed = run.processed_files,
        failed = run.failed_files,
        skipped = run.skipped_files,
        chunks = run.processed_chunks,
        "ingestion finished"
    );
    deps.reporter.report(IngestProgressEvent::Finished {
        status: run.status,
        processed: run.processed_files,
        failed: run.failed_files,
        skipped: run.skipped_files,
    });
    publish(deps, &run).await;
    run
}

async fn process_snapshot(
    deps: &IngestDeps,
    params: &IngestParams,
    root: &Path,
    run: &mut IngestionRun,
    cancel: &CancellationToken,
) -> Result<()> {
    let files = discover_files(root, &params.include_globs, &params.exclude_globs)
        .with_context(|| "file discovery failed")?;

    run.total_files = files.len() as u64;
    for rel in &files {
        let ext = rel
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_ascii_lowercase()))
            .unwrap_or_else(|| "(none)".to_string());
        *run.file_types.entry(ext).or_insert(0) += 1;
    }
    run.note(format!("Found {} candidate files", files.len()));
    publish(deps, run).await;

    let started = Instant::now();
    let mut model_label: Option<String> = None;

    for (n, rel) in files.iter().enumerate() {
        if cancel.is_cancelled() {
            bail!("ingestion cancelled");
        }

        let rel_str = rel.to_string_lossy().replace('\\', "/");
        match process_file(deps, params, root, rel, &rel_str, &mut model_label, run).await {
            Ok(FileOutcome::Processed { chunks, stored }) => {
                run.processed_files += 1;
                run.total_chunks += chunks;
                run.processed_chunks += stored;
            }
            Ok(FileOutcome::Skipped { chars }) => {
                run.skipped_files += 1;
                tracing::warn!(path = %rel_str, chars, limit = params.max_file_chars, "file too large; skipped");
                run.note(format!("Skipped {} ({} chars)", rel_str, chars));
            }
            Err(e) => {
                run.failed_files += 1;
                tracing::warn!(path = %rel_str, error = %e, "file failed");
                run.errors.push(format!("{}: {:#}", rel_str, e));
            }
        }

        run.files_per_second =
            crate::models::throughput(run.processed_files, started.elapsed().as_secs_f64());
        run.last_updated = Utc::now();
        deps.progress.replace(run.clone());
        deps.reporter.report(IngestProgressEvent::Processing {
            n: n as u64 + 1,
            total: run.total_files,
            chunks: run.processed_chunks,
        });
    }

    Ok(())
}

async fn process_file(
    deps: &IngestDeps,
    params: &IngestParams,
    root: &Path,
    rel: &Path,
    rel_str: &str,
    model_label: &mut Option<String>,
    run: &mut IngestionRun,
) -> Result<FileOutcome> {
    let bytes = tokio::fs::read(root.join(rel))
        .await
        .with_context(|| "read failed")?;
    let content = String::from_utf8(bytes).with_context(|| "not valid UTF-8")?;

    let chars = content.chars().count();
    if chars > params.max_file_chars {
        return Ok(FileOutcome::Skipped { chars });
    }

    let features = extract(&content, rel);
    let windows = chunk_text(&content, params.chunk_size, params.chunk_overlap)?;
    let total = windows.len();

    let mut stored = 0u64;
    for (index, window) in windows.into_iter().enumerate() {
        let embedding = match deps.embedder.embed(&window.text).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(path = %rel_str, chunk = index, error = %e, "chunk embedding failed; dropped");
                continue;
            }
        };

        if model_label.is_none() {
            *model_label = Some(resolve_model_label(deps, run).await);
        }

        let chunk = CodeChunk {
            id: uuid::Uuid::new_v4().to_string(),
            file_path: rel_str.to_string(),
            text: window.text,
            chunk_index: index,
            total_chunks: total,
            language: features.language,
            primary_symbol: features.primary_symbol.clone(),
            primary_container: features.primary_container.clone(),
            imports: features.imports.clone(),
            complexity: features.complexity,
            embedding: Some(embedding),
            embedding_model: model_label.clone(),
            created_at: Utc::now(),
        };

        match deps.store.append_chunk(&chunk).await {
            Ok(()) => stored += 1,
            Err(e) => {
                tracing::warn!(path = %rel_str, chunk = index, error = %e, "chunk append failed; dropped");
            }
        }
    }

    Ok(FileOutcome::Processed {
        chunks: total as u64,
        stored,
    })
}

async fn resolve_model_label(deps: &IngestDeps, run: &mut IngestionRun) -> String {
    match deps.embedder.active_model().await {
        Ok(outcome) => {
            if let Some(reason) = outcome.reason() {
                run.note(format!("Embedding model substituted: {}", reason));
            }
            outcome.into_result().identity
        }
        Err(_) => deps.embedder.configured_identity().to_string(),
    }
}

/// Publish `run` to the progress slot and persist it.
async fn publish(deps: &IngestDeps, run: &IngestionRun) {
    deps.progress.replace(run.clone());
    if let Err(e) = deps.store.save_run(run).await {
        tracing::warn!(run_id = %run.id, error = %e, "failed to persist ingestion run");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo(url: &str, token: Option<&str>) -> RepositoryConfig {
        RepositoryConfig {
            url: url.to_string(),
            token: token.map(str::to_string),
            ..RepositoryConfig::default()
        }
    }

    #[test]
    fn test_resolve_uses_config_defaults() {
        let params = IngestParams::resolve(
            &repo("/srv/repos/ops", None),
            &ChunkingConfig::default(),
            &IngestRequest::default(),
        )
        .unwrap();
        assert_eq!(params.repository, "/srv/repos/ops");
        assert_eq!(params.branch, "main");
        assert_eq!((params.chunk_size, params.chunk_overlap), (1000, 200));
        assert_eq!(params.max_file_chars, 100_000);
    }

    #[test]
    fn test_resolve_applies_overrides() {
        let request = IngestRequest {
            repository: Some("/srv/other".to_string()),
            branch: Some("develop".to_string()),
            chunk_size: Some(50),
            chunk_overlap: Some(10),
        };
        let params =
            IngestParams::resolve(&repo("", None), &ChunkingConfig::default(), &request).unwrap();
        assert_eq!(params.repository, "/srv/other");
        assert_eq!(params.branch, "develop");
        assert_eq!((params.chunk_size, params.chunk_overlap), (50, 10));
    }

    #[test]
    fn test_resolve_missing_repository() {
        let err = IngestParams::resolve(
            &repo("  ", None),
            &ChunkingConfig::default(),
            &IngestRequest::default(),
        )
        .unwrap_err();
        assert_eq!(err, PreconditionError::MissingRepository);
    }

    #[test]
    fn test_resolve_missing_credentials() {
        let err = IngestParams::resolve(
            &repo("https://gitlab.example.com/ops/infra.git", None),
            &ChunkingConfig::default(),
            &IngestRequest::default(),
        )
        .unwrap_err();
        assert!(matches!(err, PreconditionError::MissingCredentials { .. }));

        assert!(IngestParams::resolve(
            &repo("https://gitlab.example.com/ops/infra.git", Some("tok")),
            &ChunkingConfig::default(),
            &IngestRequest::default(),
        )
        .is_ok());
    }

    #[test]
    fn test_resolve_rejects_bad_chunking_override() {
        let request = IngestRequest {
            chunk_size: Some(100),
            chunk_overlap: Some(100),
            ..IngestRequest::default()
        };
        let err = IngestParams::resolve(&repo("/srv/ops", None), &ChunkingConfig::default(), &request)
            .unwrap_err();
        assert_eq!(
            err,
            PreconditionError::InvalidChunking {
                size: 100,
                overlap: 100
            }
        );
    }
}
