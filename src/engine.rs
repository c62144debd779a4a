//! Library facade over the whole pipeline.
//!
//! An [`Engine`] owns every collaborator (configuration, store, embedder,
//! generation backend, repository source and the progress slot) and exposes
//! the operations the CLI and HTTP layers call:
//!
//! | Operation | Behaviour |
//! |-----------|-----------|
//! | [`Engine::start_ingestion`] | validates, spawns a background run, returns at once |
//! | [`Engine::ingestion_status`] | latest snapshot from the progress slot |
//! | [`Engine::search`] | top-k cosine similarity over stored chunks |
//! | [`Engine::suggest`] | never fails; degraded results are flagged |
//!
//! Ingestion is single-flight by contract. Starting a second run while one
//! is in progress is allowed, and the two then race on the progress slot
//! (last writer wins).

use anyhow::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::analytics::{compute_analytics, Analytics};
use crate::config::Config;
use crate::connector_git::{GitCliSource, RepositorySource};
use crate::embedding::Embedder;
use crate::error::PreconditionError;
use crate::generation::{create_generator, GenerationBackend};
use crate::health::HealthChecker;
use crate::ingest::{run_ingestion, IngestDeps, IngestParams, IngestRequest};
use crate::migrate::apply_schema;
use crate::models::{IngestionRun, Outcome, SuggestionRequest, SuggestionResult};
use crate::progress::{IngestProgressReporter, NoProgress, ProgressSlot};
use crate::search::{search, SearchResponse};
use crate::store::{SqliteStore, Store};
use crate::suggest::Assembler;

/// No practical bound; SQLite reads `i64::MAX` as unlimited.
const ALL_RECORDS: usize = i64::MAX as usize;

/// A running background ingestion.
pub struct IngestionHandle {
    pub cancel: CancellationToken,
    pub join: JoinHandle<IngestionRun>,
}

impl IngestionHandle {
    /// Wait for the run to reach a terminal state.
    pub async fn wait(self) -> Result<IngestionRun> {
        Ok(self.join.await?)
    }
}

pub struct Engine {
    config: Config,
    store: Arc<dyn Store>,
    embedder: Arc<Embedder>,
    source: Arc<dyn RepositorySource>,
    progress: Arc<ProgressSlot>,
    reporter: Arc<dyn IngestProgressReporter>,
    assembler: Assembler,
}

impl Engine {
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        embedder: Arc<Embedder>,
        generator: Arc<dyn GenerationBackend>,
        source: Arc<dyn RepositorySource>,
    ) -> Self {
        let assembler = Assembler {
            store: store.clone(),
            embedder: embedder.clone(),
            generator,
            generation: config.generation.clone(),
            retrieval: config.retrieval.clone(),
        };
        Self {
            config,
            store,
            embedder,
            source,
            progress: Arc::new(ProgressSlot::default()),
            reporter: Arc::new(NoProgress),
            assembler,
        }
    }

    /// Production wiring: SQLite store, configured embedder and generator,
    /// `git` CLI acquisition. The last persisted run seeds the status slot.
    pub async fn open(config: Config) -> Result<Self> {
        let store = SqliteStore::open(&config).await?;
        apply_schema(store.pool()).await?;
        let embedder = Embedder::from_config(&config.embedding)?;
        let generator = create_generator(&config.generation)?;

        let engine = Self::new(
            config,
            Arc::new(store),
            Arc::new(embedder),
            generator,
            Arc::new(GitCliSource),
        );
        engine.restore_progress().await;
        Ok(engine)
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn IngestProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    /// Seed the progress slot from the store. A run that never reached a
    /// terminal state belonged to a process that is gone.
    pub async fn restore_progress(&self) {
        match self.store.latest_run().await {
            Ok(Some(mut run)) => {
                if !run.status.is_terminal() {
                    run.fail("interrupted before completion");
                }
                self.progress.replace(run);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "could not load last ingestion run"),
        }
    }

    /// Validate `request` and spawn a background run.
    ///
    /// Preconditions are checked before anything is spawned; once this
    /// returns `Ok` the outcome is reported only through the run record.
    pub fn start_ingestion(
        &self,
        request: IngestRequest,
    ) -> Result<IngestionHandle, PreconditionError> {
        let params =
            IngestParams::resolve(&self.config.repository, &self.config.chunking, &request)?;
        let deps = IngestDeps {
            store: self.store.clone(),
            embedder: self.embedder.clone(),
            source: self.source.clone(),
            progress: self.progress.clone(),
            reporter: self.reporter.clone(),
        };

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let join = tokio::spawn(async move { run_ingestion(&deps, &params, token).await });
        Ok(IngestionHandle { cancel, join })
    }

    pub fn ingestion_status(&self) -> IngestionRun {
        self.progress.current().as_ref().clone()
    }

    pub async fn search(&self, query: &str, limit: usize) -> Result<SearchResponse> {
        search(
            self.store.as_ref(),
            &self.embedder,
            query,
            limit,
            self.config.retrieval.candidate_cap,
        )
        .await
    }

    pub async fn suggest(&self, request: &SuggestionRequest) -> Outcome<SuggestionResult> {
        self.assembler.assemble(request).await
    }

    pub async fn suggestions(&self, limit: usize) -> Result<Vec<SuggestionResult>> {
        self.store.list_suggestions(limit).await
    }

    pub async fn analytics(&self) -> Result<Analytics> {
        let all = self.store.list_suggestions(ALL_RECORDS).await?;
        Ok(compute_analytics(&all))
    }

    pub fn health(&self) -> Result<HealthChecker> {
        HealthChecker::new(self.config.clone(), self.store.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::connector_git::LocalDirSource;
    use crate::generation::DisabledGenerator;
    use crate::models::RunStatus;
    use crate::store::InMemoryStore;

    fn engine(extra: &str) -> Engine {
        let config = parse_config(&format!("[db]\npath = \"unused.sqlite\"\n{}", extra)).unwrap();
        let embedder = Embedder::from_config(&config.embedding).unwrap();
        Engine::new(
            config,
            Arc::new(InMemoryStore::new()),
            Arc::new(embedder),
            Arc::new(DisabledGenerator),
            Arc::new(LocalDirSource),
        )
    }

    #[tokio::test]
    async fn test_status_before_any_run() {
        let e = engine("");
        assert_eq!(e.ingestion_status().status, RunStatus::NotStarted);
    }

    #[tokio::test]
    async fn test_start_rejects_missing_repository() {
        let e = engine("");
        let err = e.start_ingestion(IngestRequest::default()).err().unwrap();
        assert_eq!(err, PreconditionError::MissingRepository);
        assert_eq!(e.ingestion_status().status, RunStatus::NotStarted);
    }

    #[tokio::test]
    async fn test_restore_marks_interrupted_run_failed() {
        let e = engine("");
        e.store
            .save_run(&IngestionRun::started("/srv/ops", "main"))
            .await
            .unwrap();
        e.restore_progress().await;
        let status = e.ingestion_status();
        assert_eq!(status.status, RunStatus::Failed);
        assert_eq!(status.repository, "/srv/ops");
    }

    #[tokio::test]
    async fn test_suggest_with_disabled_generator_is_degraded() {
        let e = engine("[generation]\nprovider = \"disabled\"\n");
        let outcome = e
            .suggest(&SuggestionRequest {
                ticket_id: "OPS-1".to_string(),
                summary: "restart nginx".to_string(),
                ..SuggestionRequest::default()
            })
            .await;
        assert!(outcome.is_degraded());
        let analytics = e.analytics().await.unwrap();
        assert_eq!(analytics.total_suggestions, 1);
    }
}
