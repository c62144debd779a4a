//! End-to-end pipeline tests: ingestion from a local directory into the
//! in-memory store, similarity search and suggestion assembly. No network.

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use ticket_suggest::config::{ChunkingConfig, EmbeddingConfig, RepositoryConfig};
use ticket_suggest::connector_git::LocalDirSource;
use ticket_suggest::embedding::{Embedder, EmbeddingModel, ModelLoader};
use ticket_suggest::generation::{DisabledGenerator, GenerationBackend, GenerationError, GenerationRequest};
use ticket_suggest::ingest::{run_ingestion, IngestDeps, IngestParams, IngestRequest};
use ticket_suggest::models::{RunStatus, SuggestionRequest};
use ticket_suggest::progress::{NoProgress, ProgressSlot};
use ticket_suggest::search::search;
use ticket_suggest::store::{InMemoryStore, Store};
use ticket_suggest::suggest::{Assembler, FALLBACK_CONFIDENCE, FALLBACK_MODEL, NO_MATCH_CONFIDENCE};

struct Canned(&'static str);

#[async_trait]
impl GenerationBackend for Canned {
    async fn generate(&self, _request: &GenerationRequest) -> Result<String, GenerationError> {
        Ok(self.0.to_string())
    }
}

/// Embeds every text except those containing `marker`.
struct RejectsMarker {
    marker: &'static str,
}

#[async_trait]
impl EmbeddingModel for RejectsMarker {
    fn model_name(&self) -> &str {
        "rejects-marker"
    }
    fn dims(&self) -> usize {
        4
    }
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        if text.contains(self.marker) {
            anyhow::bail!("cannot embed text containing {}", self.marker);
        }
        Ok(vec![1.0, 0.0, 0.0, text.len() as f32])
    }
}

struct RejectsMarkerLoader;

#[async_trait]
impl ModelLoader for RejectsMarkerLoader {
    async fn load(&self, _identity: &str) -> anyhow::Result<Box<dyn EmbeddingModel>> {
        Ok(Box::new(RejectsMarker { marker: "BROKEN" }))
    }
}

/// Loader whose backend is unreachable; counts attempts.
#[derive(Default)]
struct UnreachableLoader {
    attempts: AtomicUsize,
}

#[async_trait]
impl ModelLoader for UnreachableLoader {
    async fn load(&self, identity: &str) -> anyhow::Result<Box<dyn EmbeddingModel>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("connection refused loading {}", identity)
    }
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn embedder() -> Arc<Embedder> {
    Arc::new(Embedder::from_config(&EmbeddingConfig::default()).unwrap())
}

fn deps(store: Arc<InMemoryStore>) -> IngestDeps {
    IngestDeps {
        store,
        embedder: embedder(),
        source: Arc::new(LocalDirSource),
        progress: Arc::new(ProgressSlot::default()),
        reporter: Arc::new(NoProgress),
    }
}

fn params(root: &Path, max_file_chars: usize) -> IngestParams {
    let repo = RepositoryConfig {
        url: root.display().to_string(),
        max_file_chars,
        ..RepositoryConfig::default()
    };
    IngestParams::resolve(&repo, &ChunkingConfig::default(), &IngestRequest::default()).unwrap()
}

fn assembler(store: Arc<InMemoryStore>, generator: Arc<dyn GenerationBackend>) -> Assembler {
    Assembler {
        store,
        embedder: embedder(),
        generator,
        generation: Default::default(),
        retrieval: Default::default(),
    }
}

#[tokio::test]
async fn oversize_file_is_skipped_not_failed() {
    let dir = tempfile::tempdir().unwrap();
    for i in 0..9 {
        write(
            dir.path(),
            &format!("modules/mod_{}.py", i),
            &format!("import os\n\ndef task_{i}():\n    return os.getcwd()\n"),
        );
    }
    write(dir.path(), "modules/huge.py", &"x = 1\n".repeat(100));

    let store = Arc::new(InMemoryStore::new());
    let deps = deps(store.clone());
    let run = run_ingestion(&deps, &params(dir.path(), 500), CancellationToken::new()).await;

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.total_files, 10);
    assert_eq!(run.processed_files, 9);
    assert_eq!(run.failed_files, 0);
    assert_eq!(run.skipped_files, 1);
    assert_eq!(run.processed_chunks, 9);
    assert_eq!(run.file_types.get(".py"), Some(&10));
    assert_eq!(store.chunk_count().await.unwrap(), 9);

    // The slot and the store both hold the final record.
    assert_eq!(deps.progress.current().status, RunStatus::Completed);
    let saved = store.latest_run().await.unwrap().unwrap();
    assert_eq!(saved.id, run.id);
}

#[tokio::test]
async fn chunk_embedding_failure_drops_only_that_chunk() {
    let dir = tempfile::tempdir().unwrap();
    // Three 10-char windows with no overlap; the middle one cannot be embedded.
    write(dir.path(), "jobs.py", "aaaaaaaaa\nBROKEN___\ncccccccc\n");

    let store = Arc::new(InMemoryStore::new());
    let deps = IngestDeps {
        embedder: Arc::new(Embedder::new(
            Arc::new(RejectsMarkerLoader),
            "rejects-marker",
            "rejects-marker",
        )),
        ..deps(store.clone())
    };
    let repo = RepositoryConfig {
        url: dir.path().display().to_string(),
        ..RepositoryConfig::default()
    };
    let request = IngestRequest {
        chunk_size: Some(10),
        chunk_overlap: Some(0),
        ..IngestRequest::default()
    };
    let params = IngestParams::resolve(&repo, &ChunkingConfig::default(), &request).unwrap();

    let run = run_ingestion(&deps, &params, CancellationToken::new()).await;

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.processed_files, 1);
    assert_eq!(run.failed_files, 0);
    assert_eq!(run.total_chunks, 3);
    assert_eq!(run.processed_chunks, 2);

    let kept: Vec<(usize, usize)> = store
        .all_chunks()
        .await
        .iter()
        .map(|c| (c.chunk_index, c.total_chunks))
        .collect();
    assert_eq!(kept, vec![(0, 3), (2, 3)]);
}

#[tokio::test]
async fn unreachable_embedding_backend_is_loaded_once_per_run() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "big.py", &"x = 1\n".repeat(20));

    let loader = Arc::new(UnreachableLoader::default());
    let store = Arc::new(InMemoryStore::new());
    let deps = IngestDeps {
        embedder: Arc::new(Embedder::new(loader.clone(), "custom-embed", "nomic-embed-text")),
        ..deps(store.clone())
    };
    let repo = RepositoryConfig {
        url: dir.path().display().to_string(),
        ..RepositoryConfig::default()
    };
    let request = IngestRequest {
        chunk_size: Some(10),
        chunk_overlap: Some(0),
        ..IngestRequest::default()
    };
    let params = IngestParams::resolve(&repo, &ChunkingConfig::default(), &request).unwrap();

    let run = run_ingestion(&deps, &params, CancellationToken::new()).await;

    assert_eq!(run.total_chunks, 12);
    assert_eq!(run.processed_chunks, 0);
    assert_eq!(store.chunk_count().await.unwrap(), 0);
    // configured identity, then the fallback; never again for later chunks
    assert_eq!(loader.attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn undecodable_file_counts_as_failed() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "ok.py", "def ok():\n    pass\n");
    std::fs::write(dir.path().join("bad.py"), [0xff, 0xfe, 0x00, 0x41]).unwrap();

    let store = Arc::new(InMemoryStore::new());
    let run = run_ingestion(&deps(store.clone()), &params(dir.path(), 100_000), CancellationToken::new()).await;

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.processed_files, 1);
    assert_eq!(run.failed_files, 1);
    assert_eq!(run.errors.len(), 1);
    assert!(run.errors[0].starts_with("bad.py"));
}

#[tokio::test]
async fn chunks_carry_last_defined_symbol() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "tools/cleanup.py",
        "import shutil\n\ndef a():\n    pass\n\ndef b():\n    if True:\n        shutil.rmtree('/tmp/x')\n",
    );
    write(
        dir.path(),
        "site.yml",
        "- name: Configure web\n  hosts: web\n  tasks:\n    - name: Restart nginx\n      service:\n        name: nginx\n        state: restarted\n",
    );

    let store = Arc::new(InMemoryStore::new());
    let run = run_ingestion(&deps(store.clone()), &params(dir.path(), 100_000), CancellationToken::new()).await;
    assert_eq!(run.processed_files, 2);

    let chunks = store.all_chunks().await;
    let py = chunks.iter().find(|c| c.file_path == "tools/cleanup.py").unwrap();
    assert_eq!(py.primary_symbol.as_deref(), Some("b"));
    assert_eq!(py.imports, vec!["shutil".to_string()]);
    assert_eq!(py.complexity, 2.0);
    assert_eq!(py.embedding_model.as_deref(), Some("hash"));

    let yml = chunks.iter().find(|c| c.file_path == "site.yml").unwrap();
    assert_eq!(yml.primary_container.as_deref(), Some("Configure web"));
    assert_eq!(yml.primary_symbol.as_deref(), Some("Restart nginx"));
}

#[tokio::test]
async fn cancelled_run_fails_without_chunks() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.py", "def a():\n    pass\n");

    let cancel = CancellationToken::new();
    cancel.cancel();
    let store = Arc::new(InMemoryStore::new());
    let run = run_ingestion(&deps(store.clone()), &params(dir.path(), 100_000), cancel).await;

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.errors, vec!["ingestion cancelled".to_string()]);
    assert_eq!(store.chunk_count().await.unwrap(), 0);
}

#[tokio::test]
async fn missing_directory_fails_the_run() {
    let store = Arc::new(InMemoryStore::new());
    let run = run_ingestion(
        &deps(store),
        &params(Path::new("/nonexistent/tsg-repo"), 100_000),
        CancellationToken::new(),
    )
    .await;
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.processed_files, 0);
    assert!(run.completed_at.is_some());
}

#[tokio::test]
async fn query_equal_to_chunk_text_ranks_first_with_max_score() {
    let dir = tempfile::tempdir().unwrap();
    let target = "def rotate_logs():\n    compress('/var/log/app.log')\n";
    write(dir.path(), "logs.py", target);
    write(dir.path(), "net.py", "def open_port(port):\n    firewall.allow(port)\n");
    write(dir.path(), "db.py", "def backup_database():\n    dump('postgres')\n");

    let store = Arc::new(InMemoryStore::new());
    let deps = deps(store.clone());
    run_ingestion(&deps, &params(dir.path(), 100_000), CancellationToken::new()).await;

    let response = search(store.as_ref(), &deps.embedder, target, 3, 1000).await.unwrap();
    assert_eq!(response.considered, 3);
    assert!(!response.capped);
    assert_eq!(response.matches[0].chunk.file_path, "logs.py");
    assert!((response.matches[0].score - 1.0).abs() < 1e-5);
    for pair in response.matches.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }

    let capped = search(store.as_ref(), &deps.embedder, target, 3, 2).await.unwrap();
    assert!(capped.capped);
    assert_eq!(capped.considered, 2);
}

#[tokio::test]
async fn disabled_generation_falls_back() {
    let store = Arc::new(InMemoryStore::new());
    let outcome = assembler(store.clone(), Arc::new(DisabledGenerator))
        .assemble(&SuggestionRequest {
            ticket_id: "INFRA-42".to_string(),
            summary: "Rotate logs".to_string(),
            description: "Logs fill the disk".to_string(),
            model: None,
        })
        .await;

    assert!(outcome.is_degraded());
    let result = outcome.into_result();
    assert_eq!(result.confidence_score, FALLBACK_CONFIDENCE);
    assert_eq!(result.model_used, FALLBACK_MODEL);
    assert_eq!(result.file_path, "modules/custom_module_infra-42.py");
    assert!(result.suggested_code.contains("def fix_infra_42()"));
    assert_eq!(store.list_suggestions(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn empty_store_generation_uses_no_match_confidence() {
    let store = Arc::new(InMemoryStore::new());
    let outcome = assembler(store.clone(), Arc::new(Canned("```python\nprint('ok')\n```\nDone.")))
        .assemble(&SuggestionRequest {
            ticket_id: "OPS-1".to_string(),
            summary: "print ok".to_string(),
            description: String::new(),
            model: Some("codellama:13b".to_string()),
        })
        .await;

    assert!(!outcome.is_degraded());
    let result = outcome.into_result();
    assert_eq!(result.confidence_score, NO_MATCH_CONFIDENCE);
    assert_eq!(result.model_used, "codellama:13b");
    assert_eq!(result.suggested_code, "print('ok')");
    assert_eq!(result.explanation, "Done.");
    assert_eq!(result.file_path, "");
}

#[tokio::test]
async fn generated_suggestion_points_at_best_match() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "roles/nginx/tasks/main.yml", "- name: Restart nginx\n  service:\n    name: nginx\n    state: restarted\n");
    write(dir.path(), "modules/db.py", "def backup_database():\n    dump('postgres')\n");

    let store = Arc::new(InMemoryStore::new());
    run_ingestion(&deps(store.clone()), &params(dir.path(), 100_000), CancellationToken::new()).await;

    let outcome = assembler(store.clone(), Arc::new(Canned("service: nginx")))
        .assemble(&SuggestionRequest {
            ticket_id: "WEB-3".to_string(),
            summary: "Restart nginx".to_string(),
            description: "nginx service must be restarted".to_string(),
            model: None,
        })
        .await;

    let result = outcome.into_result();
    assert_eq!(result.file_path, "roles/nginx/tasks/main.yml");
    assert!(result.confidence_score > 0.0 && result.confidence_score <= 0.9);
    assert!(result.prompt.contains("roles/nginx/tasks/main.yml"));
    assert_eq!(result.model_used, "codellama");
}
