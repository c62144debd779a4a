use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use tokio::sync::RwLock;

use super::Store;
use crate::models::{CodeChunk, IngestionRun, SuggestionResult};

#[derive(Default)]
pub struct InMemoryStore {
    chunks: RwLock<Chunks>,
    runs: RwLock<Vec<IngestionRun>>,
    suggestions: RwLock<Vec<SuggestionResult>>,
}

/// Chunks in insertion order plus an index of their ids.
#[derive(Default)]
struct Chunks {
    ordered: Vec<CodeChunk>,
    ids: HashSet<String>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored chunk, embedded or not, in insertion order.
    pub async fn all_chunks(&self) -> Vec<CodeChunk> {
        self.chunks.read().await.ordered.clone()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn append_chunk(&self, chunk: &CodeChunk) -> Result<()> {
        let mut chunks = self.chunks.write().await;
        if !chunks.ids.insert(chunk.id.clone()) {
            bail!("duplicate chunk id: {}", chunk.id);
        }
        chunks.ordered.push(chunk.clone());
        Ok(())
    }

    async fn embedded_chunks(&self, limit: usize) -> Result<Vec<CodeChunk>> {
        Ok(self
            .chunks
            .read()
            .await
            .ordered
            .iter()
            .filter(|c| c.embedding.is_some())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn chunk_count(&self) -> Result<u64> {
        Ok(self.chunks.read().await.ordered.len() as u64)
    }

    async fn save_run(&self, run: &IngestionRun) -> Result<()> {
        self.runs.write().await.push(run.clone());
        Ok(())
    }

    async fn latest_run(&self) -> Result<Option<IngestionRun>> {
        Ok(self.runs.read().await.last().cloned())
    }

    async fn list_runs(&self, limit: usize) -> Result<Vec<IngestionRun>> {
        Ok(self.runs.read().await.iter().rev().take(limit).cloned().collect())
    }

    async fn save_suggestion(&self, result: &SuggestionResult) -> Result<()> {
        self.suggestions.write().await.push(result.clone());
        Ok(())
    }

    async fn list_suggestions(&self, limit: usize) -> Result<Vec<SuggestionResult>> {
        Ok(self
            .suggestions
            .read()
            .await
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
