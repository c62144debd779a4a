//! Persistence seam for chunks, ingestion runs and suggestion audit records.
//!
//! The pipeline only ever appends chunks and reads them back; there is no
//! update or delete operation. Runs are kept as history: `save_run` appends
//! a snapshot and `latest_run` returns the most recent one.
//!
//! Two implementations ship with the crate:
//!
//! | Store | Backing |
//! |-------|---------|
//! | [`SqliteStore`] | SQLite file (WAL), schema from [`crate::migrate`] |
//! | [`InMemoryStore`] | process memory; tests and embedding in other programs |

mod memory;
mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{CodeChunk, IngestionRun, SuggestionResult};

#[async_trait]
pub trait Store: Send + Sync {
    /// Append one chunk. Chunk ids are unique.
    async fn append_chunk(&self, chunk: &CodeChunk) -> Result<()>;

    /// Up to `limit` chunks that carry an embedding, in insertion order.
    async fn embedded_chunks(&self, limit: usize) -> Result<Vec<CodeChunk>>;

    async fn chunk_count(&self) -> Result<u64>;

    async fn save_run(&self, run: &IngestionRun) -> Result<()>;

    async fn latest_run(&self) -> Result<Option<IngestionRun>>;

    /// Most recent snapshots first.
    async fn list_runs(&self, limit: usize) -> Result<Vec<IngestionRun>>;

    async fn save_suggestion(&self, result: &SuggestionResult) -> Result<()>;

    /// Most recent first.
    async fn list_suggestions(&self, limit: usize) -> Result<Vec<SuggestionResult>>;

    /// Cheap liveness check used by health reporting.
    async fn ping(&self) -> Result<()>;
}
