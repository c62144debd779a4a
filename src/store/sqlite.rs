use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::Store;
use crate::config::Config;
use crate::db;
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::models::{CodeChunk, IngestionRun, Language, SuggestionResult};

/// SQLite-backed [`Store`]. Expects the schema from
/// [`crate::migrate::apply_schema`].
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn open(config: &Config) -> Result<Self> {
        Ok(Self::new(db::connect(config).await?))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

fn chunk_from_row(row: &SqliteRow) -> Result<CodeChunk> {
    let imports_json: String = row.get("imports_json");
    let language: String = row.get("language");
    let chunk_index: i64 = row.get("chunk_index");
    let total_chunks: i64 = row.get("total_chunks");
    let blob: Option<Vec<u8>> = row.get("embedding");

    Ok(CodeChunk {
        id: row.get("id"),
        file_path: row.get("file_path"),
        text: row.get("text"),
        chunk_index: chunk_index as usize,
        total_chunks: total_chunks as usize,
        language: Language::parse(&language),
        primary_symbol: row.get("primary_symbol"),
        primary_container: row.get("primary_container"),
        imports: serde_json::from_str(&imports_json)
            .with_context(|| "Invalid imports_json in code_chunks")?,
        complexity: row.get("complexity"),
        embedding: blob.map(|b| blob_to_vec(&b)),
        embedding_model: row.get("embedding_model"),
        created_at: timestamp(row.get("created_at")),
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn append_chunk(&self, chunk: &CodeChunk) -> Result<()> {
        let imports_json = serde_json::to_string(&chunk.imports)?;
        let blob = chunk.embedding.as_deref().map(vec_to_blob);
        let dims = chunk.embedding.as_ref().map(|v| v.len() as i64);

        sqlx::query(
            r#"
            INSERT INTO code_chunks (id, file_path, chunk_index, total_chunks, text, language,
                primary_symbol, primary_container, imports_json, complexity,
                embedding, embedding_model, dims, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.file_path)
        .bind(chunk.chunk_index as i64)
        .bind(chunk.total_chunks as i64)
        .bind(&chunk.text)
        .bind(chunk.language.as_str())
        .bind(&chunk.primary_symbol)
        .bind(&chunk.primary_container)
        .bind(&imports_json)
        .bind(chunk.complexity)
        .bind(blob)
        .bind(&chunk.embedding_model)
        .bind(dims)
        .bind(chunk.created_at.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn embedded_chunks(&self, limit: usize) -> Result<Vec<CodeChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT id, file_path, chunk_index, total_chunks, text, language,
                   primary_symbol, primary_container, imports_json, complexity,
                   embedding, embedding_model, created_at
            FROM code_chunks
            WHERE embedding IS NOT NULL
            ORDER BY seq ASC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(chunk_from_row).collect()
    }

    async fn chunk_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM code_chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn save_run(&self, run: &IngestionRun) -> Result<()> {
        sqlx::query(
            "INSERT INTO ingestion_runs (id, status, payload_json, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&run.id)
        .bind(run.status.as_str())
        .bind(serde_json::to_string(run)?)
        .bind(run.last_updated.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_run(&self) -> Result<Option<IngestionRun>> {
        Ok(self.list_runs(1).await?.into_iter().next())
    }

    async fn list_runs(&self, limit: usize) -> Result<Vec<IngestionRun>> {
        let payloads: Vec<String> = sqlx::query_scalar(
            "SELECT payload_json FROM ingestion_runs ORDER BY seq DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        payloads
            .iter()
            .map(|p| serde_json::from_str(p).with_context(|| "Invalid ingestion run payload"))
            .collect()
    }

    async fn save_suggestion(&self, result: &SuggestionResult) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO suggestions (id, ticket_id, confidence_score, model_used, payload_json, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&result.id)
        .bind(&result.ticket_id)
        .bind(result.confidence_score)
        .bind(&result.model_used)
        .bind(serde_json::to_string(result)?)
        .bind(result.created_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_suggestions(&self, limit: usize) -> Result<Vec<SuggestionResult>> {
        let payloads: Vec<String> =
            sqlx::query_scalar("SELECT payload_json FROM suggestions ORDER BY seq DESC LIMIT ?")
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?;

        payloads
            .iter()
            .map(|p| serde_json::from_str(p).with_context(|| "Invalid suggestion payload"))
            .collect()
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
