//! Schema for the SQLite store. Every statement is idempotent, so `tsg init`
//! can be re-run against an existing database.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // Append-only chunk store; `seq` fixes retrieval order to insertion order.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS code_chunks (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            file_path TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            total_chunks INTEGER NOT NULL,
            text TEXT NOT NULL,
            language TEXT NOT NULL,
            primary_symbol TEXT,
            primary_container TEXT,
            imports_json TEXT NOT NULL DEFAULT '[]',
            complexity REAL NOT NULL DEFAULT 1.0,
            embedding BLOB,
            embedding_model TEXT,
            dims INTEGER,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Run history; the latest row is the authoritative run.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingestion_runs (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL,
            status TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS suggestions (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            ticket_id TEXT NOT NULL,
            confidence_score REAL NOT NULL,
            model_used TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_code_chunks_file ON code_chunks(file_path)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_ingestion_runs_id ON ingestion_runs(id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_suggestions_ticket ON suggestions(ticket_id)")
        .execute(pool)
        .await?;

    Ok(())
}
