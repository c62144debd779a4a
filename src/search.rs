//! Brute-force cosine similarity search over stored chunks.
//!
//! A query is embedded with the same [`Embedder`] used at ingestion time and
//! compared against a bounded working set: at most `candidate_cap` embedded
//! chunks, in insertion order. Chunks beyond the cap are never considered,
//! which bounds memory but also recall on large corpora. When the cap is hit
//! the response says so (`capped`) and a warning is logged.
//!
//! Ranking is a stable descending sort by score, so ties keep retrieval
//! order. Chunks whose similarity is undefined (zero-norm embedding, or a
//! vector length that differs from the query's) are skipped.

use anyhow::{bail, Result};
use serde::Serialize;
use tracing::instrument;

use crate::embedding::{cosine_similarity, Embedder};
use crate::models::{CodeChunk, SimilarityMatch};
use crate::store::Store;

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    /// At most `limit` matches, scores non-increasing.
    pub matches: Vec<SimilarityMatch>,
    /// Chunks loaded into the working set.
    pub considered: usize,
    /// True when the working set was truncated at the candidate cap.
    pub capped: bool,
}

/// Score `candidates` against `query` and keep the best `limit`.
pub fn rank(query: &[f32], candidates: Vec<CodeChunk>, limit: usize) -> Vec<SimilarityMatch> {
    let mut scored: Vec<SimilarityMatch> = candidates
        .into_iter()
        .filter_map(|chunk| {
            let score = chunk
                .embedding
                .as_deref()
                .and_then(|v| cosine_similarity(query, v))?;
            Some(SimilarityMatch { chunk, score })
        })
        .collect();

    // sort_by is stable: equal scores keep retrieval order.
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(limit);
    scored
}

#[instrument(skip_all, fields(limit = limit, candidate_cap = candidate_cap))]
pub async fn search(
    store: &dyn Store,
    embedder: &Embedder,
    query: &str,
    limit: usize,
    candidate_cap: usize,
) -> Result<SearchResponse> {
    if limit == 0 {
        bail!("limit must be > 0");
    }

    let query_vec = embedder.embed(query).await?;
    // One past the cap tells a full corpus apart from a truncated one.
    let mut candidates = store.embedded_chunks(candidate_cap.saturating_add(1)).await?;
    let capped = candidates.len() > candidate_cap;
    candidates.truncate(candidate_cap);
    let considered = candidates.len();
    if capped {
        tracing::warn!(
            candidate_cap,
            "similarity search hit the candidate cap; chunks beyond it were not considered"
        );
    }

    let matches = rank(&query_vec, candidates, limit);
    tracing::debug!(considered, returned = matches.len(), "search complete");

    Ok(SearchResponse {
        matches,
        considered,
        capped,
    })
}
