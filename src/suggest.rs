//! Suggestion assembly: retrieval, prompt construction, generation and
//! confidence scoring.
//!
//! [`Assembler::assemble`] never fails. Any error along the way (search,
//! generation, an empty response) produces a templated fallback stub with
//! `confidence_score = 0.5` and `model_used = "fallback"`, returned as
//! [`Outcome::Degraded`] with the reason attached. Every result, genuine or
//! not, is persisted as an audit record; a failed write is only logged.
//!
//! Confidence on the success path is `min(0.9, mean score of the context
//! matches)`, or `0.7` when retrieval found nothing. It is a heuristic, not
//! a calibrated probability.

use chrono::Utc;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

use crate::config::{GenerationConfig, RetrievalConfig};
use crate::embedding::Embedder;
use crate::generation::{GenerationBackend, GenerationRequest};
use crate::models::{Outcome, SimilarityMatch, SuggestionRequest, SuggestionResult};
use crate::search::search;
use crate::store::Store;

pub const FALLBACK_MODEL: &str = "fallback";
pub const FALLBACK_CONFIDENCE: f64 = 0.5;
pub const NO_MATCH_CONFIDENCE: f64 = 0.7;
pub const MAX_CONFIDENCE: f64 = 0.9;

pub struct Assembler {
    pub store: Arc<dyn Store>,
    pub embedder: Arc<Embedder>,
    pub generator: Arc<dyn GenerationBackend>,
    pub generation: GenerationConfig,
    pub retrieval: RetrievalConfig,
}

/// What was gathered before a failure, kept on the fallback record.
#[derive(Default)]
struct Partial {
    matches: Vec<SimilarityMatch>,
    prompt: String,
}

impl Assembler {
    #[instrument(skip_all, fields(ticket = %request.ticket_id))]
    pub async fn assemble(&self, request: &SuggestionRequest) -> Outcome<SuggestionResult> {
        let started = Instant::now();
        let mut partial = Partial::default();

        let outcome = match self.attempt(request, &mut partial, started).await {
            Ok(result) => Outcome::Ok(result),
            Err(reason) => {
                tracing::warn!(reason = %reason, "suggestion degraded to fallback");
                let result = fallback_result(
                    request,
                    partial,
                    started.elapsed().as_secs_f64(),
                    &reason,
                );
                Outcome::Degraded { result, reason }
            }
        };

        if let Err(e) = self.store.save_suggestion(outcome.result()).await {
            tracing::warn!(error = %e, "failed to persist suggestion audit record");
        }
        outcome
    }

    async fn attempt(
        &self,
        request: &SuggestionRequest,
        partial: &mut Partial,
        started: Instant,
    ) -> Result<SuggestionResult, String> {
        let query = format!("{} {}", request.summary, request.description);
        let response = search(
            self.store.as_ref(),
            &self.embedder,
            &query,
            self.retrieval.top_n,
            self.retrieval.candidate_cap,
        )
        .await
        .map_err(|e| format!("similarity search failed: {:#}", e))?;

        partial.matches = response.matches;
        let context_len = partial.matches.len().min(self.retrieval.context_matches);
        let context = &partial.matches[..context_len];
        partial.prompt = build_prompt(request, context);

        let model = request
            .model
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(&self.generation.model)
            .to_string();
        let generation = GenerationRequest::new(&self.generation, &model, partial.prompt.clone());
        let text = self
            .generator
            .generate(&generation)
            .await
            .map_err(|e| format!("generation failed: {}", e))?;
        if text.trim().is_empty() {
            return Err("generation backend returned an empty response".to_string());
        }

        let (suggested_code, explanation) = split_response(&text);
        let explanation = explanation.unwrap_or_else(|| {
            format!(
                "Generated by {} from {} retrieved code chunk(s).",
                model, context_len
            )
        });
        let confidence_score = confidence(context);
        let file_path = context
            .first()
            .map(|m| m.chunk.file_path.clone())
            .unwrap_or_default();

        Ok(SuggestionResult {
            id: uuid::Uuid::new_v4().to_string(),
            ticket_id: request.ticket_id.clone(),
            summary: request.summary.clone(),
            description: request.description.clone(),
            matches: std::mem::take(&mut partial.matches),
            prompt: std::mem::take(&mut partial.prompt),
            suggested_code,
            file_path,
            explanation,
            confidence_score,
            model_used: model,
            processing_time_secs: started.elapsed().as_secs_f64(),
            degraded_reason: None,
            created_at: Utc::now(),
        })
    }
}

/// `min(0.9, mean score)`, `0.7` for no matches, never below zero.
pub fn confidence(context: &[SimilarityMatch]) -> f64 {
    if context.is_empty() {
        return NO_MATCH_CONFIDENCE;
    }
    let mean = context.iter().map(|m| f64::from(m.score)).sum::<f64>() / context.len() as f64;
    mean.min(MAX_CONFIDENCE).max(0.0)
}

pub fn build_prompt(request: &SuggestionRequest, context: &[SimilarityMatch]) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "You are a senior software engineer working on an infrastructure automation \
         codebase of Python modules and Ansible playbooks. Propose a concrete code change \
         that resolves the ticket below, consistent with the existing code.\n\n",
    );

    let _ = writeln!(prompt, "Ticket: {}", request.ticket_id);
    let _ = writeln!(prompt, "Summary: {}", request.summary);
    let _ = writeln!(prompt, "Description: {}", request.description);
    prompt.push('\n');

    if context.is_empty() {
        prompt.push_str("No related code was found in the repository.\n\n");
    } else {
        prompt.push_str("Relevant code from the repository:\n\n");
        for m in context {
            let _ = writeln!(
                prompt,
                "--- File: {} (chunk {}/{}, similarity {:.3}) ---",
                m.chunk.file_path,
                m.chunk.chunk_index + 1,
                m.chunk.total_chunks,
                m.score
            );
            prompt.push_str(&m.chunk.text);
            if !m.chunk.text.ends_with('\n') {
                prompt.push('\n');
            }
            prompt.push('\n');
        }
    }

    prompt.push_str(
        "Respond with:\n\
         1. What changes are needed.\n\
         2. Which files to modify or create.\n\
         3. The rationale for the change.\n\
         Put the complete code change in a single fenced code block.\n",
    );
    prompt
}

/// Split generated text into the first fenced code block and the prose
/// around it. Text without a fence is all code.
fn split_response(text: &str) -> (String, Option<String>) {
    let Some(open) = text.find("```") else {
        return (text.trim().to_string(), None);
    };
    let after_open = &text[open + 3..];
    // Skip the info string (e.g. `python`).
    let body_start = after_open.find('\n').map(|i| i + 1).unwrap_or(after_open.len());
    let body = &after_open[body_start..];
    let Some(close) = body.find("```") else {
        return (text.trim().to_string(), None);
    };

    let code = body[..close].trim_end().to_string();
    let prose = format!(
        "{}\n{}",
        text[..open].trim_end(),
        body[close + 3..].trim_start()
    );
    let prose = prose.trim();
    let explanation = if prose.is_empty() {
        None
    } else {
        Some(prose.to_string())
    };
    (code, explanation)
}

fn fallback_result(
    request: &SuggestionRequest,
    partial: Partial,
    elapsed_secs: f64,
    reason: &str,
) -> SuggestionResult {
    let ticket = &request.ticket_id;
    let suggested_code = format!(
        "# Placeholder code suggestion for ticket {ticket}\n\
         def fix_{slug}():\n\
         \x20   \"\"\"\n\
         \x20   No generated suggestion is available for {ticket}.\n\
         \x20   Review the ticket description and the related code manually.\n\
         \x20   \"\"\"\n\
         \x20   pass\n",
        ticket = ticket,
        slug = identifier_slug(ticket),
    );

    SuggestionResult {
        id: uuid::Uuid::new_v4().to_string(),
        ticket_id: ticket.clone(),
        summary: request.summary.clone(),
        description: request.description.clone(),
        matches: partial.matches,
        prompt: partial.prompt,
        suggested_code,
        file_path: format!("modules/custom_module_{}.py", ticket.to_lowercase()),
        explanation: format!("Placeholder code suggestion for ticket {}: {}", ticket, reason),
        confidence_score: FALLBACK_CONFIDENCE,
        model_used: FALLBACK_MODEL.to_string(),
        processing_time_secs: elapsed_secs,
        degraded_reason: Some(reason.to_string()),
        created_at: Utc::now(),
    }
}

/// `TICKET-1` → `ticket_1`, usable as a Python identifier suffix.
fn identifier_slug(ticket: &str) -> String {
    let slug: String = ticket
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if slug.is_empty() {
        "ticket".to_string()
    } else {
        slug
    }
}
