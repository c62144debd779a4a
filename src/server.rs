//! JSON HTTP API over an [`Engine`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Liveness (returns version) |
//! | `POST` | `/api/ingest` | Start a background ingestion run (202) |
//! | `GET`  | `/api/ingest/status` | Latest ingestion run snapshot |
//! | `POST` | `/api/search` | Similarity search over stored chunks |
//! | `POST` | `/api/suggest` | Suggest a code change for a ticket |
//! | `GET`  | `/api/suggestions` | Recent suggestion audit records |
//! | `GET`  | `/api/analytics` | Usage analytics |
//! | `GET`  | `/api/status/all` | Connection health of every service |
//! | `GET`  | `/api/status/{service}` | Connection health of one service |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404),
//! `precondition_failed` (412), `internal` (500).
//!
//! A degraded suggestion is not an error: it is returned with status 200 and
//! `degraded: true`.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::analytics::Analytics;
use crate::engine::Engine;
use crate::error::PreconditionError;
use crate::health::ConnectionStatus;
use crate::ingest::IngestRequest;
use crate::models::{IngestionRun, SuggestionRequest, SuggestionResult};
use crate::search::SearchResponse;

const DEFAULT_SUGGESTION_PAGE: usize = 20;

#[derive(Clone)]
struct AppState {
    engine: Arc<Engine>,
}

/// Build the router; exposed separately so it can be embedded or tested.
pub fn router(engine: Arc<Engine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/ingest", post(handle_ingest))
        .route("/api/ingest/status", get(handle_ingest_status))
        .route("/api/search", post(handle_search))
        .route("/api/suggest", post(handle_suggest))
        .route("/api/suggestions", get(handle_suggestions))
        .route("/api/analytics", get(handle_analytics))
        .route("/api/status/all", get(handle_status_all))
        .route("/api/status/{service}", get(handle_status_service))
        .layer(cors)
        .with_state(AppState { engine })
}

/// Serve on `[server].bind` until the process is terminated.
pub async fn run_server(engine: Arc<Engine>) -> anyhow::Result<()> {
    let bind_addr = engine.config().server.bind.clone();
    let app = router(engine);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "HTTP server listening");
    println!("tsg server listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    tracing::warn!(error = %format!("{:#}", err), "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: format!("{:#}", err),
    }
}

impl From<PreconditionError> for AppError {
    fn from(err: PreconditionError) -> Self {
        AppError {
            status: StatusCode::PRECONDITION_FAILED,
            code: "precondition_failed",
            message: err.to_string(),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Ingestion ============

#[derive(Serialize)]
struct IngestAccepted {
    message: String,
}

/// Starts the run and returns without waiting for it. An empty body uses
/// the configured repository and chunking.
async fn handle_ingest(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<IngestAccepted>), AppError> {
    let request: IngestRequest = if body.iter().all(u8::is_ascii_whitespace) {
        IngestRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| bad_request(format!("invalid body: {}", e)))?
    };
    // Detached: progress is observed through /api/ingest/status.
    let _handle = state.engine.start_ingestion(request)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(IngestAccepted {
            message: "Ingestion started".to_string(),
        }),
    ))
}

async fn handle_ingest_status(State(state): State<AppState>) -> Json<IngestionRun> {
    Json(state.engine.ingestion_status())
}

// ============ POST /api/search ============

#[derive(Debug, Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let limit = req.limit.unwrap_or(state.engine.config().retrieval.top_n);
    if limit == 0 {
        return Err(bad_request("limit must be > 0"));
    }

    let response = state
        .engine
        .search(&req.query, limit)
        .await
        .map_err(internal)?;
    Ok(Json(response))
}

// ============ Suggestions ============

#[derive(Serialize)]
struct SuggestResponse {
    suggestion: SuggestionResult,
    degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

async fn handle_suggest(
    State(state): State<AppState>,
    Json(req): Json<SuggestionRequest>,
) -> Result<Json<SuggestResponse>, AppError> {
    if req.ticket_id.trim().is_empty() {
        return Err(bad_request("ticket_id must not be empty"));
    }

    let outcome = state.engine.suggest(&req).await;
    let degraded = outcome.is_degraded();
    let reason = outcome.reason().map(str::to_string);
    Ok(Json(SuggestResponse {
        suggestion: outcome.into_result(),
        degraded,
        reason,
    }))
}

#[derive(Debug, Deserialize)]
struct PageParams {
    #[serde(default)]
    limit: Option<usize>,
}

async fn handle_suggestions(
    State(state): State<AppState>,
    Query(page): Query<PageParams>,
) -> Result<Json<Vec<SuggestionResult>>, AppError> {
    let limit = page.limit.unwrap_or(DEFAULT_SUGGESTION_PAGE);
    let items = state.engine.suggestions(limit).await.map_err(internal)?;
    Ok(Json(items))
}

async fn handle_analytics(State(state): State<AppState>) -> Result<Json<Analytics>, AppError> {
    let analytics = state.engine.analytics().await.map_err(internal)?;
    Ok(Json(analytics))
}

// ============ Connection status ============

async fn handle_status_all(
    State(state): State<AppState>,
) -> Result<Json<Vec<ConnectionStatus>>, AppError> {
    let checker = state.engine.health().map_err(internal)?;
    Ok(Json(checker.check_all().await))
}

async fn handle_status_service(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> Result<Json<ConnectionStatus>, AppError> {
    let checker = state.engine.health().map_err(internal)?;
    checker
        .check(&service)
        .await
        .map(Json)
        .ok_or_else(|| not_found(format!("unknown service: {}", service)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::connector_git::LocalDirSource;
    use crate::embedding::Embedder;
    use crate::generation::DisabledGenerator;
    use crate::store::InMemoryStore;

    fn state() -> State<AppState> {
        let config = parse_config("[db]\npath = \"unused.sqlite\"\n").unwrap();
        let embedder = Embedder::from_config(&config.embedding).unwrap();
        let engine = Engine::new(
            config,
            Arc::new(InMemoryStore::new()),
            Arc::new(embedder),
            Arc::new(DisabledGenerator),
            Arc::new(LocalDirSource),
        );
        State(AppState {
            engine: Arc::new(engine),
        })
    }

    #[tokio::test]
    async fn test_ingest_without_repository_is_precondition_failed() {
        let err = handle_ingest(state(), Bytes::new()).await.err().unwrap();
        assert_eq!(err.status, StatusCode::PRECONDITION_FAILED);
        assert_eq!(err.code, "precondition_failed");
    }

    #[tokio::test]
    async fn test_ingest_rejects_malformed_body() {
        let err = handle_ingest(state(), Bytes::from_static(b"{\"chunk_size\": \"big\"}"))
            .await
            .err()
            .unwrap();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_search_rejects_empty_query() {
        let req = SearchRequest {
            query: "  ".to_string(),
            limit: None,
        };
        let err = handle_search(state(), Json(req)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_search_empty_store() {
        let req = SearchRequest {
            query: "restart service".to_string(),
            limit: Some(3),
        };
        let Json(resp) = handle_search(state(), Json(req)).await.unwrap();
        assert!(resp.matches.is_empty());
        assert!(!resp.capped);
    }

    #[tokio::test]
    async fn test_suggest_degraded_is_ok() {
        let req = SuggestionRequest {
            ticket_id: "OPS-7".to_string(),
            summary: "rotate logs".to_string(),
            ..SuggestionRequest::default()
        };
        let Json(resp) = handle_suggest(state(), Json(req)).await.unwrap();
        assert!(resp.degraded);
        assert_eq!(resp.suggestion.model_used, "fallback");
        assert_eq!(resp.suggestion.file_path, "modules/custom_module_ops-7.py");
    }

    #[tokio::test]
    async fn test_unknown_service_is_not_found() {
        let err = handle_status_service(state(), Path("postgres".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }
}
