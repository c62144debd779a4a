//! # Ticket Suggest
//!
//! Retrieval-augmented code-change suggestions for tickets, grounded in a
//! snapshot of an infrastructure-automation repository (Python modules and
//! Ansible playbooks).
//!
//! Ingestion clones the repository, extracts lightweight features from each
//! file, chunks and embeds the text and appends the chunks to a store. A
//! suggestion embeds the ticket, retrieves the most similar chunks, builds a
//! prompt and asks a generation backend for a change. When anything on that
//! path fails the caller still gets a templated, clearly flagged stub.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────────┐   ┌──────────┐
//! │ git clone    │──▶│ extract+chunk+embed  │──▶│  SQLite  │
//! └──────────────┘   └──────────────────────┘   └────┬─────┘
//!                                                    │
//!                      ┌─────────────────────────────┤
//!                      ▼                             ▼
//!                 ┌──────────┐   prompt    ┌──────────────────┐
//!                 │  search  │────────────▶│ generation (LLM) │
//!                 └──────────┘             └──────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! tsg init                                  # create database
//! tsg ingest                                # clone + index the repository
//! tsg search "restart nginx on config change"
//! tsg suggest OPS-123 --summary "Rotate logs weekly"
//! tsg serve                                 # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Typed precondition errors |
//! | [`models`] | Core data types |
//! | [`chunk`] | Overlapping character windows |
//! | [`extract`] | Symbols, imports and complexity per file |
//! | [`embedding`] | Embedding models and the lazily loaded embedder |
//! | [`connector_git`] | Repository acquisition and file discovery |
//! | [`ingest`] | Ingestion pipeline |
//! | [`progress`] | Ingestion status slot and CLI progress |
//! | [`search`] | Cosine similarity search |
//! | [`generation`] | Text generation backends |
//! | [`suggest`] | Suggestion assembly and fallback |
//! | [`analytics`] | Usage analytics over suggestion records |
//! | [`health`] | Connection checks for external services |
//! | [`engine`] | Facade used by the CLI and HTTP server |
//! | [`server`] | JSON HTTP API |
//! | [`store`] | Persistence seam (SQLite, in-memory) |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |
//! | [`telemetry`] | Log subscriber for the binary |

pub mod analytics;
pub mod chunk;
pub mod config;
pub mod connector_git;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod extract;
pub mod generation;
pub mod health;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod search;
pub mod server;
pub mod store;
pub mod suggest;
pub mod telemetry;
