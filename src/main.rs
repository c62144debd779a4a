//! # Ticket Suggest CLI (`tsg`)
//!
//! ## Usage
//!
//! ```bash
//! tsg --config ./config/tsg.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tsg init` | Create the SQLite database and schema |
//! | `tsg ingest` | Clone the repository and index it (foreground) |
//! | `tsg status` | Show the latest ingestion run |
//! | `tsg search "<query>"` | Similarity search over indexed chunks |
//! | `tsg suggest <ticket>` | Suggest a code change for a ticket |
//! | `tsg analytics` | Usage analytics over past suggestions |
//! | `tsg health [service]` | Connection checks for external services |
//! | `tsg serve` | Start the HTTP server |

use anyhow::bail;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;

use ticket_suggest::config;
use ticket_suggest::engine::Engine;
use ticket_suggest::health;
use ticket_suggest::ingest::IngestRequest;
use ticket_suggest::migrate;
use ticket_suggest::models::{IngestionRun, RunStatus, SuggestionRequest};
use ticket_suggest::progress::ProgressMode;
use ticket_suggest::server;
use ticket_suggest::telemetry;

/// Retrieval-augmented code-change suggestions for tickets.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(name = "tsg", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/tsg.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Clone the configured repository and index it.
    ///
    /// Runs in the foreground; Ctrl-C cancels the run, which is then
    /// recorded as failed.
    Ingest {
        /// Repository URL or local path (overrides `[repository].url`).
        #[arg(long)]
        repository: Option<String>,

        /// Branch to clone (overrides `[repository].branch`).
        #[arg(long)]
        branch: Option<String>,

        #[arg(long)]
        chunk_size: Option<usize>,

        #[arg(long)]
        chunk_overlap: Option<usize>,

        /// Progress output on stderr. Defaults to human when stderr is a TTY.
        #[arg(long, value_enum)]
        progress: Option<ProgressArg>,

        /// Print the final run record as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show the latest ingestion run.
    Status {
        #[arg(long)]
        json: bool,
    },

    /// Search indexed chunks by similarity.
    Search {
        query: String,

        /// Maximum number of results (defaults to `[retrieval].top_n`).
        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        json: bool,
    },

    /// Suggest a code change for a ticket.
    Suggest {
        /// Ticket identifier, e.g. `OPS-123`.
        ticket_id: String,

        #[arg(long, default_value = "")]
        summary: String,

        #[arg(long, default_value = "")]
        description: String,

        /// Generation model for this request (overrides `[generation].model`).
        #[arg(long)]
        model: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Usage analytics over stored suggestions (JSON).
    Analytics,

    /// Check connectivity to external services (JSON).
    Health {
        /// One of `ollama`, `gitlab`, `jira`, `store`; all when omitted.
        service: Option<String>,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

impl From<ProgressArg> for ProgressMode {
    fn from(arg: ProgressArg) -> Self {
        match arg {
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            repository,
            branch,
            chunk_size,
            chunk_overlap,
            progress,
            json,
        } => {
            let mode = progress
                .map(ProgressMode::from)
                .unwrap_or_else(ProgressMode::default_for_tty);
            let engine = Engine::open(cfg).await?.with_reporter(mode.reporter());
            let request = IngestRequest {
                repository,
                branch,
                chunk_size,
                chunk_overlap,
            };
            let handle = engine.start_ingestion(request)?;

            let cancel = handle.cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            });

            let run = handle.wait().await?;
            print_run(&run, json)?;
            if run.status == RunStatus::Failed {
                bail!("ingestion failed: {}", run.errors.join("; "));
            }
        }
        Commands::Status { json } => {
            let engine = Engine::open(cfg).await?;
            print_run(&engine.ingestion_status(), json)?;
        }
        Commands::Search { query, limit, json } => {
            let engine = Engine::open(cfg).await?;
            let limit = limit.unwrap_or(engine.config().retrieval.top_n);
            let response = engine.search(&query, limit).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else if response.matches.is_empty() {
                println!("No results.");
            } else {
                for (i, m) in response.matches.iter().enumerate() {
                    println!(
                        "{}. [{:.3}] {} (chunk {}/{})",
                        i + 1,
                        m.score,
                        m.chunk.file_path,
                        m.chunk.chunk_index + 1,
                        m.chunk.total_chunks
                    );
                    let first_line = m.chunk.text.lines().find(|l| !l.trim().is_empty());
                    if let Some(line) = first_line {
                        println!("    {}", line.trim());
                    }
                }
                if response.capped {
                    eprintln!(
                        "note: only the first {} chunks were considered",
                        response.considered
                    );
                }
            }
        }
        Commands::Suggest {
            ticket_id,
            summary,
            description,
            model,
            json,
        } => {
            if ticket_id.trim().is_empty() {
                bail!("ticket id must not be empty");
            }
            let engine = Engine::open(cfg).await?;
            let request = SuggestionRequest {
                ticket_id,
                summary,
                description,
                model,
            };
            let outcome = engine.suggest(&request).await;
            if let Some(reason) = outcome.reason() {
                eprintln!("warning: returning a placeholder suggestion ({})", reason);
            }
            let result = outcome.into_result();

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("ticket:     {}", result.ticket_id);
                println!("file:       {}", result.file_path);
                println!("model:      {}", result.model_used);
                println!("confidence: {:.2}", result.confidence_score);
                println!();
                println!("{}", result.suggested_code);
                println!();
                println!("{}", result.explanation);
            }
        }
        Commands::Analytics => {
            let engine = Engine::open(cfg).await?;
            let analytics = engine.analytics().await?;
            println!("{}", serde_json::to_string_pretty(&analytics)?);
        }
        Commands::Health { service } => {
            let engine = Engine::open(cfg).await?;
            let checker = engine.health()?;
            match service {
                Some(name) => match checker.check(&name).await {
                    Some(status) => println!("{}", serde_json::to_string_pretty(&status)?),
                    None => bail!(
                        "unknown service: {} (expected one of: {})",
                        name,
                        health::SERVICES.join(", ")
                    ),
                },
                None => {
                    let all = checker.check_all().await;
                    println!("{}", serde_json::to_string_pretty(&all)?);
                }
            }
        }
        Commands::Serve => {
            let engine = Engine::open(cfg).await?;
            server::run_server(Arc::new(engine)).await?;
        }
    }

    Ok(())
}

fn print_run(run: &IngestionRun, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(run)?);
        return Ok(());
    }

    println!("status:     {}", run.status.as_str());
    if !run.repository.is_empty() {
        println!("repository: {} ({})", run.repository, run.branch);
    }
    println!(
        "files:      {} total, {} processed, {} failed, {} skipped",
        run.total_files, run.processed_files, run.failed_files, run.skipped_files
    );
    println!(
        "chunks:     {} of {} stored",
        run.processed_chunks, run.total_chunks
    );
    if run.files_per_second > 0.0 {
        println!("throughput: {:.2} files/s", run.files_per_second);
    }
    for err in &run.errors {
        println!("error:      {}", err);
    }
    Ok(())
}
