//! Ingestion progress: the shared status slot and CLI reporters.
//!
//! [`ProgressSlot`] holds the latest [`IngestionRun`] snapshot for status
//! queries. The background run publishes a fresh snapshot after every file
//! and on every state transition; readers never block and always see a
//! complete snapshot.
//!
//! The slot is single-flight by contract. Nothing stops two runs from
//! publishing into the same slot, and if that happens the last `replace`
//! wins: a status query sees whichever run wrote most recently.
//!
//! Reporters emit human or JSON progress lines on **stderr** so stdout
//! remains parseable for scripts.

use arc_swap::ArcSwap;
use std::io::Write;
use std::sync::Arc;

use crate::models::{IngestionRun, RunStatus};

/// Last-writer-wins snapshot of the current ingestion run.
pub struct ProgressSlot {
    inner: ArcSwap<IngestionRun>,
}

impl Default for ProgressSlot {
    fn default() -> Self {
        Self::new(IngestionRun::not_started())
    }
}

impl ProgressSlot {
    pub fn new(initial: IngestionRun) -> Self {
        Self {
            inner: ArcSwap::from_pointee(initial),
        }
    }

    /// Publish `run` as the current snapshot, replacing whatever was there.
    pub fn replace(&self, run: IngestionRun) {
        self.inner.store(Arc::new(run));
    }

    pub fn current(&self) -> Arc<IngestionRun> {
        self.inner.load_full()
    }
}

/// A single progress event emitted by the ingestion pipeline.
#[derive(Clone, Debug)]
pub enum IngestProgressEvent {
    /// Working copy is being acquired.
    Acquiring { repository: String, branch: String },
    /// `n` of `total` candidate files handled.
    Processing { n: u64, total: u64, chunks: u64 },
    /// Run reached a terminal state.
    Finished {
        status: RunStatus,
        processed: u64,
        failed: u64,
        skipped: u64,
    },
}

pub trait IngestProgressReporter: Send + Sync {
    fn report(&self, event: IngestProgressEvent);
}

/// Human-friendly progress on stderr: "ingest  processing  1,234 / 5,000 files".
pub struct StderrProgress;

impl IngestProgressReporter for StderrProgress {
    fn report(&self, event: IngestProgressEvent) {
        let line = match &event {
            IngestProgressEvent::Acquiring { repository, branch } => {
                format!("ingest  cloning {} ({})...\n", repository, branch)
            }
            IngestProgressEvent::Processing { n, total, chunks } => format!(
                "ingest  processing  {} / {} files  ({} chunks)\n",
                format_number(*n),
                format_number(*total),
                format_number(*chunks)
            ),
            IngestProgressEvent::Finished {
                status,
                processed,
                failed,
                skipped,
            } => format!(
                "ingest  {}  processed={} failed={} skipped={}\n",
                status.as_str(),
                format_number(*processed),
                format_number(*failed),
                format_number(*skipped)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IngestProgressReporter for JsonProgress {
    fn report(&self, event: IngestProgressEvent) {
        let obj = match &event {
            IngestProgressEvent::Acquiring { repository, branch } => serde_json::json!({
                "event": "progress",
                "phase": "acquiring",
                "repository": repository,
                "branch": branch
            }),
            IngestProgressEvent::Processing { n, total, chunks } => serde_json::json!({
                "event": "progress",
                "phase": "processing",
                "n": n,
                "total": total,
                "chunks": chunks
            }),
            IngestProgressEvent::Finished {
                status,
                processed,
                failed,
                skipped,
            } => serde_json::json!({
                "event": "finished",
                "status": status,
                "processed": processed,
                "failed": failed,
                "skipped": skipped
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

pub struct NoProgress;

impl IngestProgressReporter for NoProgress {
    fn report(&self, _event: IngestProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Arc<dyn IngestProgressReporter> {
        match self {
            ProgressMode::Off => Arc::new(NoProgress),
            ProgressMode::Human => Arc::new(StderrProgress),
            ProgressMode::Json => Arc::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn slot_starts_not_started() {
        let slot = ProgressSlot::default();
        assert_eq!(slot.current().status, RunStatus::NotStarted);
    }

    #[test]
    fn slot_last_writer_wins() {
        let slot = ProgressSlot::default();
        let first = IngestionRun::started("repo-a", "main");
        let second = IngestionRun::started("repo-b", "dev");
        slot.replace(first);
        slot.replace(second.clone());
        assert_eq!(*slot.current(), second);
    }

    #[test]
    fn slot_snapshot_is_stable_after_replace() {
        let slot = ProgressSlot::default();
        let before = slot.current();
        slot.replace(IngestionRun::started("repo", "main"));
        assert_eq!(before.status, RunStatus::NotStarted);
        assert_eq!(slot.current().status, RunStatus::InProgress);
    }
}
