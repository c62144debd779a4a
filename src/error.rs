//! Typed errors that callers need to tell apart.
//!
//! Most of the crate propagates `anyhow::Error`. The variants here are the
//! precondition failures that are rejected before any work starts, so the
//! CLI and HTTP layers can report them as such.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PreconditionError {
    /// Chunk windows cannot advance when the overlap swallows the window.
    #[error("invalid chunking parameters: size={size}, overlap={overlap} (need size > 0 and overlap < size)")]
    InvalidChunking { size: usize, overlap: usize },

    #[error("no target repository configured")]
    MissingRepository,

    #[error("repository {url} requires an access token but none is configured")]
    MissingCredentials { url: String },
}
