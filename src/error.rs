//! Crate-wide error type.
//!
//! Most degraded conditions (missing history, malformed log lines, corrupt
//! cache entries, exhausted fallback tiers) are deliberately *not* errors:
//! they degrade to empty aggregates, skip counters, or `primary=None`
//! decisions. The variants here cover genuinely unrecoverable setup
//! failures, and even those are isolated per work unit by the batch
//! orchestrator.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// `git` itself failed in a way that is not "no data for this path"
    #[error("git command failed: {0}")]
    Git(String),

    /// The target path is not a git repository
    #[error("not a git repository: {0}")]
    RepoNotFound(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// One unit of a batch failed; recorded, never propagated past the batch
    #[error("batch unit {unit} failed: {message}")]
    BatchUnit { unit: String, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;
