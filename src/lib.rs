//! # Merge Ownership Planning Library
//!
//! `mergeplan` analyzes git history to figure out who should own each
//! piece of a large merge. It scores contributors per file from commit
//! recency, volume, and consistency, then assigns work units through a
//! fallback cascade so every unit either gets an owner or a precise
//! reason why it could not.
//!
//! ## Features
//!
//! - Per-file contributor scoring with pluggable algorithm variants
//! - Single-pass repository indexing for large batches
//! - Three-tier caching (in-memory LRU, persistent store, global index)
//! - Heuristic ownership inference for files with no direct history
//! - Load-balanced assignment with per-person quotas
//! - Concurrent batch analysis with per-unit failure isolation
//!
//! ## Example
//!
//! ```no_run
//! use std::collections::HashSet;
//! use std::sync::Arc;
//!
//! use mergeplan::cache::{CacheManager, GlobalIndex};
//! use mergeplan::config::AnalysisConfig;
//! use mergeplan::history::GitCliHistory;
//! use mergeplan::orchestrator::run_batch;
//! use mergeplan::types::WorkUnit;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn plan() -> mergeplan::Result<()> {
//! let config = Arc::new(AnalysisConfig::default());
//! let provider = Arc::new(GitCliHistory::open(".")?);
//! let cache = Arc::new(CacheManager::in_memory(&config));
//! let index = Arc::new(GlobalIndex::build(provider.as_ref(), &config)?);
//!
//! let units = vec![
//!     WorkUnit::single("src/parser.rs"),
//!     WorkUnit::single("src/render.rs"),
//! ];
//! let result = run_batch(
//!     provider,
//!     cache,
//!     Some(index),
//!     units,
//!     config,
//!     HashSet::new(),
//!     CancellationToken::new(),
//! )
//! .await?;
//! for decision in &result.decisions {
//!     println!("{}: {:?} ({})", decision.unit_id, decision.primary, decision.reason);
//! }
//! # Ok(())
//! # }
//! ```

pub mod assign;
pub mod cache;
pub mod config;
pub mod error;
pub mod history;
pub mod orchestrator;
pub mod scoring;
#[cfg(test)]
mod testsupport;
pub mod types;

// Re-export main types for convenience
pub use error::{Error, Result};
pub use orchestrator::{run_batch, BatchReport, BatchResult};
pub use types::{AssignmentDecision, ContributorStat, FileContributorIndex, ReasonCode, WorkUnit};
