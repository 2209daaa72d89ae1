//! History provider: answers "who touched this file, and how much".
//!
//! The [`HistoryProvider`] trait is the seam between the analysis core and
//! revision history. [`GitCliHistory`] implements it over the `git` porcelain
//! because the extractor consumes interleaved commit-header / numstat text;
//! calls are blocking and are run inside `spawn_blocking` by the batch
//! orchestrator. A provider returning no data for a path yields an empty
//! aggregate; it is never an error to propagate.

pub mod numstat;


use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::{DateTime, Utc};
use log::{debug, warn};

use crate::error::{Error, Result};
use crate::types::{ActiveContributorSet, AuthorAggregate};

pub use numstat::{parse_log, parse_log_filtered, HistoryTable, ParseStats, COMMIT_PREFIX};

/// Per-path author aggregates for a batch of files.
pub type BatchContributors = HashMap<String, HashMap<String, AuthorAggregate>>;

/// Contract between the analysis core and the revision history backend.
pub trait HistoryProvider: Send + Sync {
    /// Contributors to one logical file since `since`, rename aliases merged.
    fn recent_contributors(
        &self,
        path: &str,
        since: DateTime<Utc>,
    ) -> Result<HashMap<String, AuthorAggregate>>;

    /// Contributors to one logical file across the full history.
    fn all_contributors(&self, path: &str) -> Result<HashMap<String, AuthorAggregate>>;

    /// Authors with at least one commit in the last `window_months` months.
    fn active_contributors(&self, window_months: u32) -> Result<ActiveContributorSet>;

    /// Batch variant of [`HistoryProvider::recent_contributors`].
    fn recent_contributors_batch(
        &self,
        paths: &[String],
        since: DateTime<Utc>,
    ) -> Result<BatchContributors>;

    /// Batch variant of [`HistoryProvider::all_contributors`].
    fn all_contributors_batch(&self, paths: &[String]) -> Result<BatchContributors>;

    /// Raw commit-header / numstat stream for the whole repository,
    /// optionally bounded below. Drives the global-pass index.
    fn log_since(&self, since: Option<DateTime<Utc>>) -> Result<String>;

    /// Paths touched by any commit after `since`. Drives incremental refresh.
    fn changed_paths_since(&self, since: DateTime<Utc>) -> Result<Vec<String>>;

    /// Hash of the most recent commit touching `path`, used as a cache
    /// fingerprint. `None` when the path has no history.
    fn last_commit_touching(&self, path: &str) -> Result<Option<String>>;
}

/// Upper bound on the path-argument bytes passed to a single `git log`
/// invocation; larger batches are split.
const MAX_BATCH_ARG_BYTES: usize = 8 * 1024;

/// Upper bound on paths per invocation regardless of byte budget.
const MAX_BATCH_FILES: usize = 50;

const LOG_FORMAT: &str = "commit:%H|%an|%ct";

/// History provider backed by the `git` command-line tool.
pub struct GitCliHistory {
    repo_path: PathBuf,
}

impl GitCliHistory {
    /// Open a repository, verifying it actually is one.
    pub fn open(repo_path: impl AsRef<Path>) -> Result<Self> {
        let repo_path = repo_path.as_ref().to_path_buf();
        let probe = Command::new("git")
            .arg("-C")
            .arg(&repo_path)
            .args(["rev-parse", "--git-dir"])
            .output()?;
        if !probe.status.success() {
            return Err(Error::RepoNotFound(repo_path));
        }
        Ok(Self { repo_path })
    }

    /// Run one git command, returning stdout. A non-zero exit is treated as
    /// "no data" (logged, empty output) because per-path queries against
    /// absent history are expected and must not abort a batch.
    fn run_git(&self, args: &[&str]) -> Result<String> {
        debug!("git {}", args.join(" "));
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.repo_path)
            .args(args)
            .output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("git {:?} exited nonzero: {}", args.first(), stderr.trim());
            return Ok(String::new());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn log_for_paths(&self, paths: &[String], since: Option<DateTime<Utc>>) -> Result<String> {
        let format_arg = format!("--format={LOG_FORMAT}");
        let since_arg = since.map(|s| format!("--since={}", s.format("%Y-%m-%d %H:%M:%S")));
        let mut combined = String::new();
        for batch in split_batches(paths, MAX_BATCH_FILES, MAX_BATCH_ARG_BYTES) {
            let mut args: Vec<&str> = vec!["log", &format_arg, "--numstat"];
            if let Some(since_arg) = since_arg.as_deref() {
                args.push(since_arg);
            }
            args.push("--");
            args.extend(batch.iter().map(String::as_str));
            combined.push_str(&self.run_git(&args)?);
        }
        Ok(combined)
    }

    /// Single-file log with rename tracking. `--follow` only works for one
    /// path, which is why batch queries go without it.
    fn log_for_file(&self, path: &str, since: Option<DateTime<Utc>>) -> Result<String> {
        let format_arg = format!("--format={LOG_FORMAT}");
        let since_arg = since.map(|s| format!("--since={}", s.format("%Y-%m-%d %H:%M:%S")));
        let mut args: Vec<&str> = vec!["log", "--follow", &format_arg, "--numstat"];
        if let Some(since_arg) = since_arg.as_deref() {
            args.push(since_arg);
        }
        args.push("--");
        args.push(path);
        self.run_git(&args)
    }
}

impl HistoryProvider for GitCliHistory {
    fn recent_contributors(
        &self,
        path: &str,
        since: DateTime<Utc>,
    ) -> Result<HashMap<String, AuthorAggregate>> {
        let raw = self.log_for_file(path, Some(since))?;
        Ok(parse_log(&raw).into_merged_authors())
    }

    fn all_contributors(&self, path: &str) -> Result<HashMap<String, AuthorAggregate>> {
        let raw = self.log_for_file(path, None)?;
        Ok(parse_log(&raw).into_merged_authors())
    }

    fn active_contributors(&self, window_months: u32) -> Result<ActiveContributorSet> {
        let cutoff = Utc::now() - chrono::Duration::days(30 * i64::from(window_months));
        let since_arg = format!("--since={}", cutoff.format("%Y-%m-%d"));
        let raw = self.run_git(&["log", &since_arg, "--format=%an", "--all"])?;
        Ok(raw
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    fn recent_contributors_batch(
        &self,
        paths: &[String],
        since: DateTime<Utc>,
    ) -> Result<BatchContributors> {
        let raw = self.log_for_paths(paths, Some(since))?;
        let targets = paths.iter().cloned().collect();
        Ok(parse_log_filtered(&raw, Some(&targets)).files)
    }

    fn all_contributors_batch(&self, paths: &[String]) -> Result<BatchContributors> {
        let raw = self.log_for_paths(paths, None)?;
        let targets = paths.iter().cloned().collect();
        Ok(parse_log_filtered(&raw, Some(&targets)).files)
    }

    fn log_since(&self, since: Option<DateTime<Utc>>) -> Result<String> {
        let format_arg = format!("--format={LOG_FORMAT}");
        let since_arg = since.map(|s| format!("--since={}", s.format("%Y-%m-%d %H:%M:%S")));
        let mut args: Vec<&str> = vec!["log", &format_arg, "--numstat"];
        if let Some(since_arg) = since_arg.as_deref() {
            args.push(since_arg);
        }
        self.run_git(&args)
    }

    fn changed_paths_since(&self, since: DateTime<Utc>) -> Result<Vec<String>> {
        let since_arg = format!("--since={}", since.format("%Y-%m-%d %H:%M:%S"));
        let raw = self.run_git(&["log", &since_arg, "--format=", "--name-only"])?;
        let unique: BTreeSet<String> = raw
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(numstat::normalize_rename)
            .collect();
        Ok(unique.into_iter().collect())
    }

    fn last_commit_touching(&self, path: &str) -> Result<Option<String>> {
        let raw = self.run_git(&["log", "-1", "--format=%H", "--", path])?;
        let hash = raw.trim();
        Ok(if hash.is_empty() {
            None
        } else {
            Some(hash.to_string())
        })
    }
}

/// Split a path list into sub-batches that respect both a file-count cap and
/// a command-length budget.
pub fn split_batches(paths: &[String], max_files: usize, max_bytes: usize) -> Vec<Vec<String>> {
    let mut batches = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_bytes = 0usize;

    for path in paths {
        let cost = path.len() + 1;
        let over_bytes = !current.is_empty() && current_bytes + cost > max_bytes;
        if current.len() >= max_files || over_bytes {
            batches.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current_bytes += cost;
        current.push(path.clone());
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}
