//! # Common Types
//!
//! This module contains the common types used throughout the crate for
//! representing contributor history, candidate rankings, and assignment
//! decisions.

use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Set of authors with at least one commit inside the configured recency
/// window. Computed once per run and treated as read-only afterwards.
pub type ActiveContributorSet = HashSet<String>;

/// Raw per-author history aggregate for a single file, as produced by the
/// extractor before any scoring is applied.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorAggregate {
    /// Number of commits by this author touching the file
    pub commits: usize,
    /// Lines added across those commits
    pub lines_added: usize,
    /// Lines deleted across those commits
    pub lines_deleted: usize,
    /// Commit timestamps (epoch seconds), used for time-decay and
    /// consistency scoring
    #[serde(default)]
    pub commit_times: Vec<i64>,
}

impl AuthorAggregate {
    /// Total churn (lines added plus deleted) attributed to this author.
    pub fn churn(&self) -> usize {
        self.lines_added + self.lines_deleted
    }

    /// Fold another aggregate into this one.
    pub fn merge(&mut self, other: &AuthorAggregate) {
        self.commits += other.commits;
        self.lines_added += other.lines_added;
        self.lines_deleted += other.lines_deleted;
        self.commit_times.extend_from_slice(&other.commit_times);
    }
}

/// Weighted contributor statistics for one (file, author) pair.
///
/// Owned by the scoring engine for the duration of one analysis pass and
/// handed to the external plan layer afterwards. Both the raw and the
/// normalized score are always populated so downstream tie-breaking can
/// choose either.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContributorStat {
    /// Author identity as reported by the history provider
    pub author: String,
    /// Commits inside the recent analysis window
    pub recent_commits: usize,
    /// Commits across the full history
    pub total_commits: usize,
    /// Lines added inside the recent window
    pub recent_lines_added: usize,
    /// Lines deleted inside the recent window
    pub recent_lines_deleted: usize,
    /// Lines added across the full history
    pub total_lines_added: usize,
    /// Lines deleted across the full history
    pub total_lines_deleted: usize,
    /// Commit timestamps (epoch seconds) inside the recent window
    #[serde(skip)]
    pub commit_times: Vec<i64>,
    /// Score before normalization
    pub raw_score: f64,
    /// Score after normalization across the candidate set
    pub normalized_score: f64,
    /// Whether the author is in the active contributor set
    pub is_active: bool,
}

impl ContributorStat {
    /// Build a stat from recent and total aggregates for one author.
    pub fn from_aggregates(
        author: &str,
        recent: Option<&AuthorAggregate>,
        total: Option<&AuthorAggregate>,
    ) -> Self {
        let empty = AuthorAggregate::default();
        let recent = recent.unwrap_or(&empty);
        // A file's total history always covers the recent window; if the
        // provider only returned recent data, fall back to it.
        let total = total.unwrap_or(recent);
        Self {
            author: author.to_string(),
            recent_commits: recent.commits,
            total_commits: total.commits.max(recent.commits),
            recent_lines_added: recent.lines_added,
            recent_lines_deleted: recent.lines_deleted,
            total_lines_added: total.lines_added.max(recent.lines_added),
            total_lines_deleted: total.lines_deleted.max(recent.lines_deleted),
            commit_times: recent.commit_times.clone(),
            raw_score: 0.0,
            normalized_score: 0.0,
            is_active: false,
        }
    }

    /// Churn inside the recent window.
    pub fn recent_lines(&self) -> usize {
        self.recent_lines_added + self.recent_lines_deleted
    }

    /// Churn across the full history.
    pub fn total_lines(&self) -> usize {
        self.total_lines_added + self.total_lines_deleted
    }

    /// Coarse activity classification used in decision audit data.
    pub fn activity_level(&self) -> ActivityLevel {
        if !self.is_active {
            return ActivityLevel::Inactive;
        }
        match self.recent_commits {
            n if n >= 15 => ActivityLevel::High,
            n if n >= 5 => ActivityLevel::Medium,
            _ => ActivityLevel::Low,
        }
    }
}

/// Activity classification for a contributor relative to the recency window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityLevel {
    High,
    Medium,
    Low,
    Inactive,
}

/// Ranked contributor list for one file, score-descending.
///
/// Built once per file per analysis run and immutable after construction.
/// Ties on score are broken by author id in lexical ascending order so the
/// ranking is deterministic for identical input history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileContributorIndex {
    /// Logical file path the ranking belongs to
    pub path: String,
    /// Contributors, best candidate first
    pub contributors: Vec<ContributorStat>,
}

impl FileContributorIndex {
    /// Empty index for a path with no history data.
    pub fn empty(path: &str) -> Self {
        Self {
            path: path.to_string(),
            contributors: Vec::new(),
        }
    }

    /// The highest-ranked contributor, if any.
    pub fn top(&self) -> Option<&ContributorStat> {
        self.contributors.first()
    }

    pub fn is_empty(&self) -> bool {
        self.contributors.is_empty()
    }
}

/// A file or directory group requiring exactly one assignment decision.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkUnit {
    /// Stable identifier used to key merged batch results
    pub id: String,
    /// Paths covered by this unit
    pub paths: Vec<String>,
}

impl WorkUnit {
    /// Work unit covering a single file.
    pub fn single(path: &str) -> Self {
        Self {
            id: path.to_string(),
            paths: vec![path.to_string()],
        }
    }

    /// Work unit covering a named group of files.
    pub fn group(id: &str, paths: Vec<String>) -> Self {
        Self {
            id: id.to_string(),
            paths,
        }
    }
}

/// Why an assignment decision came out the way it did.
///
/// Exactly one reason code is recorded per decision. The string form is
/// stable and consumed by the external presentation layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReasonCode {
    /// Top candidate was eligible and under quota
    Direct,
    /// Top candidate was over quota; a lower-ranked candidate was picked
    LoadBalanced,
    /// Resolved from an ancestor directory's aggregate contributors
    DirectoryFallback(String),
    /// Resolved from repository-wide author activity
    GlobalFallback,
    /// No history data for the unit through any tier
    NoData,
    /// Only candidates were outside the recency window
    ExcludedInactive,
    /// Only candidates were on the explicit exclusion list
    ExcludedManual,
    /// Every eligible candidate had reached the per-person quota
    OverQuota,
}

impl ReasonCode {
    /// Whether this decision went through a fallback tier.
    pub fn is_fallback(&self) -> bool {
        matches!(
            self,
            ReasonCode::DirectoryFallback(_) | ReasonCode::GlobalFallback
        )
    }

    /// Whether the decision left the unit unassigned.
    pub fn is_unassigned(&self) -> bool {
        matches!(
            self,
            ReasonCode::NoData
                | ReasonCode::ExcludedInactive
                | ReasonCode::ExcludedManual
                | ReasonCode::OverQuota
        )
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReasonCode::Direct => write!(f, "direct"),
            ReasonCode::LoadBalanced => write!(f, "load-balanced"),
            ReasonCode::DirectoryFallback(dir) => write!(f, "directory-fallback:{}", dir),
            ReasonCode::GlobalFallback => write!(f, "global-fallback"),
            ReasonCode::NoData => write!(f, "no-data"),
            ReasonCode::ExcludedInactive => write!(f, "excluded-inactive"),
            ReasonCode::ExcludedManual => write!(f, "excluded-manual"),
            ReasonCode::OverQuota => write!(f, "over-quota"),
        }
    }
}

impl std::str::FromStr for ReasonCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(ReasonCode::Direct),
            "load-balanced" => Ok(ReasonCode::LoadBalanced),
            "global-fallback" => Ok(ReasonCode::GlobalFallback),
            "no-data" => Ok(ReasonCode::NoData),
            "excluded-inactive" => Ok(ReasonCode::ExcludedInactive),
            "excluded-manual" => Ok(ReasonCode::ExcludedManual),
            "over-quota" => Ok(ReasonCode::OverQuota),
            other => match other.strip_prefix("directory-fallback:") {
                Some(dir) => Ok(ReasonCode::DirectoryFallback(dir.to_string())),
                None => Err(format!("unknown reason code: {other}")),
            },
        }
    }
}

impl Serialize for ReasonCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ReasonCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// The outcome of resolving one work unit. Created exactly once per unit
/// per assignment run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssignmentDecision {
    /// Work unit this decision belongs to
    pub unit_id: String,
    /// Chosen owner, or `None` when every tier was exhausted
    pub primary: Option<String>,
    /// Ranked runner-up candidates (bounded by `max_alternates`)
    pub alternates: Vec<String>,
    /// Exactly one reason code describing the tier used
    pub reason: ReasonCode,
    /// Total candidates considered for the unit
    pub candidate_count: usize,
    /// Candidates that passed exclusion, activity, and quota checks
    pub eligible_count: usize,
}

/// Per-author count of currently assigned work units.
///
/// Mutated only by the assignment engine during its single sequential pass,
/// so no concurrent-write protection is needed.
#[derive(Clone, Debug, Default)]
pub struct WorkloadCounter {
    counts: HashMap<String, usize>,
}

impl WorkloadCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current number of assignments for an author.
    pub fn count(&self, author: &str) -> usize {
        self.counts.get(author).copied().unwrap_or(0)
    }

    /// Whether another assignment would keep the author within quota.
    pub fn under_quota(&self, author: &str, max_tasks: usize) -> bool {
        self.count(author) < max_tasks
    }

    /// Record one finalized assignment.
    pub fn record(&mut self, author: &str) {
        *self.counts.entry(author.to_string()).or_insert(0) += 1;
    }

    /// Snapshot of the distribution, heaviest first.
    pub fn distribution(&self) -> Vec<(String, usize)> {
        let mut out: Vec<_> = self.counts.iter().map(|(a, c)| (a.clone(), *c)).collect();
        out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        out
    }
}

/// Convert epoch seconds into a UTC datetime, clamping garbage to the epoch.
pub fn datetime_from_epoch(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
