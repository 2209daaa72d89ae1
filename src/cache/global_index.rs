//! Tier-3 "global pass" index.
//!
//! Instead of one history scan per file, a single bounded-window scan
//! builds the complete file -> author -> aggregate table plus overall
//! author activity; per-file lookups become table lookups. Files missing
//! from the table (new or renamed since the window) are answered by a
//! heuristic inference cascade, ordered from most to least specific:
//! exact directory, ancestor directory, extension family, filename
//! similarity, and finally global activity weighting.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use once_cell::sync::Lazy;

use crate::config::AnalysisConfig;
use crate::error::Result;
use crate::history::{parse_log, HistoryProvider};
use crate::types::AuthorAggregate;

/// Related extension groups: a miss on `.ts` may still borrow signal from
/// `.js` contributors.
static EXTENSION_FAMILIES: Lazy<Vec<&[&str]>> = Lazy::new(|| {
    vec![
        &["py", "pyw", "pyi"][..],
        &["js", "jsx", "ts", "tsx"][..],
        &["cpp", "c", "cc", "cxx"][..],
        &["h", "hpp", "hxx"][..],
        &["md", "txt", "rst"][..],
        &["json", "yaml", "yml", "toml"][..],
        &["rs"][..],
    ]
});

/// Filename keywords that mark files of the same flavor.
const NAME_KEYWORDS: &[&str] = &["test", "main", "config", "utils", "helper", "core", "mod"];

/// Which inference tier answered a lookup for a file absent from the table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InferenceTier {
    ExactDirectory(String),
    AncestorDirectory(String),
    ExtensionFamily(String),
    NameSimilarity,
    GlobalActivity,
}

/// Result of a per-file lookup against the index.
#[derive(Clone, Debug, PartialEq)]
pub enum Lookup {
    /// The file was in the scanned table.
    Direct(HashMap<String, AuthorAggregate>),
    /// The file was absent; contributors were inferred.
    Inferred(HashMap<String, AuthorAggregate>, InferenceTier),
    /// Nothing known repo-wide.
    Unknown,
}

impl Lookup {
    /// The aggregates regardless of how they were obtained.
    pub fn aggregates(&self) -> Option<&HashMap<String, AuthorAggregate>> {
        match self {
            Lookup::Direct(a) | Lookup::Inferred(a, _) => Some(a),
            Lookup::Unknown => None,
        }
    }

    pub fn was_inferred(&self) -> bool {
        matches!(self, Lookup::Inferred(..))
    }
}

/// The global-pass table and its refresh bookkeeping.
#[derive(Clone, Debug)]
pub struct GlobalIndex {
    files: HashMap<String, HashMap<String, AuthorAggregate>>,
    author_activity: HashMap<String, usize>,
    last_refresh: DateTime<Utc>,
    window_months: u32,
    anomalies: usize,
}

impl GlobalIndex {
    /// Build the index from one bounded-window scan.
    pub fn build(provider: &dyn HistoryProvider, config: &AnalysisConfig) -> Result<Self> {
        let now = Utc::now();
        let cutoff = config.recent_cutoff(now);
        let raw = provider.log_since(Some(cutoff))?;
        let table = parse_log(&raw);
        info!(
            "global pass indexed {} files, {} authors ({} anomalies)",
            table.files.len(),
            table.author_activity.len(),
            table.stats.anomalies
        );
        Ok(Self {
            files: table.files,
            author_activity: table.author_activity,
            last_refresh: now,
            window_months: config.analysis_months,
            anomalies: table.stats.anomalies,
        })
    }

    /// Index built directly from a parsed table (tests, replays).
    pub fn from_table(
        files: HashMap<String, HashMap<String, AuthorAggregate>>,
        author_activity: HashMap<String, usize>,
        last_refresh: DateTime<Utc>,
    ) -> Self {
        Self {
            files,
            author_activity,
            last_refresh,
            window_months: 12,
            anomalies: 0,
        }
    }

    /// Re-scan only commits since the last refresh and merge them in.
    /// Entries for untouched files are left unchanged. Returns the paths
    /// whose entries were updated.
    pub fn refresh_incremental(&mut self, provider: &dyn HistoryProvider) -> Result<Vec<String>> {
        let since = self.last_refresh;
        let now = Utc::now();
        let raw = provider.log_since(Some(since))?;
        let delta = parse_log(&raw);
        let mut touched: Vec<String> = delta.files.keys().cloned().collect();
        touched.sort_unstable();
        debug!(
            "incremental refresh: {} commits touched {} files",
            delta.stats.commits,
            touched.len()
        );
        self.anomalies += delta.stats.anomalies;
        for (path, authors) in delta.files {
            let slot = self.files.entry(path).or_default();
            for (author, agg) in authors {
                slot.entry(author).or_default().merge(&agg);
            }
        }
        for (author, count) in delta.author_activity {
            *self.author_activity.entry(author).or_insert(0) += count;
        }
        self.last_refresh = now;
        Ok(touched)
    }

    /// Whether an incremental refresh is worthwhile for this request: most
    /// of the files must already be covered and the request non-trivial.
    pub fn should_refresh_incrementally(&self, paths: &[String], config: &AnalysisConfig) -> bool {
        if paths.len() < config.incremental_min_files {
            return false;
        }
        let covered = paths.iter().filter(|p| self.files.contains_key(*p)).count();
        covered as f64 / paths.len() as f64 >= config.incremental_overlap_ratio
    }

    /// Whether the whole index has outlived the cache TTL and needs a full
    /// rebuild rather than a merge.
    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        now - self.last_refresh >= ttl
    }

    pub fn last_refresh(&self) -> DateTime<Utc> {
        self.last_refresh
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn anomaly_count(&self) -> usize {
        self.anomalies
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    /// Direct table access for one file, no inference.
    pub fn file_aggregates(&self, path: &str) -> Option<&HashMap<String, AuthorAggregate>> {
        self.files.get(path)
    }

    /// Overall author activity across the scanned window.
    pub fn author_activity(&self) -> &HashMap<String, usize> {
        &self.author_activity
    }

    /// Aggregate contributors across every indexed file under `dir`.
    pub fn directory_aggregate(&self, dir: &str) -> HashMap<String, AuthorAggregate> {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        let mut merged: HashMap<String, AuthorAggregate> = HashMap::new();
        for (path, authors) in &self.files {
            if dir.is_empty() || path.starts_with(&prefix) {
                for (author, agg) in authors {
                    merged.entry(author.clone()).or_default().merge(agg);
                }
            }
        }
        merged
    }

    /// Answer a per-file lookup, falling back through the inference cascade
    /// when the file is absent from the table.
    pub fn lookup(&self, path: &str) -> Lookup {
        if let Some(aggregates) = self.files.get(path) {
            return Lookup::Direct(aggregates.clone());
        }
        self.infer(path)
    }

    fn infer(&self, path: &str) -> Lookup {
        if let Some(lookup) = self.infer_from_directories(path) {
            return lookup;
        }
        if let Some(lookup) = self.infer_from_extension(path) {
            return lookup;
        }
        if let Some(lookup) = self.infer_from_name(path) {
            return lookup;
        }
        self.infer_from_activity()
    }

    /// Exact directory first, then ancestors nearest-first via an explicit
    /// worklist (no recursion, deep trees are fine).
    fn infer_from_directories(&self, path: &str) -> Option<Lookup> {
        let dir = parent_dir(path)?;

        // Exact siblings weigh triple: same directory is the strongest hint.
        let mut exact: HashMap<String, AuthorAggregate> = HashMap::new();
        for (candidate, authors) in &self.files {
            if parent_dir(candidate).as_deref() == Some(dir.as_str()) {
                for (author, agg) in authors {
                    let slot = exact.entry(author.clone()).or_default();
                    slot.commits += agg.commits * 3;
                    slot.lines_added += agg.lines_added;
                    slot.lines_deleted += agg.lines_deleted;
                }
            }
        }
        if !exact.is_empty() {
            return Some(Lookup::Inferred(exact, InferenceTier::ExactDirectory(dir)));
        }

        let mut worklist: Vec<String> = ancestor_dirs(path);
        // ancestor_dirs is nearest-first already; pop from the front.
        worklist.reverse();
        while let Some(ancestor) = worklist.pop() {
            let merged = self.directory_aggregate(&ancestor);
            if !merged.is_empty() {
                return Some(Lookup::Inferred(
                    merged,
                    InferenceTier::AncestorDirectory(ancestor),
                ));
            }
        }
        None
    }

    fn infer_from_extension(&self, path: &str) -> Option<Lookup> {
        let ext = file_extension(path)?;
        let family = EXTENSION_FAMILIES
            .iter()
            .find(|group| group.contains(&ext.as_str()))
            .copied();

        let mut merged: HashMap<String, AuthorAggregate> = HashMap::new();
        for (candidate, authors) in &self.files {
            let Some(candidate_ext) = file_extension(candidate) else {
                continue;
            };
            // Exact extension matches weigh double over family matches.
            let weight = if candidate_ext == ext {
                2
            } else if family.is_some_and(|g| g.contains(&candidate_ext.as_str())) {
                1
            } else {
                continue;
            };
            for (author, agg) in authors {
                let slot = merged.entry(author.clone()).or_default();
                slot.commits += agg.commits * weight;
                slot.lines_added += agg.lines_added;
                slot.lines_deleted += agg.lines_deleted;
            }
        }
        if merged.is_empty() {
            None
        } else {
            Some(Lookup::Inferred(merged, InferenceTier::ExtensionFamily(ext)))
        }
    }

    fn infer_from_name(&self, path: &str) -> Option<Lookup> {
        let name = file_name(path).to_ascii_lowercase();
        let mut merged: HashMap<String, AuthorAggregate> = HashMap::new();
        for (candidate, authors) in &self.files {
            let candidate_name = file_name(candidate).to_ascii_lowercase();
            let similarity = name_similarity(&name, &candidate_name);
            if similarity == 0 {
                continue;
            }
            for (author, agg) in authors {
                let slot = merged.entry(author.clone()).or_default();
                slot.commits += agg.commits * similarity;
            }
        }
        if merged.is_empty() {
            None
        } else {
            Some(Lookup::Inferred(merged, InferenceTier::NameSimilarity))
        }
    }

    /// Last resort: weight every known author by overall activity share.
    fn infer_from_activity(&self) -> Lookup {
        if self.author_activity.is_empty() {
            return Lookup::Unknown;
        }
        let total: usize = self.author_activity.values().sum();
        let merged: HashMap<String, AuthorAggregate> = self
            .author_activity
            .iter()
            .map(|(author, activity)| {
                let weight = ((activity * 5) / total.max(1)).max(1);
                (
                    author.clone(),
                    AuthorAggregate {
                        commits: weight,
                        ..AuthorAggregate::default()
                    },
                )
            })
            .collect();
        Lookup::Inferred(merged, InferenceTier::GlobalActivity)
    }

    /// Months covered by the scan window; the scoring layer uses this when
    /// table aggregates double as both recent and total history.
    pub fn window_months(&self) -> u32 {
        self.window_months
    }
}

/// Parent directory of a path, `None` for root-level files.
pub fn parent_dir(path: &str) -> Option<String> {
    path.rsplit_once('/').map(|(dir, _)| dir.to_string())
}

/// All ancestor directories of a path, nearest first.
pub fn ancestor_dirs(path: &str) -> Vec<String> {
    let mut dirs = Vec::new();
    let mut current = path;
    while let Some((dir, _)) = current.rsplit_once('/') {
        dirs.push(dir.to_string());
        current = dir;
    }
    dirs
}

fn file_extension(path: &str) -> Option<String> {
    let name = file_name(path);
    name.rsplit_once('.')
        .filter(|(stem, _)| !stem.is_empty())
        .map(|(_, ext)| ext.to_ascii_lowercase())
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Similarity weight between two file names: shared 3-char prefix counts 1,
/// each shared flavor keyword counts 2.
fn name_similarity(a: &str, b: &str) -> usize {
    if a == b && !a.is_empty() {
        // Same basename elsewhere in the tree is a strong signal on its own.
        return 3;
    }
    let mut score = 0;
    let prefix: String = a.chars().take(3).collect();
    if prefix.chars().count() == 3 && b.starts_with(&prefix) {
        score += 1;
    }
    for keyword in NAME_KEYWORDS {
        if a.contains(keyword) && b.contains(keyword) {
            score += 2;
        }
    }
    score
}
