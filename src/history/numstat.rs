//! History extractor: turns raw `git log` commit-header / numstat output
//! into per-file, per-author aggregates.
//!
//! Input shape (one bounded scan, see [`crate::history::GitCliHistory`]):
//!
//! ```text
//! commit:<hash>|<author>|<epoch>
//! 12   3   src/lib.rs
//! -    -   assets/logo.png
//! 4    0   src/{old => new}/mod.rs
//! ```
//!
//! Binary churn fields (`-`) count as zero. Rename notation collapses to
//! the post-rename logical path. Malformed lines are skipped and counted,
//! never fatal.

use std::collections::{HashMap, HashSet};

use crate::types::AuthorAggregate;

/// Prefix marking a commit header line in the raw log stream.
pub const COMMIT_PREFIX: &str = "commit:";

/// Counters describing one parse pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ParseStats {
    /// Commit headers successfully parsed
    pub commits: usize,
    /// File change lines attributed to an author
    pub file_changes: usize,
    /// Lines that matched neither a header nor a numstat record
    pub anomalies: usize,
}

/// Complete result of one extraction pass.
#[derive(Clone, Debug, Default)]
pub struct HistoryTable {
    /// Logical file path -> author -> aggregate
    pub files: HashMap<String, HashMap<String, AuthorAggregate>>,
    /// Author -> commit count across the scanned window
    pub author_activity: HashMap<String, usize>,
    pub stats: ParseStats,
}

impl HistoryTable {
    /// Merge a later scan into this table. Entries for untouched files are
    /// left exactly as they were.
    pub fn merge(&mut self, newer: HistoryTable) {
        for (path, authors) in newer.files {
            let slot = self.files.entry(path).or_default();
            for (author, agg) in authors {
                slot.entry(author).or_default().merge(&agg);
            }
        }
        for (author, count) in newer.author_activity {
            *self.author_activity.entry(author).or_insert(0) += count;
        }
        self.stats.commits += newer.stats.commits;
        self.stats.file_changes += newer.stats.file_changes;
        self.stats.anomalies += newer.stats.anomalies;
    }

    /// Collapse every per-path aggregate into a single author map. Used for
    /// single-file queries where the scan was already filtered to one
    /// logical file and the remaining path variants are rename aliases.
    pub fn into_merged_authors(self) -> HashMap<String, AuthorAggregate> {
        let mut merged: HashMap<String, AuthorAggregate> = HashMap::new();
        for authors in self.files.into_values() {
            for (author, agg) in authors {
                merged.entry(author).or_default().merge(&agg);
            }
        }
        merged
    }
}

/// Parse a raw log stream into a [`HistoryTable`].
pub fn parse_log(raw: &str) -> HistoryTable {
    parse_log_filtered(raw, None)
}

/// Parse a raw log stream, keeping only files in `targets` when given.
/// Author activity still counts every commit seen, matching a bounded
/// whole-repository scan.
pub fn parse_log_filtered(raw: &str, targets: Option<&HashSet<String>>) -> HistoryTable {
    let mut table = HistoryTable::default();
    let mut current_author: Option<String> = None;
    let mut current_time: i64 = 0;

    for line in raw.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }

        if let Some(header) = line.strip_prefix(COMMIT_PREFIX) {
            match parse_header(header) {
                Some((author, time)) => {
                    *table.author_activity.entry(author.clone()).or_insert(0) += 1;
                    current_author = Some(author);
                    current_time = time;
                    table.stats.commits += 1;
                }
                None => {
                    // Garbled header: drop it and everything up to the next
                    // valid one so churn is never misattributed.
                    current_author = None;
                    table.stats.anomalies += 1;
                }
            }
            continue;
        }

        let Some(author) = current_author.as_deref() else {
            table.stats.anomalies += 1;
            continue;
        };

        match parse_numstat_line(line) {
            Some((added, deleted, path)) => {
                if let Some(targets) = targets {
                    if !targets.contains(&path) {
                        continue;
                    }
                }
                let agg = table
                    .files
                    .entry(path)
                    .or_default()
                    .entry(author.to_string())
                    .or_default();
                agg.commits += 1;
                agg.lines_added += added;
                agg.lines_deleted += deleted;
                agg.commit_times.push(current_time);
                table.stats.file_changes += 1;
            }
            None => table.stats.anomalies += 1,
        }
    }

    table
}

/// Parse `<hash>|<author>|<epoch>`. The hash itself is not retained here;
/// fingerprinting happens per path via the provider.
fn parse_header(header: &str) -> Option<(String, i64)> {
    let mut parts = header.splitn(3, '|');
    let _hash = parts.next()?;
    let author = parts.next()?.trim();
    if author.is_empty() {
        return None;
    }
    let time = parts.next().and_then(|t| t.trim().parse::<i64>().ok())?;
    Some((author.to_string(), time))
}

/// Parse one `added<TAB>deleted<TAB>path` record.
fn parse_numstat_line(line: &str) -> Option<(usize, usize, String)> {
    let mut parts = line.splitn(3, '\t');
    let added = parse_churn(parts.next()?)?;
    let deleted = parse_churn(parts.next()?)?;
    let path = parts.next()?.trim();
    if path.is_empty() {
        return None;
    }
    Some((added, deleted, normalize_rename(path)))
}

/// Churn field: a count, or `-` for binary files (counted as zero).
fn parse_churn(field: &str) -> Option<usize> {
    let field = field.trim();
    if field == "-" {
        return Some(0);
    }
    field.parse().ok()
}

/// Reduce rename notation to the post-rename path.
///
/// Handles both the brace form `dir/{old => new}/file` (including an empty
/// side, `src/{ => sub}/file`) and the whole-path form `old.rs => new.rs`.
pub fn normalize_rename(path: &str) -> String {
    if let (Some(open), Some(close)) = (path.find('{'), path.find('}')) {
        if open < close {
            let inner = &path[open + 1..close];
            if let Some((_, new)) = inner.split_once(" => ") {
                let mut out = String::with_capacity(path.len());
                out.push_str(&path[..open]);
                out.push_str(new);
                out.push_str(&path[close + 1..]);
                // An empty rename side leaves a doubled separator behind.
                return out.replace("//", "/");
            }
        }
    }
    match path.split_once(" => ") {
        Some((_, new)) => new.to_string(),
        None => path.to_string(),
    }
}
