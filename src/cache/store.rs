//! Tier-2 persisted cache store.
//!
//! A single JSON document mapping `namespace:digest` keys to payloads with
//! timestamps and optional repository fingerprints. Loaded once at session
//! start; flushed in the background by [`crate::cache::CacheManager`]. A
//! corrupt store is discarded and recomputed; a failed write is logged and
//! ignored. Neither is ever fatal.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Entries beyond this count are pruned oldest-first on flush.
const MAX_STORE_ENTRIES: usize = 5000;
/// How many entries survive a prune.
const PRUNE_KEEP_ENTRIES: usize = 4000;

/// One persisted payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistedEntry {
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

/// In-memory image of the persisted store.
#[derive(Clone, Debug, Default)]
pub struct Store {
    path: Option<PathBuf>,
    entries: HashMap<String, PersistedEntry>,
}

impl Store {
    /// Store with no backing file; contents live for the session only.
    pub fn ephemeral() -> Self {
        Self::default()
    }

    /// Load the store from disk. Missing file means an empty store; an
    /// unreadable or structurally invalid file is discarded with a warning.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<HashMap<String, PersistedEntry>>(&raw) {
                Ok(entries) => {
                    debug!("loaded {} persisted cache entries", entries.len());
                    entries
                }
                Err(err) => {
                    warn!("discarding corrupt cache store {}: {err}", path.display());
                    HashMap::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => {
                warn!("cannot read cache store {}: {err}", path.display());
                HashMap::new()
            }
        };
        Self {
            path: Some(path),
            entries,
        }
    }

    pub fn get(&self, key: &str) -> Option<&PersistedEntry> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: String, entry: PersistedEntry) {
        self.entries.insert(key, entry);
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop entries older than `ttl`, returning how many were removed.
    pub fn clear_expired(&mut self, ttl: chrono::Duration, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| now - e.created_at < ttl);
        before - self.entries.len()
    }

    /// Drop the oldest entries when the store is over budget.
    pub fn prune(&mut self) {
        if self.entries.len() <= MAX_STORE_ENTRIES {
            return;
        }
        let mut by_age: Vec<(String, DateTime<Utc>)> = self
            .entries
            .iter()
            .map(|(k, e)| (k.clone(), e.created_at))
            .collect();
        by_age.sort_by_key(|(_, t)| *t);
        for (key, _) in by_age
            .into_iter()
            .take(self.entries.len() - PRUNE_KEEP_ENTRIES)
        {
            self.entries.remove(&key);
        }
    }

    /// Write the store to its backing file, pruning oldest entries first
    /// when over budget. Errors are reported to the caller, which logs and
    /// ignores them.
    pub fn write(&mut self) -> std::io::Result<()> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };
        self.prune();
        write_entries(&path, &self.entries)
    }

    /// Snapshot of the entry map for background flushing. Callers prune
    /// first so the snapshot never exceeds the store budget.
    pub fn snapshot(&self) -> (Option<PathBuf>, HashMap<String, PersistedEntry>) {
        (self.path.clone(), self.entries.clone())
    }
}

static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Serialize an entry map into place via a same-directory temp file and
/// rename, so a concurrent reader or a second flush never observes a
/// half-written document.
pub fn write_entries(
    path: &Path,
    entries: &HashMap<String, PersistedEntry>,
) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = serde_json::to_vec_pretty(entries)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let seq = WRITE_SEQ.fetch_add(1, Ordering::Relaxed);
    let tmp = path.with_extension(format!("tmp-{}-{seq}", std::process::id()));
    fs::write(&tmp, body)?;
    fs::rename(&tmp, path)
}
