//! Cache subsystem.
//!
//! Three tiers: a bounded in-process LRU (tier 1), a persisted key/value
//! store loaded at session start and flushed in the background (tier 2),
//! and the global-pass index answering all per-file lookups from one
//! bounded history scan (tier 3, [`global_index`]).
//!
//! One [`CacheManager`] is constructed per analysis session and passed by
//! reference; there are no process-wide cache singletons. Entry lifecycle:
//! `Absent -> Computing -> Cached -> {StaleByAge | StaleByFingerprint |
//! Invalidated} -> Absent`.

pub mod global_index;
pub mod store;


use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use log::warn;
use lru::LruCache;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::AnalysisConfig;
use store::{PersistedEntry, Store};

pub use global_index::{GlobalIndex, InferenceTier, Lookup};

/// Cache key: a namespace plus the SHA-256 digest of the identifier, so
/// keys stay stable across sessions and never leak path contents into
/// fixed-width storage keys.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct CacheKey {
    pub namespace: String,
    pub digest: String,
}

impl CacheKey {
    pub fn new(namespace: &str, identifier: &str) -> Self {
        let digest = format!("{:x}", Sha256::digest(identifier.as_bytes()));
        Self {
            namespace: namespace.to_string(),
            digest,
        }
    }

    fn storage_key(&self) -> String {
        format!("{}:{}", self.namespace, self.digest)
    }
}

/// Observable state of a cache slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryState {
    Absent,
    Computing,
    Cached,
    StaleByAge,
    StaleByFingerprint,
    Invalidated,
}

/// Hit/miss counters, updated concurrently by workers.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    memory_hits: AtomicU64,
    store_hits: AtomicU64,
}

/// Point-in-time view of [`CacheStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
    pub memory_hits: u64,
    pub store_hits: u64,
}

impl CacheStatsSnapshot {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct MemoryEntry {
    payload: serde_json::Value,
    created_at: DateTime<Utc>,
    fingerprint: Option<String>,
    invalidated: bool,
}

/// Session-scoped cache manager owning tiers 1 and 2.
///
/// The memory tier is the only structure mutated concurrently by batch
/// workers; a single lock serializes access. Persistent writes are
/// fire-and-forget and never fail the caller.
pub struct CacheManager {
    memory: Mutex<LruCache<CacheKey, MemoryEntry>>,
    store: Mutex<Store>,
    computing: Mutex<HashSet<CacheKey>>,
    ttl: chrono::Duration,
    stats: CacheStats,
}

impl CacheManager {
    /// Manager with no persistence; tier 2 lives for the session only.
    pub fn in_memory(config: &AnalysisConfig) -> Self {
        Self::with_store(config, Store::ephemeral())
    }

    /// Manager backed by a persisted store file, loaded now.
    pub fn open(config: &AnalysisConfig, store_path: impl AsRef<Path>) -> Self {
        Self::with_store(config, Store::load(store_path))
    }

    fn with_store(config: &AnalysisConfig, store: Store) -> Self {
        let capacity =
            NonZeroUsize::new(config.cache_capacity.max(1)).expect("capacity clamped to >= 1");
        Self {
            memory: Mutex::new(LruCache::new(capacity)),
            store: Mutex::new(store),
            computing: Mutex::new(HashSet::new()),
            ttl: config.cache_ttl(),
            stats: CacheStats::default(),
        }
    }

    /// Fetch a typed payload. Staleness by age or by fingerprint mismatch is
    /// a miss; the stale entry is dropped so the slot returns to absent.
    pub fn get<T: DeserializeOwned>(
        &self,
        namespace: &str,
        identifier: &str,
        fingerprint: Option<&str>,
    ) -> Option<T> {
        let key = CacheKey::new(namespace, identifier);
        let now = Utc::now();

        if let Some(value) = self.get_memory(&key, fingerprint, now) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            self.stats.memory_hits.fetch_add(1, Ordering::Relaxed);
            return decode(value);
        }
        if let Some(value) = self.get_store(&key, fingerprint, now) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            self.stats.store_hits.fetch_add(1, Ordering::Relaxed);
            return decode(value);
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn get_memory(
        &self,
        key: &CacheKey,
        fingerprint: Option<&str>,
        now: DateTime<Utc>,
    ) -> Option<serde_json::Value> {
        let mut memory = self.memory.lock().expect("cache lock poisoned");
        match memory.get(key) {
            Some(entry) => {
                let stale = entry.invalidated
                    || self.is_stale(
                        entry.created_at,
                        entry.fingerprint.as_deref(),
                        fingerprint,
                        now,
                    );
                if !stale {
                    return Some(entry.payload.clone());
                }
            }
            None => return None,
        }
        memory.pop(key);
        None
    }

    fn get_store(
        &self,
        key: &CacheKey,
        fingerprint: Option<&str>,
        now: DateTime<Utc>,
    ) -> Option<serde_json::Value> {
        let storage_key = key.storage_key();
        let mut store = self.store.lock().expect("store lock poisoned");
        let entry = store.get(&storage_key)?;
        if self.is_stale(entry.created_at, entry.fingerprint.as_deref(), fingerprint, now) {
            store.remove(&storage_key);
            return None;
        }
        let payload = entry.payload.clone();
        let created_at = entry.created_at;
        let entry_fingerprint = entry.fingerprint.clone();
        drop(store);

        // Promote to the memory tier.
        self.memory.lock().expect("cache lock poisoned").put(
            key.clone(),
            MemoryEntry {
                payload: payload.clone(),
                created_at,
                fingerprint: entry_fingerprint,
                invalidated: false,
            },
        );
        Some(payload)
    }

    fn is_stale(
        &self,
        created_at: DateTime<Utc>,
        stored: Option<&str>,
        current: Option<&str>,
        now: DateTime<Utc>,
    ) -> bool {
        if now - created_at >= self.ttl {
            return true;
        }
        match (stored, current) {
            (Some(stored), Some(current)) => stored != current,
            _ => false,
        }
    }

    /// Store a typed payload in both tiers and schedule a background flush.
    pub fn put<T: Serialize>(
        &self,
        namespace: &str,
        identifier: &str,
        value: &T,
        fingerprint: Option<&str>,
    ) {
        let payload = match serde_json::to_value(value) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("unserializable cache payload for {namespace}:{identifier}: {err}");
                return;
            }
        };
        let key = CacheKey::new(namespace, identifier);
        let now = Utc::now();

        self.memory.lock().expect("cache lock poisoned").put(
            key.clone(),
            MemoryEntry {
                payload: payload.clone(),
                created_at: now,
                fingerprint: fingerprint.map(String::from),
                invalidated: false,
            },
        );
        self.store.lock().expect("store lock poisoned").insert(
            key.storage_key(),
            PersistedEntry {
                payload,
                created_at: now,
                fingerprint: fingerprint.map(String::from),
            },
        );
        self.computing.lock().expect("computing lock poisoned").remove(&key);
        self.stats.puts.fetch_add(1, Ordering::Relaxed);
        self.flush_background();
    }

    /// Mark a key as being computed. Returns false when another worker got
    /// there first, so duplicate computations can be skipped. A successful
    /// [`CacheManager::put`] clears the claim.
    pub fn begin_compute(&self, namespace: &str, identifier: &str) -> bool {
        let key = CacheKey::new(namespace, identifier);
        self.computing
            .lock()
            .expect("computing lock poisoned")
            .insert(key)
    }

    /// Release a claim without storing a result, so waiters stop expecting
    /// a computation that will never finish.
    pub fn end_compute(&self, namespace: &str, identifier: &str) {
        let key = CacheKey::new(namespace, identifier);
        self.computing
            .lock()
            .expect("computing lock poisoned")
            .remove(&key);
    }

    /// Explicitly invalidate an entry in both tiers.
    pub fn invalidate(&self, namespace: &str, identifier: &str) {
        let key = CacheKey::new(namespace, identifier);
        let mut memory = self.memory.lock().expect("cache lock poisoned");
        if let Some(entry) = memory.get_mut(&key) {
            entry.invalidated = true;
        }
        drop(memory);
        self.store
            .lock()
            .expect("store lock poisoned")
            .remove(&key.storage_key());
    }

    /// Observable state of one cache slot, without touching LRU order
    /// beyond the probe itself.
    pub fn probe(&self, namespace: &str, identifier: &str, fingerprint: Option<&str>) -> EntryState {
        let key = CacheKey::new(namespace, identifier);
        let now = Utc::now();

        if self
            .computing
            .lock()
            .expect("computing lock poisoned")
            .contains(&key)
        {
            return EntryState::Computing;
        }

        let mut memory = self.memory.lock().expect("cache lock poisoned");
        if let Some(entry) = memory.peek(&key) {
            if entry.invalidated {
                return EntryState::Invalidated;
            }
            if now - entry.created_at >= self.ttl {
                return EntryState::StaleByAge;
            }
            if let (Some(stored), Some(current)) = (entry.fingerprint.as_deref(), fingerprint) {
                if stored != current {
                    return EntryState::StaleByFingerprint;
                }
            }
            return EntryState::Cached;
        }
        drop(memory);

        let store = self.store.lock().expect("store lock poisoned");
        if let Some(entry) = store.get(&key.storage_key()) {
            if now - entry.created_at >= self.ttl {
                return EntryState::StaleByAge;
            }
            if let (Some(stored), Some(current)) = (entry.fingerprint.as_deref(), fingerprint) {
                if stored != current {
                    return EntryState::StaleByFingerprint;
                }
            }
            return EntryState::Cached;
        }
        EntryState::Absent
    }

    /// Snapshot of hit/miss counters.
    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            puts: self.stats.puts.load(Ordering::Relaxed),
            memory_hits: self.stats.memory_hits.load(Ordering::Relaxed),
            store_hits: self.stats.store_hits.load(Ordering::Relaxed),
        }
    }

    /// Synchronous flush, used at shutdown and in tests. Failures are
    /// logged and swallowed.
    pub fn flush(&self) {
        let mut store = self.store.lock().expect("store lock poisoned");
        if let Err(err) = store.write() {
            warn!("persistent cache flush failed: {err}");
        }
    }

    /// Drop expired tier-2 entries, returning how many were removed.
    pub fn clear_expired(&self) -> usize {
        self.store
            .lock()
            .expect("store lock poisoned")
            .clear_expired(self.ttl, Utc::now())
    }

    /// Fire-and-forget background flush. Prunes the shared store under the
    /// lock, then writes the snapshot on a blocking tokio task when a
    /// runtime is available, a plain thread otherwise; either way a write
    /// failure only produces a warning.
    fn flush_background(&self) {
        let (path, entries) = {
            let mut store = self.store.lock().expect("store lock poisoned");
            store.prune();
            store.snapshot()
        };
        let Some(path) = path else {
            return;
        };
        let write = move || {
            if let Err(err) = store::write_entries(&path, &entries) {
                warn!("background cache flush failed: {err}");
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(write);
            }
            Err(_) => {
                std::thread::spawn(write);
            }
        }
    }
}

fn decode<T: DeserializeOwned>(value: serde_json::Value) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(decoded) => Some(decoded),
        Err(err) => {
            // Corrupt payload: treat as a miss and let the caller recompute.
            warn!("discarding undecodable cache payload: {err}");
            None
        }
    }
}
