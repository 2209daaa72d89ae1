//! Shared fakes for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::history::{parse_log, parse_log_filtered, BatchContributors, HistoryProvider};
use crate::types::{ActiveContributorSet, AuthorAggregate};

/// Scripted history backend: serves a canned log stream instead of
/// shelling out to git. Bounded queries return the full stream until a
/// delta is scripted via [`FakeHistory::set_delta`], after which they
/// return only the delta, mimicking an incremental scan.
pub struct FakeHistory {
    full_log: Mutex<String>,
    delta_log: Mutex<Option<String>>,
    fingerprints: Mutex<HashMap<String, String>>,
    active: ActiveContributorSet,
}

impl FakeHistory {
    pub fn new(full_log: &str) -> Self {
        Self {
            full_log: Mutex::new(full_log.to_string()),
            delta_log: Mutex::new(None),
            fingerprints: Mutex::new(HashMap::new()),
            active: ActiveContributorSet::new(),
        }
    }

    pub fn with_active(mut self, authors: &[&str]) -> Self {
        self.active = authors.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn set_delta(&self, delta: &str) {
        *self.delta_log.lock().unwrap() = Some(delta.to_string());
    }

    pub fn set_fingerprint(&self, path: &str, fingerprint: &str) {
        self.fingerprints
            .lock()
            .unwrap()
            .insert(path.to_string(), fingerprint.to_string());
    }

    fn full(&self) -> String {
        self.full_log.lock().unwrap().clone()
    }
}

impl HistoryProvider for FakeHistory {
    fn recent_contributors(
        &self,
        path: &str,
        _since: DateTime<Utc>,
    ) -> Result<HashMap<String, AuthorAggregate>> {
        self.all_contributors(path)
    }

    fn all_contributors(&self, path: &str) -> Result<HashMap<String, AuthorAggregate>> {
        let targets = [path.to_string()].into();
        Ok(parse_log_filtered(&self.full(), Some(&targets)).into_merged_authors())
    }

    fn active_contributors(&self, _window_months: u32) -> Result<ActiveContributorSet> {
        Ok(self.active.clone())
    }

    fn recent_contributors_batch(
        &self,
        paths: &[String],
        _since: DateTime<Utc>,
    ) -> Result<BatchContributors> {
        self.all_contributors_batch(paths)
    }

    fn all_contributors_batch(&self, paths: &[String]) -> Result<BatchContributors> {
        let targets = paths.iter().cloned().collect();
        Ok(parse_log_filtered(&self.full(), Some(&targets)).files)
    }

    fn log_since(&self, since: Option<DateTime<Utc>>) -> Result<String> {
        if since.is_some() {
            if let Some(delta) = self.delta_log.lock().unwrap().clone() {
                return Ok(delta);
            }
        }
        Ok(self.full())
    }

    fn changed_paths_since(&self, _since: DateTime<Utc>) -> Result<Vec<String>> {
        let delta = self.delta_log.lock().unwrap().clone().unwrap_or_default();
        let mut paths: Vec<String> = parse_log(&delta).files.into_keys().collect();
        paths.sort_unstable();
        Ok(paths)
    }

    fn last_commit_touching(&self, path: &str) -> Result<Option<String>> {
        Ok(self.fingerprints.lock().unwrap().get(path).cloned())
    }
}
