//! Batch orchestration: bounded-concurrency analysis followed by a
//! sequential assignment pass.
//!
//! Analysis work (history queries, parsing, scoring) runs on a worker
//! pool sized from the config, each unit isolated so one bad path cannot
//! sink the batch. Workers send their per-file rankings over a channel to
//! a single consumer, which owns the merged ranking map; no worker ever
//! writes shared state. Assignment then runs sequentially on the merged
//! result so quota accounting is deterministic.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{info, warn};
use tokio::sync::{mpsc, Semaphore};
use tokio::task;
use tokio_util::sync::CancellationToken;

use crate::assign::{AssignContext, AssignmentEngine};
use crate::cache::{CacheManager, CacheStatsSnapshot, EntryState, GlobalIndex};
use crate::config::AnalysisConfig;
use crate::error::{Error, Result};
use crate::history::HistoryProvider;
use crate::scoring;
use crate::types::{ActiveContributorSet, AssignmentDecision, FileContributorIndex, WorkUnit};

/// Cache namespace for per-file contributor rankings.
const RANKING_NAMESPACE: &str = "file-contributors";

/// Poll interval while another worker holds a ranking computation claim.
const COMPUTE_WAIT_TICK: Duration = Duration::from_millis(10);
/// Give up waiting after this many ticks and recompute locally.
const COMPUTE_WAIT_TICKS: u32 = 100;

/// What happened across one batch run.
#[derive(Clone, Debug, Default)]
pub struct BatchReport {
    pub total_units: usize,
    pub analyzed_units: usize,
    /// Unit id plus the error message that sank it.
    pub failed_units: Vec<(String, String)>,
    pub assigned_units: usize,
    pub fallback_units: usize,
    pub unassigned_units: usize,
    /// True when the batch was cancelled; only completed units appear in
    /// the decisions.
    pub cancelled: bool,
    pub cache: CacheStatsSnapshot,
    /// Final per-assignee task counts, descending.
    pub workload: Vec<(String, usize)>,
}

/// Decisions plus the rankings and bookkeeping that produced them.
#[derive(Clone, Debug)]
pub struct BatchResult {
    pub decisions: Vec<AssignmentDecision>,
    pub rankings: HashMap<String, FileContributorIndex>,
    pub report: BatchReport,
}

enum UnitOutcome {
    Analyzed {
        unit_id: String,
        rankings: Vec<FileContributorIndex>,
    },
    Failed(Error),
}

/// Analyze and assign a whole batch of work units.
///
/// Cancellation stops dispatch: an already-running history query finishes
/// but no new unit starts after the token fires, and the run returns
/// decisions for the units that completed, with the report marked
/// cancelled.
pub async fn run_batch(
    provider: Arc<dyn HistoryProvider>,
    cache: Arc<CacheManager>,
    index: Option<Arc<GlobalIndex>>,
    units: Vec<WorkUnit>,
    config: Arc<AnalysisConfig>,
    excluded: HashSet<String>,
    cancel: CancellationToken,
) -> Result<BatchResult> {
    if units.is_empty() {
        return Ok(BatchResult {
            decisions: Vec::new(),
            rankings: HashMap::new(),
            report: BatchReport::default(),
        });
    }

    let active = fetch_active_set(&provider, &config).await?;
    let workers = config.worker_count().min(units.len());
    info!(
        "batch start: {} units on {} workers ({} active contributors)",
        units.len(),
        workers,
        active.len()
    );

    let semaphore = Arc::new(Semaphore::new(workers));
    let (tx, mut rx) = mpsc::channel::<UnitOutcome>(units.len());

    for unit in units.iter().cloned() {
        let provider = Arc::clone(&provider);
        let cache = Arc::clone(&cache);
        let index = index.clone();
        let config = Arc::clone(&config);
        let active = Arc::clone(&active);
        let semaphore = Arc::clone(&semaphore);
        let cancel = cancel.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return;
            };
            if cancel.is_cancelled() {
                return;
            }
            let unit_id = unit.id.clone();
            let analyzed = task::spawn_blocking(move || {
                analyze_unit(&*provider, &cache, index.as_deref(), &config, &active, &unit)
            })
            .await;
            let outcome = match analyzed {
                Ok(Ok(rankings)) => UnitOutcome::Analyzed { unit_id, rankings },
                Ok(Err(err)) => UnitOutcome::Failed(Error::BatchUnit {
                    unit: unit_id,
                    message: err.to_string(),
                }),
                Err(join_err) => UnitOutcome::Failed(Error::BatchUnit {
                    unit: unit_id,
                    message: format!("analysis task panicked: {join_err}"),
                }),
            };
            let _ = tx.send(outcome).await;
        });
    }
    drop(tx);

    // Single consumer: the only writer to the merged ranking map.
    let mut rankings: HashMap<String, FileContributorIndex> = HashMap::new();
    let mut completed: HashSet<String> = HashSet::new();
    let mut failed_units = Vec::new();
    let mut cancelled = false;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                warn!("batch cancelled after {} units", completed.len());
                cancelled = true;
                break;
            }
            outcome = rx.recv() => match outcome {
                Some(UnitOutcome::Analyzed { unit_id, rankings: unit_rankings }) => {
                    completed.insert(unit_id);
                    for ranking in unit_rankings {
                        rankings.insert(ranking.path.clone(), ranking);
                    }
                }
                Some(UnitOutcome::Failed(err)) => {
                    warn!("{err}");
                    if let Error::BatchUnit { unit, message } = err {
                        failed_units.push((unit, message));
                    }
                }
                None => break,
            },
        }
    }

    // A cancelled batch still reports what finished, nothing more.
    let assignable: Vec<WorkUnit> = if cancelled {
        units
            .iter()
            .filter(|u| completed.contains(&u.id))
            .cloned()
            .collect()
    } else {
        units.clone()
    };

    let ctx = AssignContext {
        rankings: &rankings,
        index: index.as_deref(),
        active: &active,
        excluded: &excluded,
        config: &config,
        now: Utc::now(),
    };
    let engine = AssignmentEngine::new();
    let (decisions, workload) = engine.assign(&assignable, &ctx);

    let assigned_units = decisions.iter().filter(|d| d.primary.is_some()).count();
    let fallback_units = decisions.iter().filter(|d| d.reason.is_fallback()).count();
    let unassigned_units = decisions.len() - assigned_units;
    info!(
        "batch done: {assigned_units} assigned ({fallback_units} via fallback), \
         {unassigned_units} unassigned, {} failed",
        failed_units.len()
    );

    let report = BatchReport {
        total_units: units.len(),
        analyzed_units: completed.len(),
        failed_units,
        assigned_units,
        fallback_units,
        unassigned_units,
        cancelled,
        cache: cache.stats(),
        workload: workload.distribution(),
    };
    Ok(BatchResult {
        decisions,
        rankings,
        report,
    })
}

async fn fetch_active_set(
    provider: &Arc<dyn HistoryProvider>,
    config: &Arc<AnalysisConfig>,
) -> Result<Arc<ActiveContributorSet>> {
    let provider = Arc::clone(provider);
    let window = config.active_window_months;
    let active = task::spawn_blocking(move || provider.active_contributors(window))
        .await
        .map_err(|err| Error::Git(format!("active-contributor query panicked: {err}")))??;
    Ok(Arc::new(active))
}

/// Rank every path in one unit, cheapest source first: cache, then the
/// global-pass table, then batched history queries for what remains.
///
/// Claims taken on missed paths are released on failure so workers
/// waiting on them fall through to their own computation.
fn analyze_unit(
    provider: &dyn HistoryProvider,
    cache: &CacheManager,
    index: Option<&GlobalIndex>,
    config: &AnalysisConfig,
    active: &ActiveContributorSet,
    unit: &WorkUnit,
) -> Result<Vec<FileContributorIndex>> {
    let mut claimed: Vec<String> = Vec::new();
    let result = rank_unit_paths(provider, cache, index, config, active, unit, &mut claimed);
    if result.is_err() {
        for path in &claimed {
            cache.end_compute(RANKING_NAMESPACE, path);
        }
    }
    result
}

fn rank_unit_paths(
    provider: &dyn HistoryProvider,
    cache: &CacheManager,
    index: Option<&GlobalIndex>,
    config: &AnalysisConfig,
    active: &ActiveContributorSet,
    unit: &WorkUnit,
    claimed: &mut Vec<String>,
) -> Result<Vec<FileContributorIndex>> {
    let now = Utc::now();
    let mut rankings = Vec::with_capacity(unit.paths.len());
    let mut misses: Vec<(String, Option<String>)> = Vec::new();

    for path in &unit.paths {
        let fingerprint = provider.last_commit_touching(path)?;
        if let Some(ranking) =
            cache.get::<FileContributorIndex>(RANKING_NAMESPACE, path, fingerprint.as_deref())
        {
            rankings.push(ranking);
            continue;
        }
        if let Some(table) = index.and_then(|idx| idx.file_aggregates(path)) {
            let stats = scoring::stats_from_single_window(table);
            let ranking = scoring::rank(path, stats, active, config, now);
            cache.put(RANKING_NAMESPACE, path, &ranking, fingerprint.as_deref());
            rankings.push(ranking);
            continue;
        }
        if cache.begin_compute(RANKING_NAMESPACE, path) {
            claimed.push(path.clone());
            misses.push((path.clone(), fingerprint));
        } else if let Some(ranking) = wait_for_ranking(cache, path, fingerprint.as_deref()) {
            // Another worker is ranking the same path; take its result
            // instead of issuing a second set of history queries.
            rankings.push(ranking);
        } else {
            if cache.begin_compute(RANKING_NAMESPACE, path) {
                claimed.push(path.clone());
            }
            misses.push((path.clone(), fingerprint));
        }
    }

    if !misses.is_empty() {
        let paths: Vec<String> = misses.iter().map(|(p, _)| p.clone()).collect();
        let recent = provider.recent_contributors_batch(&paths, config.recent_cutoff(now))?;
        let total = provider.all_contributors_batch(&paths)?;
        let empty = HashMap::new();
        for (path, fingerprint) in misses {
            let stats = scoring::stats_from_aggregates(
                recent.get(&path).unwrap_or(&empty),
                total.get(&path).unwrap_or(&empty),
            );
            let ranking = scoring::rank(&path, stats, active, config, now);
            cache.put(RANKING_NAMESPACE, &path, &ranking, fingerprint.as_deref());
            rankings.push(ranking);
        }
    }
    Ok(rankings)
}

/// Bounded poll for the result of a ranking another worker claimed.
/// Returns `None` when the claimant gave up or the wait budget ran out.
fn wait_for_ranking(
    cache: &CacheManager,
    path: &str,
    fingerprint: Option<&str>,
) -> Option<FileContributorIndex> {
    for _ in 0..COMPUTE_WAIT_TICKS {
        if cache.probe(RANKING_NAMESPACE, path, fingerprint) != EntryState::Computing {
            return cache.get(RANKING_NAMESPACE, path, fingerprint);
        }
        std::thread::sleep(COMPUTE_WAIT_TICK);
    }
    None
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::history::BatchContributors;
    use crate::testsupport::FakeHistory;
    use crate::types::AuthorAggregate;

    const LOG: &str = "\
commit:a1|alice|1700000000
6\t1\tsrc/parser.rs
commit:b2|bob|1700086400
2\t0\tsrc/render.rs
commit:c3|alice|1700172800
1\t0\tsrc/render.rs
";

    fn setup() -> (Arc<FakeHistory>, Arc<CacheManager>, Arc<AnalysisConfig>) {
        let config = Arc::new(AnalysisConfig {
            parallel_workers: Some(2),
            ..AnalysisConfig::default()
        });
        let provider = Arc::new(FakeHistory::new(LOG).with_active(&["alice", "bob"]));
        let cache = Arc::new(CacheManager::in_memory(&config));
        (provider, cache, config)
    }

    #[tokio::test]
    async fn batch_assigns_every_unit_with_history() {
        let (provider, cache, config) = setup();
        let units = vec![WorkUnit::single("src/parser.rs"), WorkUnit::single("src/render.rs")];

        let result = run_batch(
            provider,
            cache,
            None,
            units,
            config,
            HashSet::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(result.report.total_units, 2);
        assert_eq!(result.report.analyzed_units, 2);
        assert_eq!(result.report.assigned_units, 2);
        assert_eq!(result.report.failed_units.len(), 0);
        assert!(result.rankings.contains_key("src/parser.rs"));

        let parser = &result.decisions[0];
        assert_eq!(parser.unit_id, "src/parser.rs");
        assert_eq!(parser.primary.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn second_run_is_served_from_the_cache() {
        let (provider, cache, config) = setup();
        let units = vec![WorkUnit::single("src/parser.rs")];

        let first = run_batch(
            Arc::clone(&provider) as Arc<dyn HistoryProvider>,
            Arc::clone(&cache),
            None,
            units.clone(),
            Arc::clone(&config),
            HashSet::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(first.report.cache.puts, 1);

        let second = run_batch(
            provider,
            cache,
            None,
            units,
            config,
            HashSet::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(second.report.cache.hits, 1);
        assert_eq!(second.report.cache.puts, 1);
        assert_eq!(second.decisions[0].primary.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn pre_cancelled_batch_returns_only_completed_work() {
        let (provider, cache, config) = setup();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = run_batch(
            provider,
            cache,
            None,
            vec![WorkUnit::single("src/parser.rs")],
            config,
            HashSet::new(),
            cancel,
        )
        .await
        .unwrap();

        assert!(result.report.cancelled);
        assert_eq!(result.report.total_units, 1);
        assert!(result.decisions.is_empty());
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let (provider, cache, config) = setup();
        let result = run_batch(
            provider,
            cache,
            None,
            Vec::new(),
            config,
            HashSet::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(result.decisions.is_empty());
        assert_eq!(result.report.total_units, 0);
    }

    /// Provider that fails history queries for one poisoned path.
    struct FlakyProvider {
        inner: FakeHistory,
        poisoned: String,
    }

    impl HistoryProvider for FlakyProvider {
        fn recent_contributors(
            &self,
            path: &str,
            since: DateTime<Utc>,
        ) -> crate::Result<HashMap<String, AuthorAggregate>> {
            self.inner.recent_contributors(path, since)
        }

        fn all_contributors(&self, path: &str) -> crate::Result<HashMap<String, AuthorAggregate>> {
            self.inner.all_contributors(path)
        }

        fn active_contributors(&self, window: u32) -> crate::Result<ActiveContributorSet> {
            self.inner.active_contributors(window)
        }

        fn recent_contributors_batch(
            &self,
            paths: &[String],
            since: DateTime<Utc>,
        ) -> crate::Result<BatchContributors> {
            self.inner.recent_contributors_batch(paths, since)
        }

        fn all_contributors_batch(&self, paths: &[String]) -> crate::Result<BatchContributors> {
            self.inner.all_contributors_batch(paths)
        }

        fn log_since(&self, since: Option<DateTime<Utc>>) -> crate::Result<String> {
            self.inner.log_since(since)
        }

        fn changed_paths_since(&self, since: DateTime<Utc>) -> crate::Result<Vec<String>> {
            self.inner.changed_paths_since(since)
        }

        fn last_commit_touching(&self, path: &str) -> crate::Result<Option<String>> {
            if path == self.poisoned {
                return Err(Error::Git(format!("scripted failure for {path}")));
            }
            self.inner.last_commit_touching(path)
        }
    }

    #[tokio::test]
    async fn one_failing_unit_does_not_sink_the_batch() {
        let config = Arc::new(AnalysisConfig {
            parallel_workers: Some(2),
            ..AnalysisConfig::default()
        });
        let provider = Arc::new(FlakyProvider {
            inner: FakeHistory::new(LOG).with_active(&["alice", "bob"]),
            poisoned: "src/render.rs".to_string(),
        });
        let cache = Arc::new(CacheManager::in_memory(&config));

        let result = run_batch(
            provider,
            cache,
            None,
            vec![WorkUnit::single("src/parser.rs"), WorkUnit::single("src/render.rs")],
            config,
            HashSet::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(result.report.analyzed_units, 1);
        assert_eq!(result.report.failed_units.len(), 1);
        assert_eq!(result.report.failed_units[0].0, "src/render.rs");
        // The healthy unit still got assigned.
        let parser = result
            .decisions
            .iter()
            .find(|d| d.unit_id == "src/parser.rs")
            .unwrap();
        assert_eq!(parser.primary.as_deref(), Some("alice"));
    }

    #[test]
    fn lost_claim_waits_for_the_winning_computation() {
        let config = AnalysisConfig::default();
        let cache = Arc::new(CacheManager::in_memory(&config));
        assert!(cache.begin_compute(RANKING_NAMESPACE, "src/parser.rs"));
        assert!(!cache.begin_compute(RANKING_NAMESPACE, "src/parser.rs"));

        let winner = Arc::clone(&cache);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            let ranking = FileContributorIndex {
                path: "src/parser.rs".to_string(),
                contributors: Vec::new(),
            };
            winner.put(RANKING_NAMESPACE, "src/parser.rs", &ranking, None);
        });

        let found = wait_for_ranking(&cache, "src/parser.rs", None);
        handle.join().unwrap();
        assert_eq!(found.map(|r| r.path), Some("src/parser.rs".to_string()));
    }

    #[tokio::test]
    async fn shared_path_between_units_is_ranked_once() {
        let config = Arc::new(AnalysisConfig {
            parallel_workers: Some(1),
            ..AnalysisConfig::default()
        });
        let provider = Arc::new(FakeHistory::new(LOG).with_active(&["alice", "bob"]));
        let cache = Arc::new(CacheManager::in_memory(&config));
        let units = vec![
            WorkUnit::group("unit-a", vec!["src/parser.rs".to_string()]),
            WorkUnit::group("unit-b", vec!["src/parser.rs".to_string()]),
        ];

        let result = run_batch(
            provider,
            cache,
            None,
            units,
            config,
            HashSet::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(result.report.assigned_units, 2);
        assert_eq!(result.report.cache.puts, 1);
        assert_eq!(result.report.cache.hits, 1);
    }

    /// Provider whose batched history queries always fail.
    struct FailingBatchProvider {
        inner: FakeHistory,
    }

    impl HistoryProvider for FailingBatchProvider {
        fn recent_contributors(
            &self,
            path: &str,
            since: DateTime<Utc>,
        ) -> crate::Result<HashMap<String, AuthorAggregate>> {
            self.inner.recent_contributors(path, since)
        }

        fn all_contributors(&self, path: &str) -> crate::Result<HashMap<String, AuthorAggregate>> {
            self.inner.all_contributors(path)
        }

        fn active_contributors(&self, window: u32) -> crate::Result<ActiveContributorSet> {
            self.inner.active_contributors(window)
        }

        fn recent_contributors_batch(
            &self,
            _paths: &[String],
            _since: DateTime<Utc>,
        ) -> crate::Result<BatchContributors> {
            Err(Error::Git("scripted batch failure".to_string()))
        }

        fn all_contributors_batch(&self, paths: &[String]) -> crate::Result<BatchContributors> {
            self.inner.all_contributors_batch(paths)
        }

        fn log_since(&self, since: Option<DateTime<Utc>>) -> crate::Result<String> {
            self.inner.log_since(since)
        }

        fn changed_paths_since(&self, since: DateTime<Utc>) -> crate::Result<Vec<String>> {
            self.inner.changed_paths_since(since)
        }

        fn last_commit_touching(&self, path: &str) -> crate::Result<Option<String>> {
            self.inner.last_commit_touching(path)
        }
    }

    #[tokio::test]
    async fn failed_unit_releases_its_computation_claims() {
        let config = Arc::new(AnalysisConfig {
            parallel_workers: Some(1),
            ..AnalysisConfig::default()
        });
        let provider = Arc::new(FailingBatchProvider {
            inner: FakeHistory::new(LOG).with_active(&["alice", "bob"]),
        });
        let cache = Arc::new(CacheManager::in_memory(&config));

        let result = run_batch(
            provider,
            Arc::clone(&cache),
            None,
            vec![WorkUnit::single("src/parser.rs")],
            config,
            HashSet::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(result.report.failed_units.len(), 1);
        // The claim taken before the failing query must not linger.
        assert_eq!(
            cache.probe(RANKING_NAMESPACE, "src/parser.rs", None),
            EntryState::Absent
        );
    }
}
