//! Analysis configuration.
//!
//! One `AnalysisConfig` is built per analysis session and passed by
//! reference; there is no process-wide configuration state. All fields have
//! defaults so a partially specified JSON document deserializes cleanly.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Weights applied to the four base scoring inputs.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    /// Weight per commit inside the recent window
    pub recent_commit: f64,
    /// Weight per line of churn inside the recent window
    pub recent_line: f64,
    /// Weight per commit across the full history
    pub total_commit: f64,
    /// Weight per line of churn across the full history
    pub total_line: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        // Commit weights 3:1 recent vs historical; line weights keep a
        // thousand-line refactor from drowning out steady committers.
        Self {
            recent_commit: 3.0,
            recent_line: 0.05,
            total_commit: 1.0,
            total_line: 0.01,
        }
    }
}

/// Which scoring algorithm to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlgorithmVariant {
    /// Commit counts only
    Simple,
    /// Commit counts plus line churn
    Weighted,
    /// Weighted plus logarithmic magnitude scaling, per-commit time decay,
    /// and a consistency bonus
    Comprehensive,
}

/// How scores are normalized across a candidate set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NormalizationMethod {
    MinMax,
    ZScore,
    Percentile,
}

/// Configuration surface consumed by the analysis core.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub scoring_weights: ScoringWeights,
    /// Window (months) considered "recent" for scoring
    pub analysis_months: u32,
    /// Window (months) defining the active contributor set
    pub active_window_months: u32,
    /// Hard cap on assignments per person within one run
    pub max_tasks_per_person: usize,
    pub normalization_method: NormalizationMethod,
    pub algorithm_variant: AlgorithmVariant,
    /// Half-life (days) for the comprehensive variant's time decay
    pub time_half_life_days: f64,
    /// Scale applied to the time-decay contribution
    pub time_weight_factor: f64,
    /// Scale applied to the consistency bonus
    pub consistency_bonus_factor: f64,
    /// Commits required before a consistency bonus is considered
    pub min_commits_for_consistency: usize,
    /// Scores below this are dropped before normalization (unless that
    /// would empty the candidate set)
    pub minimum_score_threshold: f64,
    /// Tier-1/2 cache entry time-to-live
    pub cache_ttl_hours: i64,
    /// Tier-1 LRU capacity
    pub cache_capacity: usize,
    /// Worker pool size; `None` derives it from available parallelism
    pub parallel_workers: Option<usize>,
    /// When fewer than this many active candidates remain for a unit,
    /// inactive contributors re-enter the pool
    pub include_inactive_floor: usize,
    /// Upper bound on recorded alternate candidates per decision
    pub max_alternates: usize,
    /// Incremental refresh is used only when the cached table covers at
    /// least this fraction of the requested files
    pub incremental_overlap_ratio: f64,
    /// and when at least this many files are requested
    pub incremental_min_files: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            scoring_weights: ScoringWeights::default(),
            analysis_months: 12,
            active_window_months: 3,
            max_tasks_per_person: 1000,
            normalization_method: NormalizationMethod::MinMax,
            algorithm_variant: AlgorithmVariant::Comprehensive,
            time_half_life_days: 180.0,
            time_weight_factor: 0.4,
            consistency_bonus_factor: 0.2,
            min_commits_for_consistency: 3,
            minimum_score_threshold: 0.1,
            cache_ttl_hours: 24,
            cache_capacity: 1000,
            parallel_workers: None,
            include_inactive_floor: 2,
            max_alternates: 5,
            incremental_overlap_ratio: 0.8,
            incremental_min_files: 20,
        }
    }
}

impl AnalysisConfig {
    /// Worker pool size: configured value, or 75% of available CPUs.
    pub fn worker_count(&self) -> usize {
        self.parallel_workers
            .unwrap_or_else(|| (num_cpus::get() * 3 / 4).max(1))
    }

    /// Start of the recent analysis window.
    pub fn recent_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(30 * i64::from(self.analysis_months))
    }

    /// Start of the active contributor window.
    pub fn active_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(30 * i64::from(self.active_window_months))
    }

    /// Cache TTL as a chrono duration.
    pub fn cache_ttl(&self) -> Duration {
        Duration::hours(self.cache_ttl_hours)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = AnalysisConfig::default();
        assert_eq!(cfg.scoring_weights.recent_commit, 3.0);
        assert_eq!(cfg.scoring_weights.total_commit, 1.0);
        assert_eq!(cfg.active_window_months, 3);
        assert_eq!(cfg.include_inactive_floor, 2);
        assert_eq!(cfg.normalization_method, NormalizationMethod::MinMax);
        assert_eq!(cfg.algorithm_variant, AlgorithmVariant::Comprehensive);
    }

    #[test]
    fn partial_json_deserializes_with_defaults() {
        let cfg: AnalysisConfig = serde_json::from_str(
            r#"{
                "max_tasks_per_person": 3,
                "normalization_method": "z-score",
                "algorithm_variant": "simple"
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.max_tasks_per_person, 3);
        assert_eq!(cfg.normalization_method, NormalizationMethod::ZScore);
        assert_eq!(cfg.algorithm_variant, AlgorithmVariant::Simple);
        assert_eq!(cfg.analysis_months, 12);
    }

    #[test]
    fn worker_count_never_zero() {
        let mut cfg = AnalysisConfig::default();
        assert!(cfg.worker_count() >= 1);
        cfg.parallel_workers = Some(2);
        assert_eq!(cfg.worker_count(), 2);
    }
}
