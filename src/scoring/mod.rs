//! Scoring engine: converts per-author history aggregates into comparable
//! candidate scores and ranked contributor lists.
//!
//! Three algorithm variants are selectable at runtime. All of them are
//! deterministic for identical input and monotonically non-decreasing in
//! recent commit count. Normalization across a candidate set is pluggable
//! and passes scores through untouched when they are all equal.


use std::collections::HashMap;

use chrono::{DateTime, Datelike, Utc};
use statrs::statistics::Statistics;

use crate::config::{AlgorithmVariant, AnalysisConfig, NormalizationMethod, ScoringWeights};
use crate::types::{
    datetime_from_epoch, ActiveContributorSet, AuthorAggregate, ContributorStat,
    FileContributorIndex,
};

/// Baseline score: `recent*wRC + recentLines*wRL + total*wTC + totalLines*wTL`.
pub fn base_score(stat: &ContributorStat, weights: &ScoringWeights) -> f64 {
    let recent = stat.recent_commits as f64 * weights.recent_commit
        + stat.recent_lines() as f64 * weights.recent_line;
    let historical = stat.total_commits as f64 * weights.total_commit
        + stat.total_lines() as f64 * weights.total_line;
    recent + historical
}

/// Score one contributor under the configured algorithm variant.
pub fn score(stat: &ContributorStat, config: &AnalysisConfig, now: DateTime<Utc>) -> f64 {
    let w = &config.scoring_weights;
    match config.algorithm_variant {
        AlgorithmVariant::Simple => {
            stat.recent_commits as f64 * w.recent_commit
                + stat.total_commits as f64 * w.total_commit
        }
        AlgorithmVariant::Weighted => base_score(stat, w),
        AlgorithmVariant::Comprehensive => comprehensive_score(stat, config, now),
    }
}

/// Comprehensive variant: logarithmic churn scaling, per-commit exponential
/// time decay, and a consistency bonus for contributions spread across
/// distinct months rather than a single burst.
fn comprehensive_score(stat: &ContributorStat, config: &AnalysisConfig, now: DateTime<Utc>) -> f64 {
    let w = &config.scoring_weights;

    // ln(1+churn) keeps a single huge commit from dominating.
    let commit_base = stat.recent_commits as f64 * w.recent_commit
        + stat.total_commits as f64 * w.total_commit;
    let churn = w.recent_line * (1.0 + stat.recent_lines() as f64).ln()
        + w.total_line * (1.0 + stat.total_lines() as f64).ln();
    let mut total = commit_base + churn;

    // Exponential decay per commit age.
    let half_life = config.time_half_life_days.max(1.0);
    let decay: f64 = stat
        .commit_times
        .iter()
        .map(|&t| {
            let age_days =
                (now - datetime_from_epoch(t)).num_seconds().max(0) as f64 / 86_400.0;
            (-std::f64::consts::LN_2 * age_days / half_life).exp()
        })
        .sum();
    total += w.recent_commit * config.time_weight_factor * decay;

    // Consistency bonus: reward distinct active months over one burst.
    if stat.commit_times.len() >= config.min_commits_for_consistency {
        let months = distinct_months(&stat.commit_times);
        if months > 1 {
            let spread = (months - 1) as f64 / config.analysis_months.max(1) as f64;
            total += commit_base * config.consistency_bonus_factor * spread.min(1.0);
        }
    }

    total
}

fn distinct_months(times: &[i64]) -> usize {
    let mut months: Vec<(i32, u32)> = times
        .iter()
        .map(|&t| {
            let dt = datetime_from_epoch(t);
            (dt.year(), dt.month())
        })
        .collect();
    months.sort_unstable();
    months.dedup();
    months.len()
}

/// Normalize scores in place across one candidate set.
///
/// When all raw scores are equal (including the single-candidate case) the
/// raw score is passed through so no method ever divides by zero.
pub fn normalize(stats: &mut [ContributorStat], method: NormalizationMethod) {
    if stats.is_empty() {
        return;
    }
    let scores: Vec<f64> = stats.iter().map(|s| s.raw_score).collect();
    let min = scores.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    if (max - min).abs() < f64::EPSILON {
        for stat in stats.iter_mut() {
            stat.normalized_score = stat.raw_score;
        }
        return;
    }

    match method {
        NormalizationMethod::MinMax => {
            let range = max - min;
            for stat in stats.iter_mut() {
                stat.normalized_score = (stat.raw_score - min) / range;
            }
        }
        NormalizationMethod::ZScore => {
            let mean = Statistics::mean(scores.iter());
            let std_dev = Statistics::std_dev(scores.iter());
            for stat in stats.iter_mut() {
                stat.normalized_score = (stat.raw_score - mean) / std_dev;
            }
        }
        NormalizationMethod::Percentile => {
            let n = scores.len() as f64;
            for stat in stats.iter_mut() {
                let at_or_below =
                    scores.iter().filter(|&&s| s <= stat.raw_score).count() as f64;
                stat.normalized_score = at_or_below / n;
            }
        }
    }
}

/// Drop candidates below the minimum score threshold, unless that would
/// empty the set entirely.
pub fn apply_score_threshold(
    mut stats: Vec<ContributorStat>,
    threshold: f64,
) -> Vec<ContributorStat> {
    let kept: Vec<ContributorStat> = stats
        .iter()
        .filter(|s| s.raw_score >= threshold)
        .cloned()
        .collect();
    if kept.is_empty() {
        stats
    } else {
        stats.retain(|s| s.raw_score >= threshold);
        stats
    }
}

/// Score, threshold-filter, normalize, and rank a candidate set for one
/// file. Ties on raw score break by author id lexical ascending order.
pub fn rank(
    path: &str,
    mut stats: Vec<ContributorStat>,
    active: &ActiveContributorSet,
    config: &AnalysisConfig,
    now: DateTime<Utc>,
) -> FileContributorIndex {
    for stat in stats.iter_mut() {
        stat.is_active = active.contains(&stat.author);
        stat.raw_score = score(stat, config, now);
    }
    let mut stats = apply_score_threshold(stats, config.minimum_score_threshold);
    normalize(&mut stats, config.normalization_method);
    stats.sort_by(|a, b| {
        b.raw_score
            .partial_cmp(&a.raw_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.author.cmp(&b.author))
    });
    FileContributorIndex {
        path: path.to_string(),
        contributors: stats,
    }
}

/// Build candidate stats from separate recent and full-history aggregate
/// maps for one file.
pub fn stats_from_aggregates(
    recent: &HashMap<String, AuthorAggregate>,
    total: &HashMap<String, AuthorAggregate>,
) -> Vec<ContributorStat> {
    let mut authors: Vec<&String> = total.keys().chain(recent.keys()).collect();
    authors.sort_unstable();
    authors.dedup();
    authors
        .into_iter()
        .map(|author| {
            ContributorStat::from_aggregates(author, recent.get(author), total.get(author))
        })
        .collect()
}

/// Build candidate stats when only one bounded-window aggregate map is
/// available (the global-pass table): the window serves as both recent and
/// total history.
pub fn stats_from_single_window(
    aggregates: &HashMap<String, AuthorAggregate>,
) -> Vec<ContributorStat> {
    let mut authors: Vec<&String> = aggregates.keys().collect();
    authors.sort_unstable();
    authors
        .into_iter()
        .map(|author| ContributorStat::from_aggregates(author, aggregates.get(author), None))
        .collect()
}
