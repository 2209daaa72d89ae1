//! Work-unit assignment.
//!
//! A sequential pass walks the batch's work units in order, running each
//! through a resolver chain (direct, load-balance, directory fallback,
//! global fallback) until one produces a primary assignee. The pass owns
//! the workload counter, so quota checks always see assignments made
//! earlier in the same pass. Units no resolver can place get a terminal
//! reason code explaining exactly which constraint blocked them.

pub mod resolvers;


use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use log::debug;

use crate::cache::GlobalIndex;
use crate::config::AnalysisConfig;
use crate::types::{
    ActiveContributorSet, AssignmentDecision, ContributorStat, FileContributorIndex, ReasonCode,
    WorkUnit, WorkloadCounter,
};

pub use resolvers::{
    DirectResolver, DirectoryFallbackResolver, GlobalFallbackResolver, LoadBalanceResolver,
    Resolver,
};

/// Everything a resolver can consult when placing one unit.
pub struct AssignContext<'a> {
    /// Per-file contributor rankings keyed by path.
    pub rankings: &'a HashMap<String, FileContributorIndex>,
    /// Global-pass index for fallback tiers. `None` disables fallbacks.
    pub index: Option<&'a GlobalIndex>,
    /// Authors with any commit inside the activity window.
    pub active: &'a ActiveContributorSet,
    /// Manually excluded authors, never assignable.
    pub excluded: &'a HashSet<String>,
    pub config: &'a AnalysisConfig,
    pub now: DateTime<Utc>,
}

impl<'a> AssignContext<'a> {
    /// Merged, re-sorted candidate list for a unit spanning several paths.
    /// Scores sum across the unit's files; ties break on author id.
    pub fn unit_candidates(&self, unit: &WorkUnit) -> Vec<ContributorStat> {
        let mut merged: HashMap<String, ContributorStat> = HashMap::new();
        for path in &unit.paths {
            let Some(ranking) = self.rankings.get(path) else {
                continue;
            };
            for stat in &ranking.contributors {
                match merged.get_mut(&stat.author) {
                    Some(existing) => {
                        existing.raw_score += stat.raw_score;
                        existing.normalized_score += stat.normalized_score;
                        existing.recent_commits += stat.recent_commits;
                        existing.total_commits += stat.total_commits;
                        existing.is_active |= stat.is_active;
                    }
                    None => {
                        merged.insert(stat.author.clone(), stat.clone());
                    }
                }
            }
        }
        let mut candidates: Vec<ContributorStat> = merged.into_values().collect();
        candidates.sort_by(|a, b| {
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.author.cmp(&b.author))
        });
        candidates
    }

    /// Whether inactive candidates re-enter the pool for this candidate
    /// set: they do when fewer than `include_inactive_floor` active,
    /// non-excluded candidates remain.
    pub fn inactive_allowed(&self, candidates: &[ContributorStat]) -> bool {
        let active = candidates
            .iter()
            .filter(|s| s.is_active && !self.excluded.contains(&s.author))
            .count();
        active < self.config.include_inactive_floor
    }

    /// Whether any of the unit's file-level candidates is assignable.
    /// Fallback tiers only engage when this is false; an eligible but
    /// over-quota candidate keeps them off so the terminal reason stays
    /// quota-specific.
    pub fn has_eligible_candidate(&self, unit: &WorkUnit) -> bool {
        let candidates = self.unit_candidates(unit);
        let inactive_ok = self.inactive_allowed(&candidates);
        candidates
            .iter()
            .any(|stat| self.is_eligible(stat, inactive_ok))
    }

    /// Whether one candidate may be assigned at all.
    pub fn is_eligible(&self, stat: &ContributorStat, inactive_ok: bool) -> bool {
        if self.excluded.contains(&stat.author) {
            return false;
        }
        stat.is_active || inactive_ok
    }

    /// Eligible alternates after the chosen primary, best first.
    pub fn alternates(&self, candidates: &[ContributorStat], primary: &str) -> Vec<String> {
        let inactive_ok = self.inactive_allowed(candidates);
        candidates
            .iter()
            .filter(|stat| stat.author != primary && self.is_eligible(stat, inactive_ok))
            .take(self.config.max_alternates)
            .map(|stat| stat.author.clone())
            .collect()
    }
}

/// Ordered resolver chain plus the sequential pass that drives it.
pub struct AssignmentEngine {
    resolvers: Vec<Box<dyn Resolver>>,
}

impl Default for AssignmentEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AssignmentEngine {
    /// The standard chain: direct, then load-balance, then the two
    /// history-inference fallbacks.
    pub fn new() -> Self {
        Self {
            resolvers: vec![
                Box::new(DirectResolver),
                Box::new(LoadBalanceResolver),
                Box::new(DirectoryFallbackResolver),
                Box::new(GlobalFallbackResolver),
            ],
        }
    }

    /// A custom chain, mostly for tests exercising individual tiers.
    pub fn with_resolvers(resolvers: Vec<Box<dyn Resolver>>) -> Self {
        Self { resolvers }
    }

    /// Place every unit in order. Returns the decisions plus the final
    /// workload counter for distribution reporting.
    pub fn assign(
        &self,
        units: &[WorkUnit],
        ctx: &AssignContext<'_>,
    ) -> (Vec<AssignmentDecision>, WorkloadCounter) {
        let mut workload = WorkloadCounter::new();
        let mut decisions = Vec::with_capacity(units.len());
        for unit in units {
            let decision = self.assign_unit(unit, ctx, &workload);
            if let Some(primary) = &decision.primary {
                workload.record(primary);
            }
            debug!(
                "unit {} -> {:?} ({})",
                unit.id, decision.primary, decision.reason
            );
            decisions.push(decision);
        }
        (decisions, workload)
    }

    fn assign_unit(
        &self,
        unit: &WorkUnit,
        ctx: &AssignContext<'_>,
        workload: &WorkloadCounter,
    ) -> AssignmentDecision {
        for resolver in &self.resolvers {
            if let Some(decision) = resolver.try_resolve(unit, ctx, workload) {
                return decision;
            }
        }
        terminal_decision(unit, ctx, workload)
    }
}

/// Classify why a unit could not be placed, by the most specific
/// constraint that blocked its best candidate.
fn terminal_decision(
    unit: &WorkUnit,
    ctx: &AssignContext<'_>,
    workload: &WorkloadCounter,
) -> AssignmentDecision {
    let candidates = ctx.unit_candidates(unit);
    let inactive_ok = ctx.inactive_allowed(&candidates);
    let eligible: Vec<&ContributorStat> = candidates
        .iter()
        .filter(|stat| ctx.is_eligible(stat, inactive_ok))
        .collect();

    let reason = if candidates.is_empty() {
        ReasonCode::NoData
    } else if !eligible.is_empty() {
        // Eligible candidates existed, so quota was the only blocker.
        debug_assert!(eligible.iter().all(|stat| {
            !workload.under_quota(&stat.author, ctx.config.max_tasks_per_person)
        }));
        ReasonCode::OverQuota
    } else if ctx.excluded.contains(&candidates[0].author) {
        ReasonCode::ExcludedManual
    } else {
        ReasonCode::ExcludedInactive
    };

    AssignmentDecision {
        unit_id: unit.id.clone(),
        primary: None,
        alternates: Vec::new(),
        reason,
        candidate_count: candidates.len(),
        eligible_count: eligible.len(),
    }
}
