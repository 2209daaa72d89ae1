//! The individual tiers of the assignment chain.
//!
//! Each resolver either places the unit with a definite decision or
//! declines by returning `None`, letting the next tier try. The fallback
//! tiers consult the global index, so they only fire when it is present.

use log::debug;

use crate::cache::global_index::ancestor_dirs;
use crate::scoring;
use crate::types::{
    AssignmentDecision, AuthorAggregate, ContributorStat, ReasonCode, WorkUnit, WorkloadCounter,
};

use super::AssignContext;

/// One tier of the assignment chain.
pub trait Resolver: Send + Sync {
    fn try_resolve(
        &self,
        unit: &WorkUnit,
        ctx: &AssignContext<'_>,
        workload: &WorkloadCounter,
    ) -> Option<AssignmentDecision>;
}

/// Assigns the top-ranked eligible candidate when they are under quota.
pub struct DirectResolver;

impl Resolver for DirectResolver {
    fn try_resolve(
        &self,
        unit: &WorkUnit,
        ctx: &AssignContext<'_>,
        workload: &WorkloadCounter,
    ) -> Option<AssignmentDecision> {
        let candidates = ctx.unit_candidates(unit);
        let inactive_ok = ctx.inactive_allowed(&candidates);
        let top = candidates
            .iter()
            .find(|stat| ctx.is_eligible(stat, inactive_ok))?;
        if !workload.under_quota(&top.author, ctx.config.max_tasks_per_person) {
            return None;
        }
        Some(decision_for(unit, ctx, &candidates, &top.author, ReasonCode::Direct))
    }
}

/// Skips past over-quota candidates to the best eligible one with spare
/// capacity.
pub struct LoadBalanceResolver;

impl Resolver for LoadBalanceResolver {
    fn try_resolve(
        &self,
        unit: &WorkUnit,
        ctx: &AssignContext<'_>,
        workload: &WorkloadCounter,
    ) -> Option<AssignmentDecision> {
        let candidates = ctx.unit_candidates(unit);
        let inactive_ok = ctx.inactive_allowed(&candidates);
        let pick = candidates
            .iter()
            .filter(|stat| ctx.is_eligible(stat, inactive_ok))
            .find(|stat| workload.under_quota(&stat.author, ctx.config.max_tasks_per_person))?;
        let primary = pick.author.clone();
        Some(decision_for(
            unit,
            ctx,
            &candidates,
            &primary,
            ReasonCode::LoadBalanced,
        ))
    }
}

/// When a unit has no assignable per-file candidate, borrows contributors
/// from the nearest ancestor directory with indexed files.
pub struct DirectoryFallbackResolver;

impl Resolver for DirectoryFallbackResolver {
    fn try_resolve(
        &self,
        unit: &WorkUnit,
        ctx: &AssignContext<'_>,
        workload: &WorkloadCounter,
    ) -> Option<AssignmentDecision> {
        if ctx.has_eligible_candidate(unit) {
            return None;
        }
        let index = ctx.index?;
        for path in &unit.paths {
            for dir in ancestor_dirs(path) {
                let aggregates = index.directory_aggregate(&dir);
                if aggregates.is_empty() {
                    continue;
                }
                let stats = scoring::stats_from_single_window(&aggregates);
                let ranking = scoring::rank(path, stats, ctx.active, ctx.config, ctx.now);
                if let Some(decision) = pick_from_ranked(
                    unit,
                    ctx,
                    workload,
                    &ranking.contributors,
                    ReasonCode::DirectoryFallback(dir.clone()),
                ) {
                    debug!("unit {} resolved from directory {}", unit.id, dir);
                    return Some(decision);
                }
            }
        }
        None
    }
}

/// Last tier: weights every known author by repository-wide activity
/// share and assigns the best eligible one.
pub struct GlobalFallbackResolver;

impl Resolver for GlobalFallbackResolver {
    fn try_resolve(
        &self,
        unit: &WorkUnit,
        ctx: &AssignContext<'_>,
        workload: &WorkloadCounter,
    ) -> Option<AssignmentDecision> {
        if ctx.has_eligible_candidate(unit) {
            return None;
        }
        let index = ctx.index?;
        let activity = index.author_activity();
        if activity.is_empty() {
            return None;
        }
        let total: usize = activity.values().sum();
        let aggregates = activity
            .iter()
            .map(|(author, count)| {
                let weight = ((count * 5) / total.max(1)).max(1);
                (
                    author.clone(),
                    AuthorAggregate {
                        commits: weight,
                        ..AuthorAggregate::default()
                    },
                )
            })
            .collect();
        let stats = scoring::stats_from_single_window(&aggregates);
        let path = unit.paths.first().map(String::as_str).unwrap_or(&unit.id);
        let ranking = scoring::rank(path, stats, ctx.active, ctx.config, ctx.now);
        pick_from_ranked(
            unit,
            ctx,
            workload,
            &ranking.contributors,
            ReasonCode::GlobalFallback,
        )
    }
}

/// First eligible under-quota candidate from an already ranked list.
fn pick_from_ranked(
    unit: &WorkUnit,
    ctx: &AssignContext<'_>,
    workload: &WorkloadCounter,
    ranked: &[ContributorStat],
    reason: ReasonCode,
) -> Option<AssignmentDecision> {
    let inactive_ok = ctx.inactive_allowed(ranked);
    let pick = ranked
        .iter()
        .filter(|stat| ctx.is_eligible(stat, inactive_ok))
        .find(|stat| workload.under_quota(&stat.author, ctx.config.max_tasks_per_person))?;
    let primary = pick.author.clone();
    Some(AssignmentDecision {
        unit_id: unit.id.clone(),
        primary: Some(primary.clone()),
        alternates: ctx.alternates(ranked, &primary),
        reason,
        candidate_count: ranked.len(),
        eligible_count: count_eligible(ctx, ranked),
    })
}

fn decision_for(
    unit: &WorkUnit,
    ctx: &AssignContext<'_>,
    candidates: &[ContributorStat],
    primary: &str,
    reason: ReasonCode,
) -> AssignmentDecision {
    AssignmentDecision {
        unit_id: unit.id.clone(),
        primary: Some(primary.to_string()),
        alternates: ctx.alternates(candidates, primary),
        reason,
        candidate_count: candidates.len(),
        eligible_count: count_eligible(ctx, candidates),
    }
}

fn count_eligible(ctx: &AssignContext<'_>, candidates: &[ContributorStat]) -> usize {
    let inactive_ok = ctx.inactive_allowed(candidates);
    candidates
        .iter()
        .filter(|stat| ctx.is_eligible(stat, inactive_ok))
        .count()
}
