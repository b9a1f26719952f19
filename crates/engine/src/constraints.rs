//! Per-source budget bounds for one reallocation run.

use std::collections::BTreeMap;

use autopilot_core::config::BudgetAutopilotConfig;
use autopilot_core::types::{BudgetLimits, Source};
use rust_decimal::Decimal;

use crate::loader::SourceData;

/// Bounds for one source. `min_budget <= max_budget` always holds and the
/// minimum never drops below the source type's minimum daily budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetConstraint {
    pub min_budget: Decimal,
    pub max_budget: Decimal,
    pub old_budget: Decimal,
}

pub type BudgetConstraintSet = BTreeMap<Source, BudgetConstraint>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintPolicy {
    /// Budgets may move within a percentage band around the current budget.
    Optimistic,
    /// Every source starts from its type minimum.
    Minimum,
}

/// Sum of the minimum budgets in a constraint set.
pub fn sum_min_budgets(constraints: &BudgetConstraintSet) -> Decimal {
    constraints.values().map(|c| c.min_budget).sum()
}

/// Optimistic bounds, falling back to the minimum policy when the optimistic
/// minimums alone exceed the daily budget.
pub fn get_autopilot_budget_constraints(
    sources: &[Source],
    data: &SourceData,
    daily_budget: Decimal,
    cfg: &BudgetAutopilotConfig,
) -> (ConstraintPolicy, BudgetConstraintSet) {
    let optimistic = get_optimistic_autopilot_budget_constraints(sources, data, cfg);
    if sum_min_budgets(&optimistic) <= daily_budget {
        return (ConstraintPolicy::Optimistic, optimistic);
    }

    tracing::debug!(
        %daily_budget,
        optimistic_min = %sum_min_budgets(&optimistic),
        "Optimistic budget constraints infeasible, using source minimums"
    );
    (
        ConstraintPolicy::Minimum,
        get_minimum_autopilot_budget_constraints(sources, data, cfg),
    )
}

pub fn get_optimistic_autopilot_budget_constraints(
    sources: &[Source],
    data: &SourceData,
    cfg: &BudgetAutopilotConfig,
) -> BudgetConstraintSet {
    sources
        .iter()
        .map(|source| {
            let old_budget = old_budget(data, source);
            let base = if old_budget > Decimal::ZERO {
                old_budget
            } else {
                source.default_budget(cfg)
            };

            let min_budget = (base * cfg.max_budget_loss)
                .ceil()
                .max(cfg.min_source_budget.ceil())
                .max(source.min_daily_budget(cfg).ceil());
            let max_budget = (base * cfg.max_budget_gain)
                .ceil()
                .min(source.max_daily_budget(cfg))
                .max(min_budget);

            (
                source.clone(),
                BudgetConstraint {
                    min_budget,
                    max_budget,
                    old_budget,
                },
            )
        })
        .collect()
}

pub fn get_minimum_autopilot_budget_constraints(
    sources: &[Source],
    data: &SourceData,
    cfg: &BudgetAutopilotConfig,
) -> BudgetConstraintSet {
    sources
        .iter()
        .map(|source| {
            let min_budget = source.min_daily_budget(cfg).ceil();
            let max_budget = (min_budget * cfg.max_budget_gain)
                .ceil()
                .min(source.max_daily_budget(cfg))
                .max(min_budget);

            (
                source.clone(),
                BudgetConstraint {
                    min_budget,
                    max_budget,
                    old_budget: old_budget(data, source),
                },
            )
        })
        .collect()
}

fn old_budget(data: &SourceData, source: &Source) -> Decimal {
    data.get(source)
        .map(|r| r.old_budget)
        .unwrap_or(Decimal::ZERO)
}
