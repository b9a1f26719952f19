//! Landing mode: scale delivery down when the campaign budget is about to run out.

use std::collections::BTreeMap;

use autopilot_core::config::CampaignStopConfig;
use autopilot_core::types::Source;
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum LandingDecision {
    /// Remaining budget covers full delivery.
    Normal,
    /// Reduced daily budgets keyed by source key; they add up to the remaining
    /// budget spread over the landing period.
    Landing { daily_budgets: BTreeMap<String, Decimal> },
    /// Remaining budget is too small to deliver at all.
    Stop,
}

/// Budget needed to keep every source running at its daily budget for `days`.
pub fn minimum_remaining_budget<'a>(
    daily_budgets: impl IntoIterator<Item = &'a Decimal>,
    days: u32,
) -> Decimal {
    daily_budgets.into_iter().copied().sum::<Decimal>() * Decimal::from(days)
}

pub fn evaluate_landing_mode(
    remaining_budget: Decimal,
    daily_budgets: &BTreeMap<Source, Decimal>,
    cfg: &CampaignStopConfig,
) -> LandingDecision {
    if remaining_budget < cfg.stop_threshold {
        return LandingDecision::Stop;
    }

    let total_daily: Decimal = daily_budgets.values().copied().sum();
    if total_daily <= Decimal::ZERO
        || remaining_budget >= minimum_remaining_budget(daily_budgets.values(), cfg.landing_days)
    {
        return LandingDecision::Normal;
    }

    let target_total = (remaining_budget / Decimal::from(cfg.landing_days)).floor();
    let mut scaled: BTreeMap<String, Decimal> = daily_budgets
        .iter()
        .map(|(s, budget)| {
            (
                s.key().to_string(),
                (*budget * target_total / total_daily).floor(),
            )
        })
        .collect();

    let mut left = target_total - scaled.values().copied().sum::<Decimal>();
    let funded: Vec<String> = daily_budgets
        .iter()
        .filter(|(_, budget)| **budget > Decimal::ZERO)
        .map(|(s, _)| s.key().to_string())
        .collect();
    while left >= Decimal::ONE {
        for key in &funded {
            if left < Decimal::ONE {
                break;
            }
            if let Some(budget) = scaled.get_mut(key) {
                *budget += Decimal::ONE;
                left -= Decimal::ONE;
            }
        }
    }

    tracing::info!(
        %remaining_budget,
        %total_daily,
        %target_total,
        "Campaign entering landing mode"
    );
    LandingDecision::Landing {
        daily_budgets: scaled,
    }
}
