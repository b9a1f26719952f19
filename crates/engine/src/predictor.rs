//! Scores how likely it is that giving a source more budget pays off.

use autopilot_core::config::AutopilotConfig;
use autopilot_core::types::{CampaignGoal, CampaignGoalKpi, Source, SourceSpendRecord};
use autopilot_core::{AutopilotError, AutopilotResult};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::loader::GoalRange;
use crate::random::RandomSource;

/// Fraction of its (possibly hypothetical) budget the source spent yesterday.
/// The denominator is floored at the global minimum source budget.
pub fn spend_perc(
    record: &SourceSpendRecord,
    new_budget: Option<Decimal>,
    cfg: &AutopilotConfig,
) -> f64 {
    let budget = new_budget
        .unwrap_or(record.old_budget)
        .max(cfg.budget.min_source_budget);
    if budget <= Decimal::ZERO {
        return 0.0;
    }
    (record.yesterdays_spend / budget).to_f64().unwrap_or(0.0)
}

/// Goal column value normalized to `[0, 1]`, higher meaning better.
pub fn goal_value(
    kpi: CampaignGoalKpi,
    value: Option<f64>,
    range: GoalRange,
) -> AutopilotResult<f64> {
    let value = value.unwrap_or(0.0);
    let normalized = match kpi {
        CampaignGoalKpi::MaxBounceRate => (100.0 - value) / 100.0,
        CampaignGoalKpi::NewUniqueVisitors => value / 100.0,
        CampaignGoalKpi::TimeOnSite | CampaignGoalKpi::PagesPerSession | CampaignGoalKpi::Cpa => {
            if range.max_value > 0.0 {
                value / range.max_value
            } else {
                0.0
            }
        }
        CampaignGoalKpi::Cpc | CampaignGoalKpi::Cpv | CampaignGoalKpi::CpNonBouncedVisit => {
            if value > 0.0 && range.min_value.is_finite() {
                range.min_value / value
            } else {
                0.0
            }
        }
        CampaignGoalKpi::Cpm | CampaignGoalKpi::Roas => {
            return Err(AutopilotError::UnsupportedGoalType(kpi))
        }
    };
    Ok(normalized.clamp(0.0, 1.0))
}

/// Probability that the next budget increment for this source is a success.
pub fn success_probability(
    record: &SourceSpendRecord,
    campaign_goal: Option<&CampaignGoal>,
    range: GoalRange,
    new_budget: Option<Decimal>,
    cfg: &AutopilotConfig,
) -> AutopilotResult<f64> {
    let spend_perc = spend_perc(record, new_budget, cfg);

    let Some(goal) = campaign_goal else {
        return Ok(spend_perc.clamp(0.0, 1.0));
    };

    let goal_value = goal_value(goal.kpi, record.metrics.column(goal.kpi), range)?;
    let weights = cfg
        .goals
        .get(&goal.kpi)
        .ok_or(AutopilotError::UnsupportedGoalType(goal.kpi))?;

    let mut prob = (spend_perc * weights.spend_perc).min(weights.spend_perc)
        + goal_value * weights.goal_perc();
    if spend_perc < cfg.budget.spend_perc_lowering_threshold {
        prob *= cfg.budget.low_spend_prob_lowering_factor;
    }
    Ok(prob.clamp(0.0, 1.0))
}

/// Bernoulli draw against [`success_probability`].
pub fn predict_outcome_success<R: RandomSource + ?Sized>(
    source: &Source,
    record: &SourceSpendRecord,
    campaign_goal: Option<&CampaignGoal>,
    range: GoalRange,
    new_budget: Option<Decimal>,
    cfg: &AutopilotConfig,
    rng: &mut R,
) -> AutopilotResult<bool> {
    let prob = success_probability(record, campaign_goal, range, new_budget, cfg)?;
    let success = rng.uniform() < prob;
    tracing::trace!(source = %source, prob, success, "Predicted outcome");
    Ok(success)
}
