//! Turns the persistence layer's per-source snapshot into optimizer input.

use std::collections::BTreeMap;

use autopilot_core::types::{CampaignGoal, Source, SourceSpendRecord};
use rust_decimal::Decimal;

/// Per-source input keyed by source.
pub type SourceData = BTreeMap<Source, SourceSpendRecord>;

/// Sources the optimizer distributes budget over, in key order.
///
/// With `rtb_as_one` every RTB exchange is replaced by the aggregate
/// pseudo-source; without it the aggregate is ignored.
pub fn get_active_sources(data: &SourceData, rtb_as_one: bool) -> Vec<Source> {
    data.keys()
        .filter(|s| {
            if rtb_as_one {
                !s.is_rtb_exchange()
            } else {
                !s.is_aggregate()
            }
        })
        .cloned()
        .collect()
}

/// Add the aggregate RTB record when RTB sources are managed as one and the
/// caller did not provide it, summing budgets and spend of the RTB exchanges.
pub fn with_rtb_aggregate(mut data: SourceData, rtb_as_one: bool) -> SourceData {
    if !rtb_as_one || data.contains_key(&Source::AllRtb) {
        return data;
    }

    let rtb: Vec<&SourceSpendRecord> = data
        .iter()
        .filter(|(s, _)| s.is_rtb_exchange())
        .map(|(_, r)| r)
        .collect();
    if rtb.is_empty() {
        return data;
    }

    let aggregate = SourceSpendRecord::new(
        rtb.iter().map(|r| r.old_budget).sum::<Decimal>(),
        rtb.iter().map(|r| r.yesterdays_spend).sum::<Decimal>(),
    );
    data.insert(Source::AllRtb, aggregate);
    data
}

/// Extremes of the goal column across active sources, used to normalize a
/// source's goal value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GoalRange {
    /// Smallest positive value, infinite when no source has one.
    pub min_value: f64,
    /// Largest value, zero when no source has data.
    pub max_value: f64,
}

impl Default for GoalRange {
    fn default() -> Self {
        Self {
            min_value: f64::INFINITY,
            max_value: 0.0,
        }
    }
}

pub fn goal_range(data: &SourceData, sources: &[Source], goal: Option<&CampaignGoal>) -> GoalRange {
    let Some(goal) = goal else {
        return GoalRange::default();
    };

    sources
        .iter()
        .filter_map(|s| data.get(s))
        .filter_map(|r| r.metrics.column(goal.kpi))
        .fold(GoalRange::default(), |range, value| GoalRange {
            min_value: if value > 0.0 {
                range.min_value.min(value)
            } else {
                range.min_value
            },
            max_value: range.max_value.max(value),
        })
}
