//! Daily budget reallocation across an ad group's sources.
//!
//! Every source starts at its constraint minimum; the remaining budget is then
//! handed out one currency unit at a time. Sources that spent enough yesterday
//! compete for units through a Thompson-sampling bandit, otherwise units are
//! spread round-robin. The result is all-or-nothing: if the new budgets do not
//! add up to the daily budget every source keeps its old budget.

use std::collections::BTreeMap;

use autopilot_core::config::AutopilotConfig;
use autopilot_core::types::{
    AdGroup, AllocationResult, BudgetChangeComment, BudgetRecommendation, CampaignGoal, Source,
    SourceSpendRecord,
};
use autopilot_core::AutopilotResult;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::bandit::BetaBandit;
use crate::constraints::{get_autopilot_budget_constraints, sum_min_budgets, BudgetConstraintSet};
use crate::loader::{get_active_sources, goal_range, with_rtb_aggregate, SourceData};
use crate::predictor::{predict_outcome_success, spend_perc};
use crate::random::RandomSource;

type Budgets = BTreeMap<Source, Decimal>;

pub fn get_autopilot_daily_budget_recommendations<R: RandomSource + ?Sized>(
    ad_group: &AdGroup,
    daily_budget: Decimal,
    data: &SourceData,
    campaign_goal: Option<&CampaignGoal>,
    rtb_as_one: bool,
    cfg: &AutopilotConfig,
    rng: &mut R,
) -> AutopilotResult<AllocationResult> {
    let data = &with_rtb_aggregate(data.clone(), rtb_as_one);
    let active_sources = get_active_sources(data, rtb_as_one);
    if active_sources.is_empty() {
        debug!(ad_group_id = %ad_group.id, "No active sources, nothing to redistribute");
        return Ok(AllocationResult::new());
    }

    let (policy, constraints) =
        get_autopilot_budget_constraints(&active_sources, data, daily_budget, &cfg.budget);
    let mut new_budgets: Budgets = constraints
        .iter()
        .map(|(s, c)| (s.clone(), c.min_budget))
        .collect();
    let mut budget_left = daily_budget - sum_min_budgets(&constraints);
    let mut comments = Vec::new();

    let mut sources_with_spend: Vec<Source> = active_sources
        .iter()
        .filter(|s| has_enough_spend(&data[*s], cfg))
        .cloned()
        .collect();

    info!(
        ad_group_id = %ad_group.id,
        %daily_budget,
        policy = ?policy,
        active_sources = active_sources.len(),
        sources_with_spend = sources_with_spend.len(),
        "Running budget autopilot"
    );

    if sources_with_spend.is_empty() {
        uniformly_redistribute_remaining_budget(
            &active_sources,
            &constraints,
            &mut new_budgets,
            budget_left,
        );
        comments.push(BudgetChangeComment::NoActiveSourcesWithSpend);
        return Ok(finalize_allocation(
            ad_group,
            daily_budget,
            data,
            &active_sources,
            &new_budgets,
            comments,
        ));
    }

    let range = goal_range(data, &active_sources, campaign_goal);
    let mut bandit = BetaBandit::new(
        sources_with_spend.clone(),
        active_sources.clone(),
        (cfg.budget.prior_alpha, cfg.budget.prior_beta),
    );

    for source in &sources_with_spend {
        for _ in 0..cfg.budget.training_rounds {
            let success = predict_outcome_success(
                source,
                &data[source],
                campaign_goal,
                range,
                None,
                cfg,
                rng,
            )?;
            bandit.add_result(source, success);
        }
    }

    // Sources whose minimum already equals their maximum take no increments.
    let capped: Vec<Source> = sources_with_spend
        .iter()
        .filter(|s| new_budgets[*s] >= constraints[*s].max_budget)
        .cloned()
        .collect();
    for source in &capped {
        sources_with_spend.retain(|s| s != source);
        bandit.remove_source(source);
    }

    while budget_left >= Decimal::ONE {
        if sources_with_spend.is_empty() {
            uniformly_redistribute_remaining_budget(
                &active_sources,
                &constraints,
                &mut new_budgets,
                budget_left,
            );
            comments.push(BudgetChangeComment::UsedUpBudgetThenUniformlyRedistributed);
            break;
        }

        let Some(source) = bandit.get_recommendation(rng) else {
            debug!(ad_group_id = %ad_group.id, %budget_left, "Bandit has no sources left");
            break;
        };

        budget_left -= Decimal::ONE;
        let new_budget = new_budgets.entry(source.clone()).or_insert(Decimal::ZERO);
        *new_budget += Decimal::ONE;
        let new_budget = *new_budget;

        let success = predict_outcome_success(
            &source,
            &data[&source],
            campaign_goal,
            range,
            Some(new_budget),
            cfg,
            rng,
        )?;
        bandit.add_result(&source, success);

        if new_budget >= constraints[&source].max_budget {
            sources_with_spend.retain(|s| s != &source);
            bandit.remove_source(&source);
        }
    }

    Ok(finalize_allocation(
        ad_group,
        daily_budget,
        data,
        &active_sources,
        &new_budgets,
        comments,
    ))
}

fn has_enough_spend(record: &SourceSpendRecord, cfg: &AutopilotConfig) -> bool {
    spend_perc(record, None, cfg) >= cfg.budget.min_spend_perc
}

/// Hand out whole units round-robin in source order, skipping sources already
/// at their maximum.
///
/// Returns the budget that could not be handed out: a fraction of a unit, or
/// more once every source is capped.
pub fn uniformly_redistribute_remaining_budget(
    sources: &[Source],
    constraints: &BudgetConstraintSet,
    new_budgets: &mut Budgets,
    budget_left: Decimal,
) -> Decimal {
    let mut budget_left = budget_left;
    if sources.is_empty() {
        return budget_left;
    }

    while budget_left >= Decimal::ONE {
        let below_max: Vec<&Source> = sources
            .iter()
            .filter(|s| {
                let current = new_budgets.get(*s).copied().unwrap_or(Decimal::ZERO);
                constraints.get(*s).map_or(true, |c| current < c.max_budget)
            })
            .collect();
        if below_max.is_empty() {
            break;
        }

        for source in below_max {
            if budget_left < Decimal::ONE {
                break;
            }
            *new_budgets.entry(source.clone()).or_insert(Decimal::ZERO) += Decimal::ONE;
            budget_left -= Decimal::ONE;
        }
    }

    budget_left
}

/// Build the result, reverting every source to its old budget when the new
/// budgets do not add up to the daily budget.
pub(crate) fn finalize_allocation(
    ad_group: &AdGroup,
    daily_budget: Decimal,
    data: &SourceData,
    active_sources: &[Source],
    new_budgets: &Budgets,
    comments: Vec<BudgetChangeComment>,
) -> AllocationResult {
    let old_budget = |s: &Source| data.get(s).map(|r| r.old_budget).unwrap_or(Decimal::ZERO);
    let total: Decimal = active_sources
        .iter()
        .map(|s| new_budgets.get(s).copied().unwrap_or(Decimal::ZERO))
        .sum();

    if total != daily_budget {
        warn!(
            ad_group_id = %ad_group.id,
            %daily_budget,
            new_total = %total,
            "Budget autopilot result does not match daily budget, keeping old budgets"
        );
        return active_sources
            .iter()
            .map(|s| {
                (
                    s.clone(),
                    BudgetRecommendation {
                        old_budget: old_budget(s),
                        new_budget: old_budget(s),
                        budget_comments: vec![BudgetChangeComment::NewBudgetNotEqualDailyBudget],
                    },
                )
            })
            .collect();
    }

    active_sources
        .iter()
        .map(|s| {
            let recommendation = BudgetRecommendation {
                old_budget: old_budget(s),
                new_budget: new_budgets.get(s).copied().unwrap_or(Decimal::ZERO),
                budget_comments: comments.clone(),
            };
            debug!(
                ad_group_id = %ad_group.id,
                source = %s,
                old_budget = %recommendation.old_budget,
                new_budget = %recommendation.new_budget,
                "Budget recommendation"
            );
            (s.clone(), recommendation)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::BudgetConstraint;
    use crate::random::{SequenceRandom, StdRandom};
    use autopilot_core::types::{CampaignGoalKpi, SourceType};
    use uuid::Uuid;

    fn ad_group() -> AdGroup {
        AdGroup {
            id: Uuid::new_v4(),
            campaign_id: Uuid::new_v4(),
            name: "test".to_string(),
        }
    }

    fn source(key: &str) -> Source {
        Source::media(
            key,
            SourceType {
                slug: key.to_string(),
                min_daily_budget: Decimal::from(5),
                max_daily_budget: Decimal::from(1000),
                is_rtb: false,
            },
        )
    }

    fn cfg() -> AutopilotConfig {
        let mut cfg = AutopilotConfig::default();
        cfg.budget.max_budget_gain = Decimal::new(15, 1);
        cfg
    }

    fn data(entries: &[(&str, i64, i64)]) -> SourceData {
        entries
            .iter()
            .map(|(key, budget, spend)| {
                (
                    source(key),
                    SourceSpendRecord::new(Decimal::from(*budget), Decimal::from(*spend)),
                )
            })
            .collect()
    }

    fn total(result: &AllocationResult) -> Decimal {
        result.values().map(|r| r.new_budget).sum()
    }

    #[test]
    fn test_three_sources_redistribution() {
        let data = data(&[("a", 20, 20), ("b", 20, 15), ("c", 20, 12)]);
        let mut rng = StdRandom::seeded(3);
        let result = get_autopilot_daily_budget_recommendations(
            &ad_group(),
            Decimal::from(66),
            &data,
            None,
            false,
            &cfg(),
            &mut rng,
        )
        .unwrap();

        assert_eq!(result.len(), 3);
        assert_eq!(total(&result), Decimal::from(66));
        for rec in result.values() {
            assert!(rec.new_budget <= Decimal::from(30));
            assert!(rec.new_budget >= Decimal::from(16));
            assert!(rec.budget_comments.is_empty());
        }
    }

    #[test]
    fn test_no_spend_is_uniform_and_deterministic() {
        let data = data(&[("a", 20, 0), ("b", 20, 0), ("c", 20, 0)]);
        let run = |seed| {
            get_autopilot_daily_budget_recommendations(
                &ad_group(),
                Decimal::from(62),
                &data,
                None,
                false,
                &cfg(),
                &mut StdRandom::seeded(seed),
            )
            .unwrap()
        };

        let first = run(1);
        assert_eq!(first, run(99));
        // 48 in minimums, 14 left: a and b get 5, c gets 4.
        let budgets: Vec<Decimal> = first.values().map(|r| r.new_budget).collect();
        assert_eq!(
            budgets,
            vec![Decimal::from(21), Decimal::from(21), Decimal::from(20)]
        );
        for rec in first.values() {
            assert_eq!(
                rec.budget_comments,
                vec![BudgetChangeComment::NoActiveSourcesWithSpend]
            );
        }
    }

    #[test]
    fn test_used_up_budget_then_uniform() {
        // Only "a" has spend; it caps at 30, the rest goes round-robin.
        let data = data(&[("a", 20, 20), ("b", 20, 0)]);
        let mut rng = SequenceRandom::constant(0.0);
        let result = get_autopilot_daily_budget_recommendations(
            &ad_group(),
            Decimal::from(50),
            &data,
            None,
            false,
            &cfg(),
            &mut rng,
        )
        .unwrap();

        assert_eq!(result[&source("a")].new_budget, Decimal::from(30));
        assert_eq!(result[&source("b")].new_budget, Decimal::from(20));
        assert_eq!(
            result[&source("a")].budget_comments,
            vec![BudgetChangeComment::UsedUpBudgetThenUniformlyRedistributed]
        );
    }

    #[test]
    fn test_fractional_remainder_reverts() {
        let data = data(&[("a", 20, 20), ("b", 20, 20)]);
        let mut rng = StdRandom::seeded(5);
        let result = get_autopilot_daily_budget_recommendations(
            &ad_group(),
            Decimal::new(405, 1),
            &data,
            None,
            false,
            &cfg(),
            &mut rng,
        )
        .unwrap();

        for rec in result.values() {
            assert_eq!(rec.new_budget, rec.old_budget);
            assert_eq!(
                rec.budget_comments,
                vec![BudgetChangeComment::NewBudgetNotEqualDailyBudget]
            );
        }
    }

    #[test]
    fn test_finalize_reverts_on_mismatch() {
        let data = data(&[("a", 20, 20), ("b", 30, 20)]);
        let sources = vec![source("a"), source("b")];
        let mut new_budgets = Budgets::new();
        new_budgets.insert(source("a"), Decimal::from(26));
        new_budgets.insert(source("b"), Decimal::from(25));

        let result = finalize_allocation(
            &ad_group(),
            Decimal::from(50),
            &data,
            &sources,
            &new_budgets,
            vec![],
        );
        assert_eq!(result[&source("a")].new_budget, Decimal::from(20));
        assert_eq!(result[&source("b")].new_budget, Decimal::from(30));
        assert!(result.values().all(|r| r.budget_comments
            == vec![BudgetChangeComment::NewBudgetNotEqualDailyBudget]));
    }

    #[test]
    fn test_uniform_skips_capped_sources() {
        let sources = vec![source("a"), source("b")];
        let constraints: BudgetConstraintSet = [
            (
                source("a"),
                BudgetConstraint {
                    min_budget: Decimal::from(5),
                    max_budget: Decimal::from(6),
                    old_budget: Decimal::from(5),
                },
            ),
            (
                source("b"),
                BudgetConstraint {
                    min_budget: Decimal::from(5),
                    max_budget: Decimal::from(20),
                    old_budget: Decimal::from(5),
                },
            ),
        ]
        .into_iter()
        .collect();
        let mut budgets: Budgets = sources.iter().map(|s| (s.clone(), Decimal::from(5))).collect();

        let left = uniformly_redistribute_remaining_budget(
            &sources,
            &constraints,
            &mut budgets,
            Decimal::new(65, 1),
        );
        assert_eq!(left, Decimal::new(5, 1));
        assert_eq!(budgets[&source("a")], Decimal::from(6));
        assert_eq!(budgets[&source("b")], Decimal::from(10));
    }

    #[test]
    fn test_budget_above_all_maximums_reverts() {
        // Maximums are 3 x 30 = 90, far below the daily budget.
        let data = data(&[("a", 20, 20), ("b", 20, 20), ("c", 20, 20)]);
        let result = get_autopilot_daily_budget_recommendations(
            &ad_group(),
            Decimal::from(200),
            &data,
            None,
            false,
            &cfg(),
            &mut StdRandom::seeded(7),
        )
        .unwrap();

        assert_eq!(result.len(), 3);
        for rec in result.values() {
            assert_eq!(rec.new_budget, Decimal::from(20));
            assert_eq!(
                rec.budget_comments,
                vec![BudgetChangeComment::NewBudgetNotEqualDailyBudget]
            );
        }
    }

    #[test]
    fn test_uniform_stops_when_all_capped() {
        let sources = vec![source("a"), source("b")];
        let constraints: BudgetConstraintSet = sources
            .iter()
            .map(|s| {
                (
                    s.clone(),
                    BudgetConstraint {
                        min_budget: Decimal::from(5),
                        max_budget: Decimal::from(6),
                        old_budget: Decimal::from(5),
                    },
                )
            })
            .collect();
        let mut budgets: Budgets = sources.iter().map(|s| (s.clone(), Decimal::from(5))).collect();

        let left = uniformly_redistribute_remaining_budget(
            &sources,
            &constraints,
            &mut budgets,
            Decimal::from(5),
        );
        assert_eq!(left, Decimal::from(3));
        assert_eq!(budgets[&source("a")], Decimal::from(6));
        assert_eq!(budgets[&source("b")], Decimal::from(6));
    }

    #[test]
    fn test_rtb_as_one_builds_aggregate() {
        let rtb = |key: &str| {
            Source::media(
                key,
                SourceType {
                    slug: "b1".to_string(),
                    min_daily_budget: Decimal::from(5),
                    max_daily_budget: Decimal::from(1000),
                    is_rtb: true,
                },
            )
        };
        let record =
            |budget: i64| SourceSpendRecord::new(Decimal::from(budget), Decimal::from(budget));
        let data: SourceData = [
            (source("outbrain"), record(30)),
            (rtb("adiant"), record(20)),
            (rtb("gravity"), record(20)),
        ]
        .into_iter()
        .collect();

        let result = get_autopilot_daily_budget_recommendations(
            &ad_group(),
            Decimal::from(70),
            &data,
            None,
            true,
            &cfg(),
            &mut StdRandom::seeded(11),
        )
        .unwrap();

        let keys: Vec<&str> = result.keys().map(|s| s.key()).collect();
        assert_eq!(keys, vec!["all_rtb", "outbrain"]);
        assert_eq!(total(&result), Decimal::from(70));
        let all_rtb = &result[&Source::AllRtb];
        assert_eq!(all_rtb.old_budget, Decimal::from(40));
        // Optimistic minimum is 0.8 x 40.
        assert!(all_rtb.new_budget >= Decimal::from(32));
        assert!(all_rtb.budget_comments.is_empty());
    }

    #[test]
    fn test_unsupported_goal_propagates() {
        let data = data(&[("a", 20, 20)]);
        let goal = CampaignGoal {
            kpi: CampaignGoalKpi::Roas,
        };
        let result = get_autopilot_daily_budget_recommendations(
            &ad_group(),
            Decimal::from(20),
            &data,
            Some(&goal),
            false,
            &cfg(),
            &mut StdRandom::seeded(1),
        );
        assert!(result.is_err());
    }
}
