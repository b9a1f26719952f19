//! Bid CPC adjustment driven by yesterday's spend against the daily budget.

use autopilot_core::config::CpcAutopilotConfig;
use autopilot_core::types::CpcChangeComment;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpcRecommendation {
    pub old_cpc: Decimal,
    pub new_cpc: Decimal,
    pub cpc_comments: Vec<CpcChangeComment>,
}

/// Raise the bid of underspending sources and lower it for overspending ones,
/// following the configured change table. Invalid input leaves the CPC as is
/// and explains why in the comments.
pub fn calculate_new_autopilot_cpc(
    current_cpc: Decimal,
    current_daily_budget: Decimal,
    yesterdays_spend: Decimal,
    cfg: &CpcAutopilotConfig,
) -> (Decimal, Vec<CpcChangeComment>) {
    let mut comments = Vec::new();
    if current_cpc <= Decimal::ZERO {
        comments.push(CpcChangeComment::CpcNotSet);
    }
    if current_cpc < cfg.min_cpc {
        comments.push(CpcChangeComment::CurrentCpcTooLow);
    }
    if current_cpc > cfg.max_cpc {
        comments.push(CpcChangeComment::CurrentCpcTooHigh);
    }
    if current_daily_budget <= Decimal::ZERO {
        comments.push(CpcChangeComment::BudgetNotSet);
    }
    if yesterdays_spend <= Decimal::ZERO {
        comments.push(CpcChangeComment::NoYesterdaySpending);
    }
    if !comments.is_empty() {
        return (current_cpc, comments);
    }

    let spending_perc = (yesterdays_spend / current_daily_budget - Decimal::ONE)
        .to_f64()
        .unwrap_or(0.0);

    for row in &cfg.change_table {
        if row.underspend_upper_limit <= spending_perc
            && spending_perc <= row.underspend_lower_limit
        {
            let new_cpc = (current_cpc * (Decimal::ONE + row.bid_cpc_proc_increase))
                .round_dp(3)
                .clamp(cfg.min_cpc, cfg.max_cpc);
            return (new_cpc, comments);
        }
    }

    (current_cpc, vec![CpcChangeComment::OptimalSpend])
}

pub fn get_autopilot_cpc_recommendation(
    current_cpc: Decimal,
    current_daily_budget: Decimal,
    yesterdays_spend: Decimal,
    cfg: &CpcAutopilotConfig,
) -> CpcRecommendation {
    let (new_cpc, cpc_comments) =
        calculate_new_autopilot_cpc(current_cpc, current_daily_budget, yesterdays_spend, cfg);
    CpcRecommendation {
        old_cpc: current_cpc,
        new_cpc,
        cpc_comments,
    }
}
