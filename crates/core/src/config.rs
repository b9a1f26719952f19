use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::{AutopilotError, AutopilotResult};
use crate::types::CampaignGoalKpi;

/// Root autopilot configuration. Loaded from environment variables
/// with the prefix `BUDGET_AUTOPILOT__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AutopilotConfig {
    #[serde(default)]
    pub budget: BudgetAutopilotConfig,
    #[serde(default = "default_goals")]
    pub goals: BTreeMap<CampaignGoalKpi, GoalWeights>,
    #[serde(default)]
    pub cpc: CpcAutopilotConfig,
    #[serde(default)]
    pub campaign_stop: CampaignStopConfig,
    /// Hours after a budget change during which an ad group is not re-optimized.
    #[serde(default = "default_cooldown_hours")]
    pub cooldown_hours: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BudgetAutopilotConfig {
    /// Upper bound on a source's budget relative to its current budget.
    #[serde(default = "default_max_budget_gain")]
    pub max_budget_gain: Decimal,
    /// Lower bound on a source's budget relative to its current budget.
    #[serde(default = "default_max_budget_loss")]
    pub max_budget_loss: Decimal,
    /// Fraction of its budget a source must have spent yesterday to take part
    /// in bandit allocation.
    #[serde(default = "default_min_spend_perc")]
    pub min_spend_perc: f64,
    /// Global per-source floor, also used as the spend-ratio denominator floor.
    #[serde(default = "default_min_source_budget")]
    pub min_source_budget: Decimal,
    #[serde(default = "default_spend_perc_lowering_threshold")]
    pub spend_perc_lowering_threshold: f64,
    #[serde(default = "default_low_spend_prob_lowering_factor")]
    pub low_spend_prob_lowering_factor: f64,
    #[serde(default = "default_training_rounds")]
    pub training_rounds: u32,
    #[serde(default = "default_prior")]
    pub prior_alpha: f64,
    #[serde(default = "default_prior")]
    pub prior_beta: f64,
    #[serde(default = "default_all_rtb_min_daily_budget")]
    pub all_rtb_min_daily_budget: Decimal,
    #[serde(default = "default_all_rtb_max_daily_budget")]
    pub all_rtb_max_daily_budget: Decimal,
}

/// How much of the success probability comes from spend efficiency; the
/// remainder is weighted by the campaign goal.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct GoalWeights {
    pub spend_perc: f64,
}

impl GoalWeights {
    pub fn goal_perc(&self) -> f64 {
        1.0 - self.spend_perc
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CpcChangeRow {
    pub underspend_upper_limit: f64,
    pub underspend_lower_limit: f64,
    pub bid_cpc_proc_increase: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CpcAutopilotConfig {
    #[serde(default = "default_min_cpc")]
    pub min_cpc: Decimal,
    #[serde(default = "default_max_cpc")]
    pub max_cpc: Decimal,
    #[serde(default = "default_cpc_change_table")]
    pub change_table: Vec<CpcChangeRow>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CampaignStopConfig {
    /// Days of full delivery the remaining campaign budget must cover before
    /// the campaign is put into landing mode.
    #[serde(default = "default_landing_days")]
    pub landing_days: u32,
    /// Remaining budget below which delivery is stopped outright.
    #[serde(default = "default_stop_threshold")]
    pub stop_threshold: Decimal,
}

// Default functions
fn default_cooldown_hours() -> i64 {
    12
}
fn default_max_budget_gain() -> Decimal {
    Decimal::new(12, 1)
}
fn default_max_budget_loss() -> Decimal {
    Decimal::new(8, 1)
}
fn default_min_spend_perc() -> f64 {
    0.5
}
fn default_min_source_budget() -> Decimal {
    Decimal::from(5)
}
fn default_spend_perc_lowering_threshold() -> f64 {
    0.6
}
fn default_low_spend_prob_lowering_factor() -> f64 {
    0.2
}
fn default_training_rounds() -> u32 {
    5
}
fn default_prior() -> f64 {
    1.0
}
fn default_all_rtb_min_daily_budget() -> Decimal {
    Decimal::from(10)
}
fn default_all_rtb_max_daily_budget() -> Decimal {
    Decimal::from(10_000)
}
fn default_min_cpc() -> Decimal {
    Decimal::new(5, 2)
}
fn default_max_cpc() -> Decimal {
    Decimal::from(3)
}
fn default_landing_days() -> u32 {
    2
}
fn default_stop_threshold() -> Decimal {
    Decimal::ONE
}

fn default_goals() -> BTreeMap<CampaignGoalKpi, GoalWeights> {
    [
        (CampaignGoalKpi::MaxBounceRate, 0.3),
        (CampaignGoalKpi::NewUniqueVisitors, 0.2),
        (CampaignGoalKpi::TimeOnSite, 0.2),
        (CampaignGoalKpi::PagesPerSession, 0.2),
        (CampaignGoalKpi::Cpa, 0.3),
        (CampaignGoalKpi::Cpc, 0.1),
        (CampaignGoalKpi::Cpv, 0.2),
        (CampaignGoalKpi::CpNonBouncedVisit, 0.2),
    ]
    .into_iter()
    .map(|(kpi, spend_perc)| (kpi, GoalWeights { spend_perc }))
    .collect()
}

fn default_cpc_change_table() -> Vec<CpcChangeRow> {
    let row = |upper: f64, lower: f64, increase: Decimal| CpcChangeRow {
        underspend_upper_limit: upper,
        underspend_lower_limit: lower,
        bid_cpc_proc_increase: increase,
    };
    vec![
        row(-1.0, -0.5, Decimal::new(1, 1)),
        row(-0.5, -0.1, Decimal::new(5, 1)),
        row(-0.1, -0.05, Decimal::new(1, 1)),
        row(0.05, 100.0, Decimal::new(-1, 1)),
    ]
}

impl Default for BudgetAutopilotConfig {
    fn default() -> Self {
        Self {
            max_budget_gain: default_max_budget_gain(),
            max_budget_loss: default_max_budget_loss(),
            min_spend_perc: default_min_spend_perc(),
            min_source_budget: default_min_source_budget(),
            spend_perc_lowering_threshold: default_spend_perc_lowering_threshold(),
            low_spend_prob_lowering_factor: default_low_spend_prob_lowering_factor(),
            training_rounds: default_training_rounds(),
            prior_alpha: default_prior(),
            prior_beta: default_prior(),
            all_rtb_min_daily_budget: default_all_rtb_min_daily_budget(),
            all_rtb_max_daily_budget: default_all_rtb_max_daily_budget(),
        }
    }
}

impl Default for CpcAutopilotConfig {
    fn default() -> Self {
        Self {
            min_cpc: default_min_cpc(),
            max_cpc: default_max_cpc(),
            change_table: default_cpc_change_table(),
        }
    }
}

impl Default for CampaignStopConfig {
    fn default() -> Self {
        Self {
            landing_days: default_landing_days(),
            stop_threshold: default_stop_threshold(),
        }
    }
}

impl Default for AutopilotConfig {
    fn default() -> Self {
        Self {
            budget: BudgetAutopilotConfig::default(),
            goals: default_goals(),
            cpc: CpcAutopilotConfig::default(),
            campaign_stop: CampaignStopConfig::default(),
            cooldown_hours: default_cooldown_hours(),
        }
    }
}

impl AutopilotConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("BUDGET_AUTOPILOT")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Reject settings the optimizer cannot run with.
    pub fn validate(&self) -> AutopilotResult<()> {
        let budget = &self.budget;
        if budget.min_source_budget <= Decimal::ZERO {
            return Err(AutopilotError::Config(
                "budget.min_source_budget must be positive".to_string(),
            ));
        }
        if budget.max_budget_gain < Decimal::ONE {
            return Err(AutopilotError::Config(
                "budget.max_budget_gain must be at least 1".to_string(),
            ));
        }
        if budget.max_budget_loss <= Decimal::ZERO || budget.max_budget_loss > Decimal::ONE {
            return Err(AutopilotError::Config(
                "budget.max_budget_loss must be in (0, 1]".to_string(),
            ));
        }
        if budget.prior_alpha <= 0.0 || budget.prior_beta <= 0.0 {
            return Err(AutopilotError::Config(
                "bandit prior must be positive".to_string(),
            ));
        }
        if let Some((kpi, _)) = self
            .goals
            .iter()
            .find(|(_, w)| !(0.0..=1.0).contains(&w.spend_perc))
        {
            return Err(AutopilotError::Config(format!(
                "goals.{kpi:?}.spend_perc must be in [0, 1]"
            )));
        }
        if self.cpc.min_cpc > self.cpc.max_cpc {
            return Err(AutopilotError::Config(
                "cpc.min_cpc must not exceed cpc.max_cpc".to_string(),
            ));
        }
        if self.campaign_stop.landing_days == 0 {
            return Err(AutopilotError::Config(
                "campaign_stop.landing_days must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
