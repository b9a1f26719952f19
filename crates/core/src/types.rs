use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::BudgetAutopilotConfig;

/// Key under which the aggregate RTB pseudo-source is reported.
pub const ALL_RTB_SOURCE_KEY: &str = "all_rtb";

/// Ad group whose daily budget is redistributed across its sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdGroup {
    pub id: Uuid,
    pub campaign_id: Uuid,
    #[serde(default)]
    pub name: String,
}

/// Exchange-level limits shared by every source of the same type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceType {
    pub slug: String,
    pub min_daily_budget: Decimal,
    pub max_daily_budget: Decimal,
    /// Real-time-bidding exchanges can be managed as one aggregate budget.
    #[serde(default)]
    pub is_rtb: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaSource {
    pub key: String,
    pub source_type: SourceType,
}

/// A media-buying channel, either a single exchange or the synthetic
/// "All RTB sources" aggregate.
///
/// Identity is the source key only, so two values describing the same exchange
/// compare equal even if their limits were loaded at different times.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Source {
    Media(MediaSource),
    AllRtb,
}

impl Source {
    pub fn media(key: impl Into<String>, source_type: SourceType) -> Self {
        Source::Media(MediaSource {
            key: key.into(),
            source_type,
        })
    }

    pub fn key(&self) -> &str {
        match self {
            Source::Media(media) => &media.key,
            Source::AllRtb => ALL_RTB_SOURCE_KEY,
        }
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, Source::AllRtb)
    }

    /// True for individual exchanges that the aggregate replaces when RTB sources
    /// are managed as one.
    pub fn is_rtb_exchange(&self) -> bool {
        match self {
            Source::Media(media) => media.source_type.is_rtb,
            Source::AllRtb => false,
        }
    }
}

impl PartialEq for Source {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Source {}

impl Hash for Source {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl PartialOrd for Source {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Source {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(other.key())
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Budget limits every source kind exposes to the optimizer.
pub trait BudgetLimits {
    fn min_daily_budget(&self, cfg: &BudgetAutopilotConfig) -> Decimal;
    fn max_daily_budget(&self, cfg: &BudgetAutopilotConfig) -> Decimal;
    /// Budget assumed for a source that currently has none.
    fn default_budget(&self, cfg: &BudgetAutopilotConfig) -> Decimal;
}

impl BudgetLimits for Source {
    fn min_daily_budget(&self, cfg: &BudgetAutopilotConfig) -> Decimal {
        match self {
            Source::Media(media) => media.source_type.min_daily_budget,
            Source::AllRtb => cfg.all_rtb_min_daily_budget,
        }
    }

    fn max_daily_budget(&self, cfg: &BudgetAutopilotConfig) -> Decimal {
        match self {
            Source::Media(media) => media.source_type.max_daily_budget,
            Source::AllRtb => cfg.all_rtb_max_daily_budget,
        }
    }

    fn default_budget(&self, cfg: &BudgetAutopilotConfig) -> Decimal {
        self.min_daily_budget(cfg).max(cfg.min_source_budget)
    }
}

/// Campaign KPI types known to the platform. Not all of them have a budget
/// autopilot transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignGoalKpi {
    MaxBounceRate,
    NewUniqueVisitors,
    TimeOnSite,
    PagesPerSession,
    Cpa,
    Cpc,
    Cpv,
    CpNonBouncedVisit,
    Cpm,
    Roas,
}

impl CampaignGoalKpi {
    /// Cost metrics where a lower value is the better outcome.
    pub fn lower_is_better(self) -> bool {
        matches!(
            self,
            CampaignGoalKpi::Cpc | CampaignGoalKpi::Cpv | CampaignGoalKpi::CpNonBouncedVisit
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignGoal {
    pub kpi: CampaignGoalKpi,
}

/// KPI columns reported per source. Missing values mean "no data".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GoalMetrics {
    pub bounce_rate: Option<f64>,
    pub percent_new_users: Option<f64>,
    pub avg_time_on_site: Option<f64>,
    pub pages_per_session: Option<f64>,
    pub avg_cost_per_conversion: Option<f64>,
    pub avg_cpc: Option<f64>,
    pub avg_cost_per_visit: Option<f64>,
    pub avg_cost_per_non_bounced_visit: Option<f64>,
}

impl GoalMetrics {
    /// Column backing the given KPI, if the KPI has one.
    pub fn column(&self, kpi: CampaignGoalKpi) -> Option<f64> {
        match kpi {
            CampaignGoalKpi::MaxBounceRate => self.bounce_rate,
            CampaignGoalKpi::NewUniqueVisitors => self.percent_new_users,
            CampaignGoalKpi::TimeOnSite => self.avg_time_on_site,
            CampaignGoalKpi::PagesPerSession => self.pages_per_session,
            CampaignGoalKpi::Cpa => self.avg_cost_per_conversion,
            CampaignGoalKpi::Cpc => self.avg_cpc,
            CampaignGoalKpi::Cpv => self.avg_cost_per_visit,
            CampaignGoalKpi::CpNonBouncedVisit => self.avg_cost_per_non_bounced_visit,
            CampaignGoalKpi::Cpm | CampaignGoalKpi::Roas => None,
        }
    }
}

/// Per-source optimizer input, read-only to the optimizer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceSpendRecord {
    pub old_budget: Decimal,
    pub yesterdays_spend: Decimal,
    #[serde(default)]
    pub metrics: GoalMetrics,
    /// Source is paused and only becomes active when autopilot is initialized.
    #[serde(default)]
    pub paused: bool,
}

impl SourceSpendRecord {
    pub fn new(old_budget: Decimal, yesterdays_spend: Decimal) -> Self {
        Self {
            old_budget,
            yesterdays_spend,
            ..Self::default()
        }
    }
}

/// Budget-change audit trail values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BudgetChangeComment {
    NoActiveSourcesWithSpend,
    UsedUpBudgetThenUniformlyRedistributed,
    NewBudgetNotEqualDailyBudget,
    InitializePilotPausedSource,
}

/// CPC-change audit trail values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CpcChangeComment {
    CpcNotSet,
    CurrentCpcTooLow,
    CurrentCpcTooHigh,
    BudgetNotSet,
    NoYesterdaySpending,
    OptimalSpend,
}

/// Recommended budget change for one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetRecommendation {
    pub old_budget: Decimal,
    pub new_budget: Decimal,
    pub budget_comments: Vec<BudgetChangeComment>,
}

/// Final per-source result of one reallocation run, in source-key order.
pub type AllocationResult = BTreeMap<Source, BudgetRecommendation>;
