//! Runs the autopilot for one ad group job at a time.

use std::collections::{BTreeMap, BTreeSet};

use autopilot_core::config::AutopilotConfig;
use autopilot_core::types::{
    AdGroup, BudgetChangeComment, BudgetLimits, CampaignGoal, Source, SourceSpendRecord,
};
use autopilot_core::{AutopilotError, AutopilotResult};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::budgets::get_autopilot_daily_budget_recommendations;
use crate::campaign_stop::{evaluate_landing_mode, LandingDecision};
use crate::cooldown::CooldownTracker;
use crate::cpc::{get_autopilot_cpc_recommendation, CpcRecommendation};
use crate::loader::{with_rtb_aggregate, SourceData};
use crate::random::RandomSource;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceInput {
    pub source: Source,
    #[serde(flatten)]
    pub record: SourceSpendRecord,
    #[serde(default)]
    pub cpc: Decimal,
}

/// Everything the persistence layer hands over for one ad group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdGroupJob {
    pub ad_group: AdGroup,
    pub daily_budget: Decimal,
    pub sources: Vec<SourceInput>,
    #[serde(default)]
    pub campaign_goal: Option<CampaignGoal>,
    #[serde(default)]
    pub rtb_as_one: bool,
    /// Autopilot is being switched on; paused sources are started at their minimum.
    #[serde(default)]
    pub initialization: bool,
    /// Campaign budget still available, enables the landing-mode check.
    #[serde(default)]
    pub remaining_campaign_budget: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source: String,
    pub old_budget: Decimal,
    pub new_budget: Decimal,
    pub budget_comments: Vec<BudgetChangeComment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpc: Option<CpcRecommendation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdGroupReport {
    pub ad_group_id: Uuid,
    pub skipped: bool,
    pub sources: Vec<SourceReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub landing: Option<LandingDecision>,
    pub generated_at: DateTime<Utc>,
}

impl AdGroupReport {
    pub fn changed(&self) -> bool {
        self.sources.iter().any(|s| s.old_budget != s.new_budget)
    }
}

pub struct AutopilotRunner {
    config: AutopilotConfig,
    cooldown: CooldownTracker,
}

impl AutopilotRunner {
    pub fn new(config: AutopilotConfig) -> AutopilotResult<Self> {
        config.validate()?;
        let cooldown = CooldownTracker::new(config.cooldown_hours);
        Ok(Self { config, cooldown })
    }

    pub fn config(&self) -> &AutopilotConfig {
        &self.config
    }

    pub fn cooldown(&self) -> &CooldownTracker {
        &self.cooldown
    }

    pub fn run<R: RandomSource + ?Sized>(
        &self,
        job: &AdGroupJob,
        rng: &mut R,
        now: DateTime<Utc>,
    ) -> AutopilotResult<AdGroupReport> {
        let ad_group_id = job.ad_group.id;
        if self.cooldown.is_cooling_down(&ad_group_id, now) {
            info!(%ad_group_id, "Ad group budgets changed recently, skipping autopilot run");
            return Ok(AdGroupReport {
                ad_group_id,
                skipped: true,
                sources: Vec::new(),
                landing: None,
                generated_at: now,
            });
        }

        validate_job(job)?;
        let (data, initialized) = self.prepare_data(job);
        let data = with_rtb_aggregate(data, job.rtb_as_one);

        let allocation = get_autopilot_daily_budget_recommendations(
            &job.ad_group,
            job.daily_budget,
            &data,
            job.campaign_goal.as_ref(),
            job.rtb_as_one,
            &self.config,
            rng,
        )?;

        let cpcs: BTreeMap<&str, Decimal> = job
            .sources
            .iter()
            .map(|s| (s.source.key(), s.cpc))
            .collect();

        let sources: Vec<SourceReport> = allocation
            .iter()
            .map(|(source, rec)| {
                let mut budget_comments = rec.budget_comments.clone();
                if initialized.contains(source) {
                    budget_comments.push(BudgetChangeComment::InitializePilotPausedSource);
                }
                let cpc = cpcs.get(source.key()).map(|cpc| {
                    get_autopilot_cpc_recommendation(
                        *cpc,
                        rec.old_budget,
                        data[source].yesterdays_spend,
                        &self.config.cpc,
                    )
                });
                SourceReport {
                    source: source.key().to_string(),
                    old_budget: rec.old_budget,
                    new_budget: rec.new_budget,
                    budget_comments,
                    cpc,
                }
            })
            .collect();

        let landing = job.remaining_campaign_budget.map(|remaining| {
            let daily_budgets: BTreeMap<Source, Decimal> = allocation
                .iter()
                .map(|(s, rec)| (s.clone(), rec.new_budget))
                .collect();
            evaluate_landing_mode(remaining, &daily_budgets, &self.config.campaign_stop)
        });

        let report = AdGroupReport {
            ad_group_id,
            skipped: false,
            sources,
            landing,
            generated_at: now,
        };

        if report.changed() {
            self.cooldown.record_change(ad_group_id, now);
        }
        info!(
            %ad_group_id,
            changed = report.changed(),
            sources = report.sources.len(),
            "Budget autopilot run finished"
        );
        Ok(report)
    }

    /// Build optimizer input from the job. Paused sources only take part in
    /// initialization runs, starting from their minimum daily budget.
    fn prepare_data(&self, job: &AdGroupJob) -> (SourceData, BTreeSet<Source>) {
        let mut data = SourceData::new();
        let mut initialized = BTreeSet::new();

        for input in &job.sources {
            let mut record = input.record.clone();
            if record.paused {
                if !job.initialization {
                    continue;
                }
                record.old_budget = input.source.min_daily_budget(&self.config.budget);
                record.paused = false;
                initialized.insert(input.source.clone());
            }
            data.insert(input.source.clone(), record);
        }

        (data, initialized)
    }
}

fn validate_job(job: &AdGroupJob) -> AutopilotResult<()> {
    if job.daily_budget < Decimal::ZERO {
        return Err(AutopilotError::Validation(format!(
            "ad group {} has a negative daily budget",
            job.ad_group.id
        )));
    }

    let mut seen = BTreeSet::new();
    for input in &job.sources {
        if !seen.insert(input.source.key()) {
            return Err(AutopilotError::Validation(format!(
                "ad group {} lists source {} twice",
                job.ad_group.id,
                input.source.key()
            )));
        }
        if input.record.old_budget < Decimal::ZERO
            || input.record.yesterdays_spend < Decimal::ZERO
        {
            return Err(AutopilotError::Validation(format!(
                "source {} has negative budget or spend",
                input.source.key()
            )));
        }
    }
    Ok(())
}
