//! Budget Autopilot — redistributes ad group daily budgets across media sources.
//!
//! Reads a batch of ad group jobs, runs each one on a blocking worker and
//! prints the per-source recommendations as JSON.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use autopilot_core::config::AutopilotConfig;
use autopilot_engine::{AdGroupJob, AutopilotRunner, StdRandom};
use chrono::Utc;
use clap::Parser;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "budget-autopilot")]
#[command(about = "Redistribute ad group daily budgets across media sources")]
#[command(version)]
struct Cli {
    /// JSON file with an array of ad group jobs
    #[arg(short, long)]
    input: PathBuf,

    /// Write reports to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Seed for reproducible runs (job N uses seed + N)
    #[arg(long)]
    seed: Option<u64>,

    /// Manage all RTB sources as one budget in every job
    #[arg(long, default_value_t = false)]
    rtb_as_one: bool,

    /// Cooldown window in hours (overrides config)
    #[arg(long, env = "BUDGET_AUTOPILOT__COOLDOWN_HOURS")]
    cooldown_hours: Option<i64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Reports go to stdout, logs to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "budget_autopilot=info,autopilot_engine=info".into()),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = AutopilotConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AutopilotConfig::default()
    });
    if let Some(hours) = cli.cooldown_hours {
        config.cooldown_hours = hours;
    }

    info!(
        max_budget_gain = %config.budget.max_budget_gain,
        max_budget_loss = %config.budget.max_budget_loss,
        min_spend_perc = config.budget.min_spend_perc,
        cooldown_hours = config.cooldown_hours,
        "Configuration loaded"
    );

    let raw = tokio::fs::read_to_string(&cli.input)
        .await
        .with_context(|| format!("reading {}", cli.input.display()))?;
    let mut jobs: Vec<AdGroupJob> =
        serde_json::from_str(&raw).context("parsing ad group jobs")?;

    // At most one run per ad group in a batch
    let mut seen = HashSet::new();
    jobs.retain(|job| {
        let first = seen.insert(job.ad_group.id);
        if !first {
            warn!(ad_group_id = %job.ad_group.id, "Duplicate ad group in batch, skipping");
        }
        first
    });
    if cli.rtb_as_one {
        for job in &mut jobs {
            job.rtb_as_one = true;
        }
    }

    let runner = Arc::new(AutopilotRunner::new(config)?);
    let now = Utc::now();

    let handles: Vec<_> = jobs
        .into_iter()
        .enumerate()
        .map(|(index, job)| {
            let runner = runner.clone();
            let seed = cli.seed.map(|s| s.wrapping_add(index as u64));
            tokio::task::spawn_blocking(move || {
                let mut rng = match seed {
                    Some(seed) => StdRandom::seeded(seed),
                    None => StdRandom::from_entropy(),
                };
                runner.run(&job, &mut rng, now)
            })
        })
        .collect();

    let mut reports = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await? {
            Ok(report) => reports.push(report),
            Err(e) => {
                error!(error = %e, "Budget autopilot run failed");
                return Err(e.into());
            }
        }
    }

    let encoded = serde_json::to_string_pretty(&reports)?;
    match &cli.output {
        Some(path) => tokio::fs::write(path, encoded)
            .await
            .with_context(|| format!("writing {}", path.display()))?,
        None => println!("{encoded}"),
    }

    info!(
        reports = reports.len(),
        changed = reports.iter().filter(|r| r.changed()).count(),
        "Budget autopilot finished"
    );
    Ok(())
}
