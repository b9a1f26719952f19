//! Budget autopilot engine: redistributes an ad group's daily budget across its
//! media sources with a Thompson-sampling bandit, plus the neighbouring CPC
//! autopilot, landing-mode check and run bookkeeping.

pub mod bandit;
pub mod budgets;
pub mod campaign_stop;
pub mod constraints;
pub mod cooldown;
pub mod cpc;
pub mod loader;
pub mod predictor;
pub mod random;
pub mod runner;

pub use bandit::BetaBandit;
pub use budgets::get_autopilot_daily_budget_recommendations;
pub use cpc::calculate_new_autopilot_cpc;
pub use random::{RandomSource, SequenceRandom, StdRandom};
pub use runner::{AdGroupJob, AdGroupReport, AutopilotRunner};
