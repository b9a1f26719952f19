use thiserror::Error;

use crate::types::CampaignGoalKpi;

pub type AutopilotResult<T> = Result<T, AutopilotError>;

#[derive(Error, Debug)]
pub enum AutopilotError {
    /// The predictor has no transform for this goal type. The goal enumeration and
    /// the predictor table have drifted apart; this is never recovered at runtime.
    #[error("Campaign goal type not implemented by budget autopilot: {0:?}")]
    UnsupportedGoalType(CampaignGoalKpi),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Input validation error: {0}")]
    Validation(String),
}
