pub mod config;
pub mod error;
pub mod types;

pub use config::AutopilotConfig;
pub use error::{AutopilotError, AutopilotResult};
