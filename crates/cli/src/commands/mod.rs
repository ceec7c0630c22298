//! Subcommands of the `breakout` binary.

pub mod plan;
pub mod recover;
pub mod run;

pub use plan::{run_plan, PlanArgs};
pub use recover::{run_recover, RecoverArgs};
pub use run::{run_session, RunArgs};

use anyhow::{Context, Result};
use breakout_core::{AppConfig, ConfigLoader};

/// Loads the base file plus an optional `Config.<profile>.toml` next to it.
pub(crate) fn load_config(path: &str, profile: Option<&str>) -> Result<AppConfig> {
    match profile {
        Some(profile) => ConfigLoader::load_with_profile(path, profile),
        None => ConfigLoader::load(path),
    }
    .with_context(|| format!("Failed to load configuration from {path}"))
}
