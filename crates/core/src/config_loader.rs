use std::path::Path;

use crate::config::AppConfig;
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};

/// Environment prefix for configuration overrides, e.g. `BREAKOUT_ORDERS__MODE=live`.
pub const ENV_PREFIX: &str = "BREAKOUT_";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration from `path`, layered over built-in defaults and
    /// under `BREAKOUT_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or the result fails validation.
    pub fn load(path: impl AsRef<Path>) -> Result<AppConfig> {
        Self::extract(Self::figment(path.as_ref(), None))
    }

    /// Like [`ConfigLoader::load`], with `Config.<profile>.toml` from the same
    /// directory merged on top of the base file.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be read or parsed.
    pub fn load_with_profile(path: impl AsRef<Path>, profile: &str) -> Result<AppConfig> {
        Self::extract(Self::figment(path.as_ref(), Some(profile)))
    }

    fn figment(path: &Path, profile: Option<&str>) -> Figment {
        // Section defaults come from `#[serde(default)]` on the config types.
        let mut figment = Figment::new().merge(Toml::file(path));

        if let Some(profile) = profile {
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            figment = figment.merge(Toml::file(dir.join(format!("Config.{profile}.toml"))));
        }

        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    fn extract(figment: Figment) -> Result<AppConfig> {
        let mut config: AppConfig = figment
            .extract()
            .context("Failed to parse configuration")?;

        // Deployment conventions shared with the rest of the OpenAlgo tooling.
        if let Ok(key) = std::env::var("OPENALGO_APIKEY") {
            config.api.key = key;
        }
        if let Ok(url) = std::env::var("WEBSOCKET_URL") {
            config.feed.url = url;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}
