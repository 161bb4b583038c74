//! Configuration for fleetscribe.
//!
//! Settings are loaded with priority: env var > TOML file > default.
//! `./.env` is loaded via dotenvy early in startup and never overwrites
//! variables that are already set. Nothing about buckets, folders or
//! instance placement is baked into the orchestration logic: it all
//! arrives through [`Config`].

mod batch;
mod fleet;
pub(crate) mod helpers;
mod polling;
mod remote;

use std::path::Path;

use crate::error::ConfigError;
use crate::settings::Settings;

pub use self::batch::{BatchConfig, BucketLocation};
pub use self::fleet::{DeployMode, FleetConfig};
pub use self::polling::PollingConfig;
pub use self::remote::RemoteConfig;

/// Main configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub fleet: FleetConfig,
    pub remote: RemoteConfig,
    pub polling: PollingConfig,
    pub batch: BatchConfig,
}

impl Config {
    /// Load configuration from env vars and the default TOML file, if any.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with_toml(None)
    }

    /// Load from env with an optional TOML config file overlay.
    pub fn from_env_with_toml(toml_path: Option<&Path>) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let settings = Self::load_settings(toml_path)?;
        Self::build(&settings)
    }

    /// Like [`Config::from_env_with_toml`], with a deploy mode that beats
    /// both env and file. Polling defaults follow the chosen mode.
    pub fn from_env_with_mode(
        toml_path: Option<&Path>,
        mode: Option<DeployMode>,
    ) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let settings = Self::load_settings(toml_path)?;
        let mut config = Self::build(&settings)?;
        if let Some(mode) = mode
            && mode != config.fleet.mode
        {
            config.fleet.mode = mode;
            config.polling = PollingConfig::resolve(&settings, mode)?;
        }
        Ok(config)
    }

    /// Load the TOML settings file.
    ///
    /// If `explicit_path` is `Some`, a missing or broken file is fatal.
    /// Otherwise the default path is tried and a missing file is ignored.
    fn load_settings(explicit_path: Option<&Path>) -> Result<Settings, ConfigError> {
        let path = explicit_path
            .map(Path::to_path_buf)
            .unwrap_or_else(Settings::default_toml_path);

        match Settings::load_toml(&path) {
            Ok(Some(settings)) => {
                tracing::debug!("Loaded TOML config from {}", path.display());
                Ok(settings)
            }
            Ok(None) => {
                if explicit_path.is_some() {
                    return Err(ConfigError::MissingFile { path });
                }
                Ok(Settings::default())
            }
            Err(e) => {
                if explicit_path.is_some() {
                    return Err(e);
                }
                tracing::warn!("Ignoring unreadable default config file: {}", e);
                Ok(Settings::default())
            }
        }
    }

    pub(crate) fn build(settings: &Settings) -> Result<Self, ConfigError> {
        let fleet = FleetConfig::resolve(settings)?;
        let polling = PollingConfig::resolve(settings, fleet.mode)?;
        Ok(Self {
            remote: RemoteConfig::resolve(settings)?,
            batch: BatchConfig::resolve(settings)?,
            polling,
            fleet,
        })
    }
}
