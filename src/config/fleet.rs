use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::helpers::{optional_env, parse_optional_env, parse_pairs};
use crate::error::ConfigError;
use crate::settings::{Settings, base_dir};

/// Which deployment path to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeployMode {
    /// Pre-built image with dependencies baked in. Bounded waits.
    #[default]
    Prebaked,
    /// Stock image; dependencies installed over SSH. Unbounded waits.
    Bootstrap,
}

impl std::str::FromStr for DeployMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "prebaked" | "fast" | "ami" => Ok(Self::Prebaked),
            "bootstrap" | "slow" | "full" => Ok(Self::Bootstrap),
            _ => Err(format!(
                "invalid deploy mode '{}', expected one of: prebaked, bootstrap",
                s
            )),
        }
    }
}

impl std::fmt::Display for DeployMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Prebaked => write!(f, "prebaked"),
            Self::Bootstrap => write!(f, "bootstrap"),
        }
    }
}

/// Provisioning request and local-state configuration.
#[derive(Debug, Clone)]
pub struct FleetConfig {
    pub mode: DeployMode,
    /// JSON request template with `{{NAME}}` placeholders.
    pub request_template: PathBuf,
    pub placeholders: BTreeMap<String, String>,
    /// Provider region; `None` defers to the CLI's own configuration.
    pub region: Option<String>,
    /// Directory holding run records.
    pub state_dir: PathBuf,
    /// Optional wall-clock limit on reaching READY. Cancels the request when hit.
    pub deadline: Option<Duration>,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            mode: DeployMode::default(),
            request_template: PathBuf::from("config/spot-fleet-request.json"),
            placeholders: BTreeMap::new(),
            region: None,
            state_dir: base_dir().join("runs"),
            deadline: None,
        }
    }
}

impl FleetConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let fleet = &settings.fleet;

        let mode_raw = optional_env("FLEET_MODE")?.or_else(|| fleet.mode.clone());
        let mode = match mode_raw {
            Some(raw) => raw.parse().map_err(|e| ConfigError::InvalidValue {
                key: "FLEET_MODE".to_string(),
                message: e,
            })?,
            None => defaults.mode,
        };

        let mut placeholders = fleet.placeholders.clone();
        if let Some(raw) = optional_env("FLEET_PLACEHOLDERS")? {
            placeholders.extend(parse_pairs("FLEET_PLACEHOLDERS", &raw)?);
        }

        let deadline_secs = parse_optional_env("FLEET_DEADLINE_SECS", fleet.deadline_secs.unwrap_or(0))?;

        Ok(Self {
            mode,
            request_template: optional_env("FLEET_REQUEST_TEMPLATE")?
                .map(PathBuf::from)
                .or_else(|| fleet.request_template.clone())
                .unwrap_or(defaults.request_template),
            placeholders,
            region: optional_env("AWS_REGION")?.or_else(|| fleet.region.clone()),
            state_dir: optional_env("FLEET_STATE_DIR")?
                .map(PathBuf::from)
                .or_else(|| fleet.state_dir.clone())
                .unwrap_or(defaults.state_dir),
            deadline: (deadline_secs > 0).then(|| Duration::from_secs(deadline_secs)),
        })
    }
}
