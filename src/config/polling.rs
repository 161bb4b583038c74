use std::time::Duration;

use crate::config::DeployMode;
use crate::config::helpers::parse_optional_env;
use crate::error::ConfigError;
use crate::poll::RetryPolicy;
use crate::settings::Settings;

/// Retry policies for each waiting phase of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingConfig {
    /// Request status until fulfilled.
    pub fulfillment: RetryPolicy,
    /// Instance id and address lookups after fulfillment.
    pub lookup: RetryPolicy,
    /// Trivial remote command until SSH answers.
    pub reachability: RetryPolicy,
    /// Setup-complete sentinel until present.
    pub setup: RetryPolicy,
}

impl PollingConfig {
    /// Reference timings for a deploy mode.
    pub fn for_mode(mode: DeployMode) -> Self {
        match mode {
            DeployMode::Prebaked => Self {
                fulfillment: RetryPolicy::bounded(12, Duration::from_secs(30)),
                lookup: RetryPolicy::unbounded(Duration::from_secs(10)),
                reachability: RetryPolicy::unbounded(Duration::from_secs(10)),
                setup: RetryPolicy::bounded(12, Duration::from_secs(30)),
            },
            DeployMode::Bootstrap => Self {
                fulfillment: RetryPolicy::unbounded(Duration::from_secs(10)),
                lookup: RetryPolicy::unbounded(Duration::from_secs(10)),
                reachability: RetryPolicy::unbounded(Duration::from_secs(10)),
                setup: RetryPolicy::unbounded(Duration::from_secs(30)),
            },
        }
    }

    pub(crate) fn resolve(settings: &Settings, mode: DeployMode) -> Result<Self, ConfigError> {
        let defaults = Self::for_mode(mode);
        let polling = &settings.polling;

        let fulfill_interval = parse_optional_env(
            "FLEET_FULFILL_INTERVAL_SECS",
            polling
                .fulfill_interval_secs
                .unwrap_or(defaults.fulfillment.interval.as_secs()),
        )?;
        let fulfill_attempts = parse_optional_env(
            "FLEET_FULFILL_MAX_ATTEMPTS",
            polling
                .fulfill_max_attempts
                .unwrap_or(defaults.fulfillment.max_attempts.unwrap_or(0)),
        )?;
        let ssh_interval = parse_optional_env(
            "FLEET_SSH_INTERVAL_SECS",
            polling
                .ssh_interval_secs
                .unwrap_or(defaults.reachability.interval.as_secs()),
        )?;
        let setup_interval = parse_optional_env(
            "FLEET_SETUP_INTERVAL_SECS",
            polling
                .setup_interval_secs
                .unwrap_or(defaults.setup.interval.as_secs()),
        )?;
        let setup_attempts = parse_optional_env(
            "FLEET_SETUP_MAX_ATTEMPTS",
            polling
                .setup_max_attempts
                .unwrap_or(defaults.setup.max_attempts.unwrap_or(0)),
        )?;

        let fulfill_interval = interval("FLEET_FULFILL_INTERVAL_SECS", fulfill_interval)?;
        let ssh_interval = interval("FLEET_SSH_INTERVAL_SECS", ssh_interval)?;
        let setup_interval = interval("FLEET_SETUP_INTERVAL_SECS", setup_interval)?;

        Ok(Self {
            fulfillment: RetryPolicy::from_parts(fulfill_attempts, fulfill_interval),
            lookup: RetryPolicy::unbounded(ssh_interval),
            reachability: RetryPolicy::unbounded(ssh_interval),
            setup: RetryPolicy::from_parts(setup_attempts, setup_interval),
        })
    }
}

/// A zero interval would poll the provider in a tight loop.
fn interval(key: &str, secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "interval must be at least 1 second".to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}
