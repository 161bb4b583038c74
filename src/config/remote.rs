use std::path::PathBuf;
use std::time::Duration;

use crate::config::helpers::{optional_env, parse_optional_env, parse_string_env, split_list};
use crate::error::ConfigError;
use crate::settings::Settings;

/// Remote access and work-payload configuration.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Login user on the instance.
    pub user: String,
    /// Private key for ssh/scp. Required for anything that touches the instance.
    pub key_path: Option<PathBuf>,
    /// Per-attempt connect timeout for reachability checks.
    pub connect_timeout: Duration,
    /// Dependency-install script run over SSH in bootstrap mode.
    pub bootstrap_script: Option<PathBuf>,
    /// Local files copied into `remote_dir` before the job starts
    /// (job binary or script, credentials file).
    pub payload_files: Vec<PathBuf>,
    /// Working directory on the instance, relative to the login home.
    pub remote_dir: String,
    /// Command started detached inside `remote_dir`.
    pub remote_command: String,
    /// Log file for the detached job, relative to `remote_dir`.
    pub log_file: String,
    /// Written by the bootstrap payload when setup is finished.
    pub setup_sentinel: String,
    /// Written by the pre-built image's boot script after verifying itself.
    pub image_sentinel: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            user: "ubuntu".to_string(),
            key_path: None,
            connect_timeout: Duration::from_secs(5),
            bootstrap_script: None,
            payload_files: Vec::new(),
            remote_dir: "transcription".to_string(),
            remote_command: "BATCH_SHUTDOWN=true ./fleetscribe transcribe".to_string(),
            log_file: "transcription.log".to_string(),
            setup_sentinel: "/tmp/setup_complete".to_string(),
            image_sentinel: "/tmp/ami_verified".to_string(),
        }
    }
}

impl RemoteConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let remote = &settings.remote;

        let payload_files = match optional_env("FLEET_PAYLOAD_FILES")? {
            Some(raw) => split_list(&raw).into_iter().map(PathBuf::from).collect(),
            None => remote.payload_files.clone().unwrap_or(defaults.payload_files),
        };

        Ok(Self {
            user: parse_string_env(
                "FLEET_SSH_USER",
                remote.user.clone().unwrap_or(defaults.user),
            )?,
            key_path: optional_env("FLEET_SSH_KEY")?
                .map(PathBuf::from)
                .or_else(|| remote.key_path.clone()),
            connect_timeout: Duration::from_secs(parse_optional_env(
                "FLEET_SSH_CONNECT_TIMEOUT_SECS",
                remote
                    .connect_timeout_secs
                    .unwrap_or(defaults.connect_timeout.as_secs()),
            )?),
            bootstrap_script: optional_env("FLEET_BOOTSTRAP_SCRIPT")?
                .map(PathBuf::from)
                .or_else(|| remote.bootstrap_script.clone()),
            payload_files,
            remote_dir: parse_string_env(
                "FLEET_REMOTE_DIR",
                remote.remote_dir.clone().unwrap_or(defaults.remote_dir),
            )?,
            remote_command: parse_string_env(
                "FLEET_REMOTE_COMMAND",
                remote.remote_command.clone().unwrap_or(defaults.remote_command),
            )?,
            log_file: parse_string_env(
                "FLEET_REMOTE_LOG",
                remote.log_file.clone().unwrap_or(defaults.log_file),
            )?,
            setup_sentinel: parse_string_env(
                "FLEET_SENTINEL_SETUP",
                remote.setup_sentinel.clone().unwrap_or(defaults.setup_sentinel),
            )?,
            image_sentinel: parse_string_env(
                "FLEET_SENTINEL_IMAGE",
                remote.image_sentinel.clone().unwrap_or(defaults.image_sentinel),
            )?,
        })
    }

    /// The SSH key, or a configuration error naming the variable to set.
    pub fn require_key_path(&self) -> Result<&PathBuf, ConfigError> {
        let path = self
            .key_path
            .as_ref()
            .ok_or_else(|| ConfigError::MissingRequired {
                key: "FLEET_SSH_KEY".to_string(),
                hint: "Set FLEET_SSH_KEY to the private key matching the fleet's key pair"
                    .to_string(),
            })?;
        if !path.exists() {
            return Err(ConfigError::MissingFile { path: path.clone() });
        }
        Ok(path)
    }

    /// Check that a payload is configured and that every local file the
    /// run will read exists.
    pub fn check_local_files(&self) -> Result<(), ConfigError> {
        if self.payload_files.is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "FLEET_PAYLOAD_FILES".to_string(),
                hint: format!(
                    "Set FLEET_PAYLOAD_FILES to the files '{}' needs on the instance \
                     (job binary or script, credentials)",
                    self.remote_command
                ),
            });
        }
        for path in self.payload_files.iter().chain(self.bootstrap_script.iter()) {
            if !path.is_file() {
                return Err(ConfigError::MissingFile { path: path.clone() });
            }
        }
        Ok(())
    }
}
