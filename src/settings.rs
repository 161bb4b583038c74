//! File-backed settings.
//!
//! A TOML file (`~/.fleetscribe/config.toml` by default) supplies values
//! that sit between env vars and built-in defaults. Every field is optional;
//! a missing field falls through to the default.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub fleet: FleetSettings,
    pub remote: RemoteSettings,
    pub polling: PollingSettings,
    pub batch: BatchSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FleetSettings {
    pub mode: Option<String>,
    pub request_template: Option<PathBuf>,
    pub region: Option<String>,
    pub state_dir: Option<PathBuf>,
    pub deadline_secs: Option<u64>,
    /// Values for `{{NAME}}` placeholders in the request template.
    pub placeholders: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RemoteSettings {
    pub user: Option<String>,
    pub key_path: Option<PathBuf>,
    pub connect_timeout_secs: Option<u64>,
    pub bootstrap_script: Option<PathBuf>,
    pub payload_files: Option<Vec<PathBuf>>,
    pub remote_dir: Option<String>,
    pub remote_command: Option<String>,
    pub log_file: Option<String>,
    pub setup_sentinel: Option<String>,
    pub image_sentinel: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PollingSettings {
    pub fulfill_interval_secs: Option<u64>,
    /// `0` means unbounded.
    pub fulfill_max_attempts: Option<u32>,
    pub ssh_interval_secs: Option<u64>,
    pub setup_interval_secs: Option<u64>,
    /// `0` means unbounded.
    pub setup_max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    /// `s3://bucket[/prefix]`; replaces the directory-backed stores.
    pub bucket_url: Option<String>,
    pub docs_prefix: Option<String>,
    pub store_root: Option<PathBuf>,
    pub audio_prefix: Option<String>,
    pub metadata_prefix: Option<String>,
    pub audio_extension: Option<String>,
    pub docs_root: Option<PathBuf>,
    pub temp_dir: Option<PathBuf>,
    pub whisper_bin: Option<String>,
    pub whisper_model: Option<String>,
    pub shutdown: Option<bool>,
    pub shutdown_delay_secs: Option<u64>,
}

impl Settings {
    /// Default location of the TOML settings file.
    pub fn default_toml_path() -> PathBuf {
        base_dir().join("config.toml")
    }

    /// Load settings from a TOML file. `Ok(None)` if the file does not exist.
    pub fn load_toml(path: &Path) -> Result<Option<Self>, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ConfigError::ParseError(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )));
            }
        };
        toml::from_str(&raw)
            .map(Some)
            .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))
    }
}

/// `~/.fleetscribe`, falling back to the working directory.
pub fn base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".fleetscribe")
}
