use std::path::PathBuf;
use std::time::Duration;

use crate::config::helpers::{optional_env, parse_bool_env, parse_optional_env, parse_string_env};
use crate::error::ConfigError;
use crate::settings::Settings;

/// An S3 bucket, optionally narrowed to a key prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketLocation {
    pub bucket: String,
    /// Prepended to every object key. Empty, or ends with `/`.
    pub root: String,
}

impl BucketLocation {
    /// Parse `s3://bucket` or `s3://bucket/some/prefix`.
    pub fn parse(key: &str, raw: &str) -> Result<Self, ConfigError> {
        let invalid = |message: &str| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{} (got '{}')", message, raw),
        };
        let rest = raw
            .trim()
            .strip_prefix("s3://")
            .ok_or_else(|| invalid("expected s3://bucket[/prefix]"))?;
        let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(invalid("bucket name is empty"));
        }
        let prefix = prefix.trim_matches('/');
        Ok(Self {
            bucket: bucket.to_string(),
            root: if prefix.is_empty() {
                String::new()
            } else {
                format!("{}/", prefix)
            },
        })
    }
}

impl std::fmt::Display for BucketLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.root)
    }
}

/// Configuration for the batch transcription job that runs on the instance.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Bucket holding audio, metadata and documents. When set it replaces
    /// both directory-backed stores.
    pub bucket: Option<BucketLocation>,
    /// Key prefix of the transcript documents inside the bucket.
    pub docs_prefix: String,
    /// Root of the directory-backed object store.
    pub store_root: PathBuf,
    /// Key prefix of the input audio objects.
    pub audio_prefix: String,
    /// Key prefix of the per-item metadata records.
    pub metadata_prefix: String,
    /// Audio file extension to pick up, without the dot.
    pub audio_extension: String,
    /// Root of the directory-backed document store.
    pub docs_root: PathBuf,
    /// Scratch space for downloaded audio.
    pub temp_dir: PathBuf,
    pub whisper_bin: String,
    pub whisper_model: String,
    /// Power the instance off after a run that completed at least one item.
    pub shutdown: bool,
    /// Grace period before powering off.
    pub shutdown_delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            bucket: None,
            docs_prefix: "transcripts/".to_string(),
            store_root: PathBuf::from("./store"),
            audio_prefix: "audio_files/".to_string(),
            metadata_prefix: "metadata/".to_string(),
            audio_extension: "m4a".to_string(),
            docs_root: PathBuf::from("./transcripts"),
            temp_dir: PathBuf::from("./temp_audio"),
            whisper_bin: "whisper".to_string(),
            whisper_model: "medium".to_string(),
            shutdown: false,
            shutdown_delay: Duration::from_secs(60),
        }
    }
}

impl BatchConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let batch = &settings.batch;

        let extension = parse_string_env(
            "BATCH_AUDIO_EXTENSION",
            batch.audio_extension.clone().unwrap_or(defaults.audio_extension),
        )?;

        let bucket = match optional_env("BATCH_BUCKET_URL")?.or_else(|| batch.bucket_url.clone()) {
            Some(raw) => Some(BucketLocation::parse("BATCH_BUCKET_URL", &raw)?),
            None => None,
        };

        Ok(Self {
            bucket,
            docs_prefix: parse_string_env(
                "BATCH_DOCS_PREFIX",
                batch.docs_prefix.clone().unwrap_or(defaults.docs_prefix),
            )?,
            store_root: optional_env("BATCH_STORE_ROOT")?
                .map(PathBuf::from)
                .or_else(|| batch.store_root.clone())
                .unwrap_or(defaults.store_root),
            audio_prefix: parse_string_env(
                "BATCH_AUDIO_PREFIX",
                batch.audio_prefix.clone().unwrap_or(defaults.audio_prefix),
            )?,
            metadata_prefix: parse_string_env(
                "BATCH_METADATA_PREFIX",
                batch.metadata_prefix.clone().unwrap_or(defaults.metadata_prefix),
            )?,
            audio_extension: extension.trim_start_matches('.').to_string(),
            docs_root: optional_env("BATCH_DOCS_ROOT")?
                .map(PathBuf::from)
                .or_else(|| batch.docs_root.clone())
                .unwrap_or(defaults.docs_root),
            temp_dir: optional_env("BATCH_TEMP_DIR")?
                .map(PathBuf::from)
                .or_else(|| batch.temp_dir.clone())
                .unwrap_or(defaults.temp_dir),
            whisper_bin: parse_string_env(
                "BATCH_WHISPER_BIN",
                batch.whisper_bin.clone().unwrap_or(defaults.whisper_bin),
            )?,
            whisper_model: parse_string_env(
                "BATCH_WHISPER_MODEL",
                batch.whisper_model.clone().unwrap_or(defaults.whisper_model),
            )?,
            shutdown: parse_bool_env("BATCH_SHUTDOWN", batch.shutdown.unwrap_or(defaults.shutdown))?,
            shutdown_delay: Duration::from_secs(parse_optional_env(
                "BATCH_SHUTDOWN_DELAY_SECS",
                batch
                    .shutdown_delay_secs
                    .unwrap_or(defaults.shutdown_delay.as_secs()),
            )?),
        })
    }
}
