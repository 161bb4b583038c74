//! Error types for fleetscribe.

use std::path::PathBuf;

/// Configuration errors. Always fatal: orchestration must not begin.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Required file not found: {}", path.display())]
    MissingFile { path: PathBuf },

    #[error("Unresolved placeholders in {}: {}", source_name, names.join(", "))]
    UnresolvedPlaceholders {
        source_name: String,
        names: Vec<String>,
    },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),
}

/// Errors from the compute provider surface.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider command '{operation}' failed: {reason}")]
    CommandFailed { operation: String, reason: String },

    #[error("Provider returned an unexpected response to '{operation}': {reason}")]
    InvalidResponse { operation: String, reason: String },

    #[error("Provider rejected the request: {reason}")]
    Rejected { reason: String },
}

/// Errors from the remote execution channel.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("Failed to spawn '{program}': {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("Remote command on {host} exited with {code:?}: {stderr}")]
    CommandFailed {
        host: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Copy of {} to {host}:{remote_path} failed: {reason}", local.display())]
    CopyFailed {
        host: String,
        local: PathBuf,
        remote_path: String,
        reason: String,
    },
}

/// Errors reading or writing local run records.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("Run record {} already exists", path.display())]
    AlreadyExists { path: PathBuf },

    #[error("Run record {} is empty", path.display())]
    Empty { path: PathBuf },

    #[error("Record IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Orchestration errors. Each one ends the current deployment run.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(
        "Request {handle} was submitted but could not be recorded: {source}. \
         Cancel it with: fleetscribe cleanup --handle {handle}"
    )]
    HandleNotRecorded {
        handle: String,
        #[source]
        source: RecordError,
    },

    #[error("Request submission failed: {0}")]
    Submission(#[source] ProviderError),

    #[error("Provisioning of {handle} failed: {detail}")]
    ProvisioningFailed { handle: String, detail: String },

    #[error("Remote channel unavailable: {0}")]
    RemoteUnavailable(#[source] RemoteError),

    #[error("Bootstrap on {address} failed: {reason}")]
    BootstrapFailed { address: String, reason: String },

    #[error("Dispatch to {address} failed: {source}")]
    DispatchFailed {
        address: String,
        #[source]
        source: RemoteError,
    },

    #[error("Deadline of {secs}s exceeded while {phase}; request {handle} was cancelled")]
    DeadlineExceeded {
        handle: String,
        phase: String,
        secs: u64,
    },

    #[error("No recorded request found in {}", dir.display())]
    NoRecordedHandle { dir: PathBuf },

    #[error("Cleanup of {handle} failed: {source}")]
    CleanupFailed {
        handle: String,
        #[source]
        source: ProviderError,
    },
}

/// Errors from the batch transcription job.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("Object store error on '{key}': {reason}")]
    Storage { key: String, reason: String },

    #[error("Document store error: {reason}")]
    Document { reason: String },

    #[error("Transcription of {} failed: {reason}", path.display())]
    Transcription { path: PathBuf, reason: String },

    #[error("Metadata for '{key}' is malformed: {reason}")]
    Metadata { key: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = OrchestratorError> = std::result::Result<T, E>;
