//! fleetscribe: spot-fleet provisioning orchestrator and the resumable
//! batch transcription job it dispatches.

pub mod batch;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod poll;
pub mod provision;
pub mod records;
pub mod remote;
pub mod settings;

pub use config::Config;
pub use error::{OrchestratorError, Result};
