//! Compute provider surface.
//!
//! The orchestrator depends on exactly these provider operations:
//!
//! ```text
//!   submit(request)            -> ProvisionHandle
//!   request_status(handle)     -> RequestStatus   (pending | fulfilled | error | ...)
//!   active_instances(handle)   -> [instance id]   (lookup 1)
//!   instance_address(id)       -> Option<address> (lookup 2)
//!   cancel(handle, terminate)  -> CancelOutcome   (idempotent)
//! ```
//!
//! [`AwsSpotFleet`] implements them with the `aws` CLI.

pub mod aws;
pub mod request;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

pub use aws::AwsSpotFleet;
pub use request::ProvisionRequest;

/// Provider-assigned identifier of an in-flight request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProvisionHandle(String);

impl ProvisionHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProvisionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A resolved compute endpoint. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub instance_id: String,
    pub address: String,
}

/// Fulfillment status of a request, as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestStatus {
    /// Capacity not yet in place.
    Pending,
    /// Satisfied with at least one running instance.
    Fulfilled,
    /// The provider gave up on the request. Carries its diagnostic text.
    Error { detail: String },
    /// Cancelled or being torn down.
    Cancelled,
    /// Any other provider state, kept verbatim.
    Other(String),
}

impl RequestStatus {
    pub fn is_terminal_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Fulfilled => write!(f, "fulfilled"),
            Self::Error { .. } => write!(f, "error"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Other(s) => write!(f, "{}", s),
        }
    }
}

/// Result of a cancel call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The request was live and is now cancelled.
    Cancelled,
    /// The request was already cancelled, terminated or unknown.
    AlreadyGone,
}

/// A compute provider capable of spot capacity requests.
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Submit a request and return its handle.
    async fn submit(&self, request: &ProvisionRequest) -> Result<ProvisionHandle, ProviderError>;

    /// Current fulfillment status of a request.
    async fn request_status(&self, handle: &ProvisionHandle)
    -> Result<RequestStatus, ProviderError>;

    /// Instance ids currently running for a request. Empty means not yet.
    async fn active_instances(&self, handle: &ProvisionHandle)
    -> Result<Vec<String>, ProviderError>;

    /// Reachable address of an instance. `None` means not yet assigned.
    async fn instance_address(&self, instance_id: &str) -> Result<Option<String>, ProviderError>;

    /// Cancel a request, optionally terminating its instances.
    ///
    /// Must succeed with [`CancelOutcome::AlreadyGone`] for requests that
    /// are already cancelled or no longer known.
    async fn cancel(
        &self,
        handle: &ProvisionHandle,
        terminate_instances: bool,
    ) -> Result<CancelOutcome, ProviderError>;
}
