//! Fleet provisioning orchestrator.
//!
//! Drives a spot capacity request through to a running remote job and
//! tears it down on request:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    FleetOrchestrator                         │
//! │                                                              │
//! │  deploy(request)                                             │
//! │    SUBMITTED ──► FULFILLING ──► FULFILLED ──► SSH_WAIT        │
//! │        │             │  poll status          │ poll ssh      │
//! │   record handle      │  error => FAILED      │               │
//! │                      ▼                       ▼               │
//! │            AwaitingFulfillment        BOOTSTRAPPING          │
//! │              (exhausted)               │ poll sentinel       │
//! │                                        ▼                     │
//! │                                      READY ──► WORK_DISPATCHED│
//! │                                                              │
//! │  cleanup(handle | latest)  ──► TERMINATED  (idempotent)      │
//! │  status()                  ──► latest run + request status   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The provider and the remote channel are trait objects, so the whole
//! state machine runs against scripted fakes in tests.

pub mod fleet;
pub mod phase;

pub use fleet::{
    CleanupReport, DeployOutcome, FleetOrchestrator, FleetStatus, OrchestratorConfig,
};
pub use phase::DeployPhase;
