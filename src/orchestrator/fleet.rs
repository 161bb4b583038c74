//! Deployment state machine.

use std::convert::Infallible;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::{Config, DeployMode, PollingConfig, RemoteConfig};
use crate::error::{OrchestratorError, ProviderError, RemoteError};
use crate::orchestrator::DeployPhase;
use crate::poll::{PollResult, Probe, RetryPolicy, poll_until};
use crate::provision::{
    CancelOutcome, ComputeProvider, InstanceRecord, ProvisionHandle, ProvisionRequest,
    RequestStatus,
};
use crate::records::{RunRecord, RunRecords, RunStamp};
use crate::remote::{RemoteChannel, shell_quote};

/// Everything the orchestrator needs from configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub mode: DeployMode,
    pub polling: PollingConfig,
    /// Wall-clock limit from submission to READY. `None` waits as long as
    /// the polling policies allow.
    pub deadline: Option<Duration>,
    pub remote: RemoteConfig,
}

impl OrchestratorConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            mode: config.fleet.mode,
            polling: config.polling,
            deadline: config.fleet.deadline,
            remote: config.remote.clone(),
        }
    }
}

/// How a deploy run ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployOutcome {
    /// The remote job was started.
    Dispatched {
        handle: ProvisionHandle,
        instance: InstanceRecord,
    },
    /// Fulfillment polling ran out of attempts. The request may still be
    /// fulfilled later and should be inspected by hand.
    AwaitingFulfillment {
        handle: ProvisionHandle,
        attempts: u32,
    },
    /// The setup sentinel never appeared within the attempt budget.
    AwaitingSetup {
        handle: ProvisionHandle,
        instance: InstanceRecord,
        attempts: u32,
    },
}

impl DeployOutcome {
    pub fn handle(&self) -> &ProvisionHandle {
        match self {
            Self::Dispatched { handle, .. }
            | Self::AwaitingFulfillment { handle, .. }
            | Self::AwaitingSetup { handle, .. } => handle,
        }
    }

    pub fn instance(&self) -> Option<&InstanceRecord> {
        match self {
            Self::Dispatched { instance, .. } | Self::AwaitingSetup { instance, .. } => {
                Some(instance)
            }
            Self::AwaitingFulfillment { .. } => None,
        }
    }
}

/// Result of a cleanup call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub handle: ProvisionHandle,
    pub outcome: CancelOutcome,
}

/// Snapshot for the `status` command.
#[derive(Debug, Clone)]
pub struct FleetStatus {
    pub run: RunRecord,
    /// `Err` carries the lookup failure text; the records are still useful.
    pub request: Result<RequestStatus, String>,
}

/// Drives one spot request from submission to dispatched work.
///
/// Phases only move forward. The handle is written to the run records
/// before any polling so that `cleanup` from another process can always
/// find it.
pub struct FleetOrchestrator {
    config: OrchestratorConfig,
    provider: Arc<dyn ComputeProvider>,
    remote: Arc<dyn RemoteChannel>,
    records: RunRecords,
    phase: DeployPhase,
    history: Vec<DeployPhase>,
    handle: Option<ProvisionHandle>,
    instance: Option<InstanceRecord>,
}

impl FleetOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        provider: Arc<dyn ComputeProvider>,
        remote: Arc<dyn RemoteChannel>,
        records: RunRecords,
    ) -> Self {
        Self {
            config,
            provider,
            remote,
            records,
            phase: DeployPhase::Idle,
            history: Vec::new(),
            handle: None,
            instance: None,
        }
    }

    pub fn phase(&self) -> DeployPhase {
        self.phase
    }

    /// Every phase entered so far, in order.
    pub fn history(&self) -> &[DeployPhase] {
        &self.history
    }

    pub fn handle(&self) -> Option<&ProvisionHandle> {
        self.handle.as_ref()
    }

    pub fn instance(&self) -> Option<&InstanceRecord> {
        self.instance.as_ref()
    }

    pub fn records(&self) -> &RunRecords {
        &self.records
    }

    fn enter(&mut self, next: DeployPhase) {
        if !self.phase.can_advance_to(next) {
            tracing::warn!(from = %self.phase, to = %next, "Ignoring out-of-order phase change");
            return;
        }
        tracing::debug!(from = %self.phase, to = %next, "Phase change");
        self.phase = next;
        self.history.push(next);
    }

    fn fail(&mut self, error: OrchestratorError) -> OrchestratorError {
        tracing::error!(phase = %self.phase, error = %error, "Deployment failed");
        self.enter(DeployPhase::Failed);
        error
    }

    /// Submit `request` and drive it to dispatched work.
    pub async fn deploy(
        &mut self,
        request: &ProvisionRequest,
    ) -> Result<DeployOutcome, OrchestratorError> {
        let deadline = self.config.deadline.map(|d| Instant::now() + d);
        let polling = self.config.polling;

        // A request is never submitted for a run that could not dispatch.
        if let Err(e) = self.config.remote.check_local_files() {
            return Err(self.fail(e.into()));
        }

        tracing::info!(
            provider = self.provider.name(),
            mode = %self.config.mode,
            request = %request,
            "Submitting spot request"
        );
        let handle = match self.provider.submit(request).await {
            Ok(handle) => handle,
            Err(e) => return Err(self.fail(OrchestratorError::Submission(e))),
        };
        tracing::info!(handle = %handle, "Spot request submitted");
        self.handle = Some(handle.clone());
        self.enter(DeployPhase::Submitted);

        let stamp = match self.records.start_run(&RunStamp::now(), &handle).await {
            Ok((stamp, path)) => {
                tracing::info!(handle = %handle, record = %path.display(), "Request recorded");
                stamp
            }
            Err(source) => {
                return Err(self.fail(OrchestratorError::HandleNotRecorded {
                    handle: handle.to_string(),
                    source,
                }));
            }
        };

        // Fulfillment
        self.enter(DeployPhase::Fulfilling);
        let policy = polling.fulfillment.with_deadline(deadline);
        tracing::info!(handle = %handle, policy = %policy, "Waiting for fulfillment");
        match self.wait_for_fulfillment(&handle, &policy).await {
            PollResult::Ready { attempts, .. } => {
                tracing::info!(handle = %handle, attempts, "Spot request fulfilled");
            }
            PollResult::Failed { error, .. } => {
                return Err(self.fail(OrchestratorError::ProvisioningFailed {
                    handle: handle.to_string(),
                    detail: error,
                }));
            }
            PollResult::Exhausted { attempts } => {
                tracing::warn!(
                    handle = %handle,
                    attempts,
                    "Request not fulfilled yet; check it manually or run cleanup"
                );
                return Ok(DeployOutcome::AwaitingFulfillment { handle, attempts });
            }
            PollResult::TimedOut { .. } => return Err(self.abandon(&handle).await),
        }
        self.enter(DeployPhase::Fulfilled);

        let policy = polling.lookup.with_deadline(deadline);
        let instance = match self.resolve_instance(&handle, &policy).await {
            PollResult::Ready { value, .. } => value,
            PollResult::Failed { error, .. } => match error {},
            PollResult::Exhausted { .. } | PollResult::TimedOut { .. } => {
                return Err(self.abandon(&handle).await);
            }
        };
        tracing::info!(
            instance_id = %instance.instance_id,
            address = %instance.address,
            "Instance resolved"
        );
        if let Err(e) = self.records.save_address(&stamp, &instance.address).await {
            return Err(self.fail(e.into()));
        }
        self.instance = Some(instance.clone());
        let address = instance.address.clone();

        // Reachability
        self.enter(DeployPhase::SshWait);
        let policy = polling.reachability.with_deadline(deadline);
        tracing::info!(address = %address, policy = %policy, "Waiting for SSH");
        match self.wait_for_ssh(&address, &policy).await {
            PollResult::Ready { attempts, .. } => {
                tracing::info!(address = %address, attempts, "SSH is reachable");
            }
            PollResult::Failed { error, .. } => {
                return Err(self.fail(OrchestratorError::RemoteUnavailable(error)));
            }
            PollResult::Exhausted { .. } | PollResult::TimedOut { .. } => {
                return Err(self.abandon(&handle).await);
            }
        }

        // Setup
        self.enter(DeployPhase::Bootstrapping);
        match self.config.mode {
            DeployMode::Prebaked => self.check_image(&address).await,
            DeployMode::Bootstrap => {
                if let Err(e) = self.run_bootstrap(&address).await {
                    return Err(self.fail(e));
                }
            }
        }

        let policy = polling.setup.with_deadline(deadline);
        tracing::info!(
            address = %address,
            sentinel = %self.config.remote.setup_sentinel,
            policy = %policy,
            "Waiting for setup to complete"
        );
        match self.wait_for_sentinel(&address, &policy).await {
            PollResult::Ready { attempts, .. } => {
                tracing::info!(address = %address, attempts, "Setup complete");
            }
            PollResult::Failed { error, .. } => {
                return Err(self.fail(OrchestratorError::RemoteUnavailable(error)));
            }
            PollResult::Exhausted { attempts } => {
                tracing::warn!(
                    address = %address,
                    attempts,
                    "Setup sentinel not seen; inspect the instance manually"
                );
                return Ok(DeployOutcome::AwaitingSetup {
                    handle,
                    instance,
                    attempts,
                });
            }
            PollResult::TimedOut { .. } => return Err(self.abandon(&handle).await),
        }
        self.enter(DeployPhase::Ready);

        // Dispatch
        if let Err(source) = self.dispatch(&address).await {
            return Err(self.fail(OrchestratorError::DispatchFailed { address, source }));
        }
        self.enter(DeployPhase::WorkDispatched);
        tracing::info!(
            handle = %handle,
            address = %address,
            log = %self.config.remote.log_file,
            "Work dispatched"
        );

        Ok(DeployOutcome::Dispatched { handle, instance })
    }

    /// Cancel a request and terminate its instances.
    ///
    /// With no handle, the most recently recorded one is used. A request
    /// that is already gone counts as success.
    pub async fn cleanup(
        &mut self,
        handle: Option<ProvisionHandle>,
    ) -> Result<CleanupReport, OrchestratorError> {
        let handle = match handle {
            Some(handle) => handle,
            None => match self.records.latest_handle().await? {
                Some((stamp, handle)) => {
                    tracing::info!(handle = %handle, run = %stamp, "Using most recent recorded request");
                    handle
                }
                None => {
                    return Err(OrchestratorError::NoRecordedHandle {
                        dir: self.records.dir().to_path_buf(),
                    });
                }
            },
        };

        tracing::info!(handle = %handle, "Cancelling request and terminating instances");
        let outcome = self
            .provider
            .cancel(&handle, true)
            .await
            .map_err(|source| OrchestratorError::CleanupFailed {
                handle: handle.to_string(),
                source,
            })?;
        match outcome {
            CancelOutcome::Cancelled => tracing::info!(handle = %handle, "Request cancelled"),
            CancelOutcome::AlreadyGone => {
                tracing::info!(handle = %handle, "Request already cancelled or unknown")
            }
        }
        self.enter(DeployPhase::Terminated);
        Ok(CleanupReport { handle, outcome })
    }

    /// Latest recorded run and its live request status.
    pub async fn status(&self) -> Result<FleetStatus, OrchestratorError> {
        let run = self
            .records
            .latest_run()
            .await?
            .ok_or_else(|| OrchestratorError::NoRecordedHandle {
                dir: self.records.dir().to_path_buf(),
            })?;
        let request = self
            .provider
            .request_status(&run.handle)
            .await
            .map_err(|e| e.to_string());
        Ok(FleetStatus { run, request })
    }

    /// Deadline expiry: cancel with termination, then fail.
    async fn abandon(&mut self, handle: &ProvisionHandle) -> OrchestratorError {
        let phase = self.phase.to_string();
        let secs = self.config.deadline.map(|d| d.as_secs()).unwrap_or_default();
        tracing::warn!(handle = %handle, phase = %phase, secs, "Deadline exceeded; cancelling request");
        if let Err(e) = self.provider.cancel(handle, true).await {
            tracing::error!(handle = %handle, error = %e, "Cancel after deadline failed; run cleanup manually");
        }
        self.fail(OrchestratorError::DeadlineExceeded {
            handle: handle.to_string(),
            phase,
            secs,
        })
    }

    async fn wait_for_fulfillment(
        &self,
        handle: &ProvisionHandle,
        policy: &RetryPolicy,
    ) -> PollResult<(), String> {
        let provider = self.provider.as_ref();
        poll_until(policy, "fulfillment", move |_| async move {
            match provider.request_status(handle).await {
                Ok(RequestStatus::Fulfilled) => Probe::Ready(()),
                Ok(RequestStatus::Error { detail }) => Probe::Fail(detail),
                Ok(RequestStatus::Cancelled) => {
                    Probe::Fail("request was cancelled before fulfillment".to_string())
                }
                Ok(status) => Probe::NotYet(format!("request {}", status)),
                Err(e) => {
                    tracing::warn!(handle = %handle, error = %e, "Status lookup failed");
                    Probe::NotYet("status unavailable".to_string())
                }
            }
        })
        .await
    }

    async fn resolve_instance(
        &self,
        handle: &ProvisionHandle,
        policy: &RetryPolicy,
    ) -> PollResult<InstanceRecord, Infallible> {
        let provider = self.provider.as_ref();
        poll_until(policy, "instance lookup", move |_| async move {
            match lookup_instance(provider, handle).await {
                Ok(Some(record)) => Probe::Ready(record),
                Ok(None) => Probe::NotYet("instance address not assigned".to_string()),
                Err(e) => {
                    tracing::warn!(handle = %handle, error = %e, "Instance lookup failed");
                    Probe::NotYet("instance lookup unavailable".to_string())
                }
            }
        })
        .await
    }

    async fn wait_for_ssh(&self, address: &str, policy: &RetryPolicy) -> PollResult<(), RemoteError> {
        let remote = self.remote.as_ref();
        poll_until(policy, "ssh", move |_| async move {
            match remote.exec(address, "echo ready").await {
                Ok(output) if output.success() => Probe::Ready(()),
                Ok(output) => Probe::NotYet(output.summary()),
                Err(e @ RemoteError::SpawnFailed { .. }) => Probe::Fail(e),
                Err(e) => Probe::NotYet(e.to_string()),
            }
        })
        .await
    }

    async fn wait_for_sentinel(
        &self,
        address: &str,
        policy: &RetryPolicy,
    ) -> PollResult<(), RemoteError> {
        let remote = self.remote.as_ref();
        let check = format!("test -f {}", shell_quote(&self.config.remote.setup_sentinel));
        let command = check.as_str();
        poll_until(policy, "setup", move |_| async move {
            match remote.exec(address, command).await {
                Ok(output) if output.success() => Probe::Ready(()),
                Ok(_) => Probe::NotYet("setup still running".to_string()),
                Err(e @ RemoteError::SpawnFailed { .. }) => Probe::Fail(e),
                Err(e) => Probe::NotYet(e.to_string()),
            }
        })
        .await
    }

    /// One look at the image sentinel. Informational only.
    async fn check_image(&self, address: &str) {
        let sentinel = &self.config.remote.image_sentinel;
        let command = format!("test -f {}", shell_quote(sentinel));
        match self.remote.exec(address, &command).await {
            Ok(output) if output.success() => {
                tracing::info!(address, sentinel = %sentinel, "Pre-built image verified")
            }
            Ok(_) => tracing::warn!(
                address,
                sentinel = %sentinel,
                "Image not verified yet; continuing to wait for setup"
            ),
            Err(e) => tracing::warn!(address, error = %e, "Image check failed"),
        }
    }

    async fn run_bootstrap(&self, address: &str) -> Result<(), OrchestratorError> {
        let remote_cfg = &self.config.remote;
        let Some(script) = remote_cfg.bootstrap_script.as_deref() else {
            tracing::warn!(
                address,
                "No bootstrap script configured; relying on the instance's own startup payload"
            );
            return Ok(());
        };

        let failed = |reason: String| OrchestratorError::BootstrapFailed {
            address: address.to_string(),
            reason,
        };

        self.ensure_remote_dir(address).await.map_err(|e| failed(e.to_string()))?;
        let target = remote_path(&remote_cfg.remote_dir, "bootstrap.sh");
        tracing::info!(address, script = %script.display(), "Uploading bootstrap script");
        self.remote
            .copy_to(address, script, &target)
            .await
            .map_err(|e| failed(e.to_string()))?;

        tracing::info!(address, "Running bootstrap; this can take several minutes");
        let output = self
            .remote
            .exec(address, &format!("bash {}", shell_quote(&target)))
            .await
            .map_err(|e| failed(e.to_string()))?;
        if !output.success() {
            return Err(failed(output.summary()));
        }
        tracing::info!(address, "Bootstrap finished");
        Ok(())
    }

    async fn ensure_remote_dir(&self, address: &str) -> Result<(), RemoteError> {
        let output = self
            .remote
            .exec(
                address,
                &format!("mkdir -p {}", shell_quote(&self.config.remote.remote_dir)),
            )
            .await?;
        if output.success() {
            Ok(())
        } else {
            Err(RemoteError::CommandFailed {
                host: address.to_string(),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }

    /// Copy the payload and start the job. Returns once it is started.
    async fn dispatch(&self, address: &str) -> Result<(), RemoteError> {
        let remote_cfg = &self.config.remote;
        self.ensure_remote_dir(address).await?;

        for file in &remote_cfg.payload_files {
            let target = remote_path(&remote_cfg.remote_dir, &file_name(file));
            tracing::info!(address, file = %file.display(), target = %target, "Uploading");
            self.remote.copy_to(address, file, &target).await?;
        }

        tracing::info!(address, command = %remote_cfg.remote_command, "Starting remote job");
        self.remote
            .start_detached(
                address,
                &remote_cfg.remote_dir,
                &remote_cfg.remote_command,
                &remote_cfg.log_file,
            )
            .await
    }
}

/// Request -> first active instance id -> its address.
async fn lookup_instance(
    provider: &dyn ComputeProvider,
    handle: &ProvisionHandle,
) -> Result<Option<InstanceRecord>, ProviderError> {
    let ids = provider.active_instances(handle).await?;
    let Some(instance_id) = ids.into_iter().next() else {
        return Ok(None);
    };
    Ok(provider
        .instance_address(&instance_id)
        .await?
        .map(|address| InstanceRecord {
            instance_id,
            address,
        }))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn remote_path(dir: &str, name: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), name)
}
