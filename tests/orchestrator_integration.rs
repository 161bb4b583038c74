//! Integration tests for the deployment state machine.
//!
//! Uses a scripted compute provider and remote channel, with tokio's
//! paused clock so every polling interval elapses instantly.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use fleetscribe::config::{DeployMode, PollingConfig, RemoteConfig};
use fleetscribe::error::{OrchestratorError, ProviderError, RemoteError};
use fleetscribe::orchestrator::{DeployOutcome, DeployPhase, FleetOrchestrator, OrchestratorConfig};
use fleetscribe::poll::RetryPolicy;
use fleetscribe::provision::{
    CancelOutcome, ComputeProvider, ProvisionHandle, ProvisionRequest, RequestStatus,
};
use fleetscribe::records::RunRecords;
use fleetscribe::remote::{CommandOutput, RemoteChannel};

const HANDLE: &str = "sfr-6f1c2d3e-0000-4000-8000-000000000001";
const ADDRESS: &str = "203.0.113.5";
const SENTINEL_CHECK: &str = "test -f /tmp/setup_complete";

// ---------------------------------------------------------------------------
// Mock compute provider
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ProviderState {
    /// Scripted status answers; `Pending` once exhausted.
    statuses: Mutex<VecDeque<Result<RequestStatus, ProviderError>>>,
    status_calls: Mutex<u32>,
    /// Scripted instance-id answers; one running instance once exhausted.
    instances: Mutex<VecDeque<Vec<String>>>,
    /// Scripted address answers; `ADDRESS` once exhausted.
    addresses: Mutex<VecDeque<Option<String>>>,
    lookup_calls: Mutex<u32>,
    address_calls: Mutex<u32>,
    cancels: Mutex<Vec<(String, bool)>>,
    cancelled: Mutex<HashSet<String>>,
}

struct MockProvider {
    state: Arc<ProviderState>,
}

impl MockProvider {
    fn scripted(statuses: Vec<Result<RequestStatus, ProviderError>>) -> (Self, Arc<ProviderState>) {
        let state = Arc::new(ProviderState::default());
        *state.statuses.lock().unwrap() = statuses.into();
        (
            Self {
                state: Arc::clone(&state),
            },
            state,
        )
    }
}

#[async_trait]
impl ComputeProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn submit(&self, _request: &ProvisionRequest) -> Result<ProvisionHandle, ProviderError> {
        Ok(ProvisionHandle::new(HANDLE))
    }

    async fn request_status(
        &self,
        _handle: &ProvisionHandle,
    ) -> Result<RequestStatus, ProviderError> {
        *self.state.status_calls.lock().unwrap() += 1;
        self.state
            .statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(RequestStatus::Pending))
    }

    async fn active_instances(
        &self,
        _handle: &ProvisionHandle,
    ) -> Result<Vec<String>, ProviderError> {
        *self.state.lookup_calls.lock().unwrap() += 1;
        Ok(self
            .state
            .instances
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| vec!["i-0abc123".to_string()]))
    }

    async fn instance_address(&self, instance_id: &str) -> Result<Option<String>, ProviderError> {
        assert_eq!(instance_id, "i-0abc123");
        *self.state.address_calls.lock().unwrap() += 1;
        Ok(self
            .state
            .addresses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Some(ADDRESS.to_string())))
    }

    async fn cancel(
        &self,
        handle: &ProvisionHandle,
        terminate_instances: bool,
    ) -> Result<CancelOutcome, ProviderError> {
        self.state
            .cancels
            .lock()
            .unwrap()
            .push((handle.to_string(), terminate_instances));
        if self.state.cancelled.lock().unwrap().insert(handle.to_string()) {
            Ok(CancelOutcome::Cancelled)
        } else {
            Ok(CancelOutcome::AlreadyGone)
        }
    }
}

// ---------------------------------------------------------------------------
// Mock remote channel
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RemoteState {
    /// Scripted reachability answers; reachable once exhausted.
    ssh: Mutex<VecDeque<bool>>,
    /// Scripted sentinel answers; present once exhausted unless `never_ready`.
    sentinel: Mutex<VecDeque<bool>>,
    never_ready: bool,
    fail_copies: bool,
    commands: Mutex<Vec<String>>,
    copies: Mutex<Vec<(PathBuf, String)>>,
    started: Mutex<Vec<(String, String, String)>>,
}

impl RemoteState {
    fn count(&self, command: &str) -> usize {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == command)
            .count()
    }
}

struct MockRemote {
    state: Arc<RemoteState>,
}

fn output(ok: bool, stderr: &str) -> CommandOutput {
    CommandOutput {
        code: Some(if ok { 0 } else { 255 }),
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

#[async_trait]
impl RemoteChannel for MockRemote {
    async fn exec(&self, host: &str, command: &str) -> Result<CommandOutput, RemoteError> {
        assert_eq!(host, ADDRESS);
        self.state.commands.lock().unwrap().push(command.to_string());
        let result = match command {
            "echo ready" => {
                let ok = self.state.ssh.lock().unwrap().pop_front().unwrap_or(true);
                output(ok, "ssh: connect to host 203.0.113.5 port 22: Connection refused")
            }
            SENTINEL_CHECK => {
                let ok = self
                    .state
                    .sentinel
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or(!self.state.never_ready);
                CommandOutput {
                    code: Some(if ok { 0 } else { 1 }),
                    ..Default::default()
                }
            }
            _ => output(true, ""),
        };
        Ok(result)
    }

    async fn copy_to(&self, host: &str, local: &Path, remote_path: &str) -> Result<(), RemoteError> {
        if self.state.fail_copies {
            return Err(RemoteError::CopyFailed {
                host: host.to_string(),
                local: local.to_path_buf(),
                remote_path: remote_path.to_string(),
                reason: "permission denied".to_string(),
            });
        }
        self.state
            .copies
            .lock()
            .unwrap()
            .push((local.to_path_buf(), remote_path.to_string()));
        Ok(())
    }

    async fn start_detached(
        &self,
        _host: &str,
        workdir: &str,
        command: &str,
        log_file: &str,
    ) -> Result<(), RemoteError> {
        // The job must never start before setup was confirmed.
        assert!(self.state.count(SENTINEL_CHECK) > 0);
        self.state.started.lock().unwrap().push((
            workdir.to_string(),
            command.to_string(),
            log_file.to_string(),
        ));
        Ok(())
    }

    async fn open_shell(&self, _host: &str) -> Result<(), RemoteError> {
        Ok(())
    }

    fn login_hint(&self, host: &str) -> String {
        format!("ssh ubuntu@{}", host)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn prebaked_polling() -> PollingConfig {
    PollingConfig {
        fulfillment: RetryPolicy::bounded(12, Duration::from_secs(30)),
        lookup: RetryPolicy::unbounded(Duration::from_secs(10)),
        reachability: RetryPolicy::unbounded(Duration::from_secs(10)),
        setup: RetryPolicy::bounded(12, Duration::from_secs(30)),
    }
}

struct Harness {
    orch: FleetOrchestrator,
    provider: Arc<ProviderState>,
    remote: Arc<RemoteState>,
    payload: Vec<PathBuf>,
    _dir: tempfile::TempDir,
}

fn harness(
    mode: DeployMode,
    polling: PollingConfig,
    deadline: Option<Duration>,
    statuses: Vec<Result<RequestStatus, ProviderError>>,
    remote_state: RemoteState,
    bootstrap_script: bool,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let payload = vec![dir.path().join("run_batch.sh"), dir.path().join("credentials.json")];
    for file in &payload {
        std::fs::write(file, "payload").unwrap();
    }
    let script = dir.path().join("setup.sh");
    std::fs::write(&script, "#!/bin/bash\ntouch /tmp/setup_complete\n").unwrap();

    let config = OrchestratorConfig {
        mode,
        polling,
        deadline,
        remote: RemoteConfig {
            payload_files: payload.clone(),
            bootstrap_script: bootstrap_script.then_some(script),
            ..RemoteConfig::default()
        },
    };

    let (provider, provider_state) = MockProvider::scripted(statuses);
    let remote_state = Arc::new(remote_state);
    let orch = FleetOrchestrator::new(
        config,
        Arc::new(provider),
        Arc::new(MockRemote {
            state: Arc::clone(&remote_state),
        }),
        RunRecords::new(dir.path().join("runs")),
    );
    Harness {
        orch,
        provider: provider_state,
        remote: remote_state,
        payload,
        _dir: dir,
    }
}

fn request() -> ProvisionRequest {
    ProvisionRequest::new(serde_json::json!({
        "TargetCapacity": 1,
        "LaunchSpecifications": [
            {"ImageId": "ami-0abc", "InstanceType": "g4dn.xlarge"}
        ]
    }))
}

fn remote_script(ssh: &[bool], sentinel: &[bool]) -> RemoteState {
    RemoteState {
        ssh: Mutex::new(ssh.iter().copied().collect()),
        sentinel: Mutex::new(sentinel.iter().copied().collect()),
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_reference_scenario_dispatches_to_resolved_address() {
    let mut h = harness(
        DeployMode::Prebaked,
        prebaked_polling(),
        None,
        vec![
            Ok(RequestStatus::Pending),
            Ok(RequestStatus::Pending),
            Ok(RequestStatus::Fulfilled),
        ],
        remote_script(&[false, false], &[false, false, true]),
        false,
    );

    let outcome = h.orch.deploy(&request()).await.expect("deploy should succeed");

    let DeployOutcome::Dispatched { handle, instance } = outcome else {
        panic!("expected dispatch, got {:?}", outcome);
    };
    assert_eq!(handle.as_str(), HANDLE);
    assert_eq!(instance.address, ADDRESS);
    assert_eq!(instance.instance_id, "i-0abc123");
    assert_eq!(h.orch.instance(), Some(&instance));

    assert_eq!(*h.provider.status_calls.lock().unwrap(), 3);
    assert_eq!(*h.provider.lookup_calls.lock().unwrap(), 1);
    assert_eq!(h.remote.count("echo ready"), 3);
    assert_eq!(h.remote.count(SENTINEL_CHECK), 3);
    assert_eq!(h.remote.count("test -f /tmp/ami_verified"), 1);

    let copies = h.remote.copies.lock().unwrap().clone();
    assert_eq!(
        copies,
        vec![
            (h.payload[0].clone(), "transcription/run_batch.sh".to_string()),
            (h.payload[1].clone(), "transcription/credentials.json".to_string()),
        ]
    );
    let started = h.remote.started.lock().unwrap().clone();
    assert_eq!(
        started,
        vec![(
            "transcription".to_string(),
            "BATCH_SHUTDOWN=true ./fleetscribe transcribe".to_string(),
            "transcription.log".to_string(),
        )]
    );

    assert_eq!(
        h.orch.history(),
        &[
            DeployPhase::Submitted,
            DeployPhase::Fulfilling,
            DeployPhase::Fulfilled,
            DeployPhase::SshWait,
            DeployPhase::Bootstrapping,
            DeployPhase::Ready,
            DeployPhase::WorkDispatched,
        ]
    );

    let run = h.orch.records().latest_run().await.unwrap().unwrap();
    assert_eq!(run.handle.as_str(), HANDLE);
    assert_eq!(run.address.as_deref(), Some(ADDRESS));
    assert!(h.provider.cancels.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_provider_error_fails_without_further_polling() {
    let mut h = harness(
        DeployMode::Prebaked,
        prebaked_polling(),
        None,
        vec![
            Ok(RequestStatus::Pending),
            Ok(RequestStatus::Error {
                detail: "There is no Spot capacity available that matches your request."
                    .to_string(),
            }),
            Ok(RequestStatus::Fulfilled),
        ],
        RemoteState::default(),
        false,
    );

    let err = h.orch.deploy(&request()).await.unwrap_err();
    match err {
        OrchestratorError::ProvisioningFailed { handle, detail } => {
            assert_eq!(handle, HANDLE);
            assert!(detail.contains("no Spot capacity"));
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(h.orch.phase(), DeployPhase::Failed);
    assert_eq!(*h.provider.status_calls.lock().unwrap(), 2);
    assert_eq!(*h.provider.lookup_calls.lock().unwrap(), 0);
    assert!(h.orch.instance().is_none());
    assert!(h.remote.commands.lock().unwrap().is_empty());
    // No automatic cancel, but the handle is recorded for manual cleanup.
    assert!(h.provider.cancels.lock().unwrap().is_empty());
    assert!(h.orch.records().latest_handle().await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_transient_status_failures_are_retried() {
    let mut h = harness(
        DeployMode::Prebaked,
        prebaked_polling(),
        None,
        vec![
            Err(ProviderError::CommandFailed {
                operation: "describe-spot-fleet-requests".to_string(),
                reason: "RequestLimitExceeded".to_string(),
            }),
            Ok(RequestStatus::Other("modifying".to_string())),
            Ok(RequestStatus::Fulfilled),
        ],
        RemoteState::default(),
        false,
    );

    let outcome = h.orch.deploy(&request()).await.unwrap();
    assert!(matches!(outcome, DeployOutcome::Dispatched { .. }));
    assert_eq!(*h.provider.status_calls.lock().unwrap(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_fulfillment_exhaustion_is_not_a_failure() {
    let mut h = harness(
        DeployMode::Prebaked,
        prebaked_polling(),
        None,
        Vec::new(),
        RemoteState::default(),
        false,
    );

    let outcome = h.orch.deploy(&request()).await.unwrap();
    assert_eq!(
        outcome,
        DeployOutcome::AwaitingFulfillment {
            handle: ProvisionHandle::new(HANDLE),
            attempts: 12,
        }
    );
    assert_eq!(h.orch.phase(), DeployPhase::Fulfilling);
    assert_eq!(*h.provider.status_calls.lock().unwrap(), 12);
    assert!(h.provider.cancels.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_never_ready_without_sentinel() {
    let mut h = harness(
        DeployMode::Prebaked,
        prebaked_polling(),
        None,
        vec![Ok(RequestStatus::Fulfilled)],
        RemoteState {
            never_ready: true,
            ..Default::default()
        },
        false,
    );

    let outcome = h.orch.deploy(&request()).await.unwrap();
    let DeployOutcome::AwaitingSetup { attempts, instance, .. } = outcome else {
        panic!("expected setup wait, got {:?}", outcome);
    };
    assert_eq!(attempts, 12);
    assert_eq!(instance.address, ADDRESS);
    assert_eq!(h.orch.phase(), DeployPhase::Bootstrapping);
    assert!(!h.orch.history().contains(&DeployPhase::Ready));
    assert!(h.remote.started.lock().unwrap().is_empty());
    assert!(h.remote.copies.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_bootstrap_mode_runs_script_before_sentinel() {
    let polling = PollingConfig::for_mode(DeployMode::Bootstrap);
    let mut h = harness(
        DeployMode::Bootstrap,
        polling,
        None,
        vec![Ok(RequestStatus::Pending), Ok(RequestStatus::Fulfilled)],
        remote_script(&[false], &[false, true]),
        true,
    );

    let outcome = h.orch.deploy(&request()).await.unwrap();
    assert!(matches!(outcome, DeployOutcome::Dispatched { .. }));

    let copies = h.remote.copies.lock().unwrap().clone();
    assert_eq!(copies[0].1, "transcription/bootstrap.sh");

    let commands = h.remote.commands.lock().unwrap().clone();
    let bash = commands
        .iter()
        .position(|c| c == "bash transcription/bootstrap.sh")
        .expect("bootstrap should run");
    let first_check = commands
        .iter()
        .position(|c| c == SENTINEL_CHECK)
        .expect("sentinel should be polled");
    assert!(bash < first_check);
    // The image sentinel is a prebaked-only check.
    assert_eq!(h.remote.count("test -f /tmp/ami_verified"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_failure_leaves_instance_running() {
    let mut h = harness(
        DeployMode::Prebaked,
        prebaked_polling(),
        None,
        vec![Ok(RequestStatus::Fulfilled)],
        RemoteState {
            fail_copies: true,
            ..Default::default()
        },
        false,
    );

    let err = h.orch.deploy(&request()).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::DispatchFailed { ref address, .. } if address == ADDRESS));
    assert_eq!(h.orch.phase(), DeployPhase::Failed);
    assert!(h.orch.history().contains(&DeployPhase::Ready));
    assert!(h.remote.started.lock().unwrap().is_empty());
    assert!(h.provider.cancels.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_deadline_cancels_and_terminates() {
    let polling = PollingConfig {
        fulfillment: RetryPolicy::unbounded(Duration::from_secs(10)),
        ..prebaked_polling()
    };
    let mut h = harness(
        DeployMode::Prebaked,
        polling,
        Some(Duration::from_secs(60)),
        Vec::new(),
        RemoteState::default(),
        false,
    );

    let err = h.orch.deploy(&request()).await.unwrap_err();
    match err {
        OrchestratorError::DeadlineExceeded { handle, phase, secs } => {
            assert_eq!(handle, HANDLE);
            assert_eq!(phase, "fulfilling");
            assert_eq!(secs, 60);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(h.orch.phase(), DeployPhase::Failed);
    assert_eq!(
        h.provider.cancels.lock().unwrap().clone(),
        vec![(HANDLE.to_string(), true)]
    );
}

#[tokio::test]
async fn test_cleanup_is_idempotent() {
    let mut h = harness(
        DeployMode::Prebaked,
        prebaked_polling(),
        None,
        Vec::new(),
        RemoteState::default(),
        false,
    );
    let handle = ProvisionHandle::new(HANDLE);

    let first = h.orch.cleanup(Some(handle.clone())).await.unwrap();
    let second = h.orch.cleanup(Some(handle.clone())).await.unwrap();

    assert_eq!(first.outcome, CancelOutcome::Cancelled);
    assert_eq!(second.outcome, CancelOutcome::AlreadyGone);
    assert_eq!(h.orch.phase(), DeployPhase::Terminated);
    assert_eq!(
        h.provider.cancels.lock().unwrap().clone(),
        vec![(HANDLE.to_string(), true), (HANDLE.to_string(), true)]
    );
}

#[tokio::test]
async fn test_cleanup_without_records_is_an_error() {
    let mut h = harness(
        DeployMode::Prebaked,
        prebaked_polling(),
        None,
        Vec::new(),
        RemoteState::default(),
        false,
    );

    let err = h.orch.cleanup(None).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::NoRecordedHandle { .. }));
    assert!(h.provider.cancels.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_resolves_most_recent_handle() {
    let mut h = harness(
        DeployMode::Prebaked,
        prebaked_polling(),
        None,
        vec![Ok(RequestStatus::Fulfilled)],
        RemoteState::default(),
        false,
    );
    h.orch.deploy(&request()).await.unwrap();

    let report = h.orch.cleanup(None).await.unwrap();
    assert_eq!(report.handle.as_str(), HANDLE);
    assert_eq!(h.orch.phase(), DeployPhase::Terminated);

    let status = h.orch.status().await.unwrap();
    assert_eq!(status.run.address.as_deref(), Some(ADDRESS));
}

#[tokio::test(start_paused = true)]
async fn test_empty_lookups_are_retried_until_an_address_appears() {
    let mut h = harness(
        DeployMode::Prebaked,
        prebaked_polling(),
        None,
        vec![Ok(RequestStatus::Fulfilled)],
        RemoteState::default(),
        false,
    );
    *h.provider.instances.lock().unwrap() = vec![Vec::new()].into();
    *h.provider.addresses.lock().unwrap() = vec![None].into();

    let outcome = h.orch.deploy(&request()).await.unwrap();
    let DeployOutcome::Dispatched { instance, .. } = outcome else {
        panic!("expected dispatch, got {:?}", outcome);
    };
    assert_eq!(instance.address, ADDRESS);

    // No instance, then an instance without an address, then the address.
    assert_eq!(*h.provider.lookup_calls.lock().unwrap(), 3);
    assert_eq!(*h.provider.address_calls.lock().unwrap(), 2);

    // Nothing touched the instance while the lookups were still missing.
    assert_eq!(h.remote.count("echo ready"), 1);
    assert_eq!(
        h.orch.history(),
        &[
            DeployPhase::Submitted,
            DeployPhase::Fulfilling,
            DeployPhase::Fulfilled,
            DeployPhase::SshWait,
            DeployPhase::Bootstrapping,
            DeployPhase::Ready,
            DeployPhase::WorkDispatched,
        ]
    );

    // Exactly one address record for the run.
    let records_dir = h.orch.records().dir().to_path_buf();
    let address_records: Vec<_> = std::fs::read_dir(&records_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("instance_ip_"))
        .collect();
    assert_eq!(address_records.len(), 1);
    let recorded = std::fs::read_to_string(records_dir.join(&address_records[0])).unwrap();
    assert_eq!(recorded.trim(), ADDRESS);
}

#[tokio::test(start_paused = true)]
async fn test_unrecordable_handle_is_reported_with_the_handle() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, "not a directory").unwrap();
    let payload = dir.path().join("fleetscribe");
    std::fs::write(&payload, "binary").unwrap();

    let (provider, provider_state) = MockProvider::scripted(vec![Ok(RequestStatus::Fulfilled)]);
    let remote_state = Arc::new(RemoteState::default());
    let mut orch = FleetOrchestrator::new(
        OrchestratorConfig {
            mode: DeployMode::Prebaked,
            polling: prebaked_polling(),
            deadline: None,
            remote: RemoteConfig {
                payload_files: vec![payload],
                ..RemoteConfig::default()
            },
        },
        Arc::new(provider),
        Arc::new(MockRemote {
            state: Arc::clone(&remote_state),
        }),
        RunRecords::new(blocker.join("runs")),
    );

    let err = orch.deploy(&request()).await.unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::HandleNotRecorded { ref handle, .. } if handle == HANDLE
    ));
    let message = err.to_string();
    assert!(message.contains(HANDLE));
    assert!(message.contains(&format!("fleetscribe cleanup --handle {}", HANDLE)));

    // The live request is still known to the caller, and nothing was polled.
    assert_eq!(orch.handle().map(|h| h.as_str()), Some(HANDLE));
    assert_eq!(orch.phase(), DeployPhase::Failed);
    assert_eq!(*provider_state.status_calls.lock().unwrap(), 0);
    assert!(remote_state.commands.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_empty_payload_is_rejected_before_submission() {
    let mut h = harness(
        DeployMode::Prebaked,
        prebaked_polling(),
        None,
        vec![Ok(RequestStatus::Fulfilled)],
        RemoteState::default(),
        false,
    );
    let dir = tempfile::tempdir().unwrap();
    let mut orch = FleetOrchestrator::new(
        OrchestratorConfig {
            mode: DeployMode::Prebaked,
            polling: prebaked_polling(),
            deadline: None,
            remote: RemoteConfig::default(),
        },
        Arc::new(MockProvider {
            state: Arc::clone(&h.provider),
        }),
        Arc::new(MockRemote {
            state: Arc::clone(&h.remote),
        }),
        RunRecords::new(dir.path().join("runs")),
    );

    let err = orch.deploy(&request()).await.unwrap_err();
    assert!(err.to_string().contains("FLEET_PAYLOAD_FILES"));
    assert!(orch.handle().is_none());
    assert_eq!(orch.phase(), DeployPhase::Failed);
    assert!(orch.records().latest_handle().await.unwrap().is_none());
    assert_eq!(*h.provider.status_calls.lock().unwrap(), 0);
    assert!(h.remote.started.lock().unwrap().is_empty());

    // The same harness with its payload configured dispatches normally.
    let outcome = h.orch.deploy(&request()).await.unwrap();
    assert!(matches!(outcome, DeployOutcome::Dispatched { .. }));
}
