//! fleetscribe - main entry point.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use fleetscribe::{
    batch::{
        BatchRunner, CommandTranscriber, ObjectStore, document_store, object_store, power_off,
    },
    config::{Config, DeployMode},
    orchestrator::{DeployOutcome, FleetOrchestrator, OrchestratorConfig},
    provision::{AwsSpotFleet, ProvisionHandle, ProvisionRequest},
    records::RunRecords,
    remote::{RemoteChannel, SshChannel},
};

#[derive(Parser, Debug)]
#[command(name = "fleetscribe")]
#[command(about = "Provision a spot GPU instance and run batch transcription on it")]
#[command(version)]
struct Args {
    /// Configuration file path (optional, uses env vars by default)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a spot request, wait for the instance and dispatch the job
    Deploy {
        /// prebaked (fast, bounded waits) or bootstrap (slow, unbounded waits)
        #[arg(long)]
        mode: Option<DeployMode>,
    },
    /// Show the most recent run and its request status
    Status,
    /// Cancel a request and terminate its instances
    Cleanup {
        /// Request id; defaults to the most recently recorded one
        #[arg(long)]
        handle: Option<String>,
    },
    /// Open an interactive shell on the most recent instance
    Connect,
    /// Copy local audio files into the object store (bucket or directory)
    Upload {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Run the batch transcription job (on the instance)
    Transcribe,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fleetscribe=info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_target(false),
        )
        .init();

    let mode = match &args.command {
        Command::Deploy { mode } => *mode,
        _ => None,
    };
    let config = Config::from_env_with_mode(args.config.as_deref(), mode)?;

    match args.command {
        Command::Deploy { .. } => deploy(&config).await,
        Command::Status => status(&config).await,
        Command::Cleanup { handle } => cleanup(&config, handle).await,
        Command::Connect => connect(&config).await,
        Command::Upload { files } => upload(&config, files).await,
        Command::Transcribe => transcribe(&config).await,
    }
}

fn ssh_channel(config: &Config) -> anyhow::Result<Arc<SshChannel>> {
    let key = config.remote.require_key_path()?;
    Ok(Arc::new(SshChannel::new(
        config.remote.user.clone(),
        key.clone(),
        config.remote.connect_timeout,
    )))
}

fn orchestrator(config: &Config, remote: Arc<dyn RemoteChannel>) -> FleetOrchestrator {
    FleetOrchestrator::new(
        OrchestratorConfig::from_config(config),
        Arc::new(AwsSpotFleet::new(config.fleet.region.clone())),
        remote,
        RunRecords::new(&config.fleet.state_dir),
    )
}

async fn deploy(config: &Config) -> anyhow::Result<()> {
    // Everything local is checked before anything is submitted.
    let remote = ssh_channel(config)?;
    config.remote.check_local_files()?;
    let request =
        ProvisionRequest::load(&config.fleet.request_template, &config.fleet.placeholders)?;
    if config.fleet.mode == DeployMode::Bootstrap
        && config.remote.bootstrap_script.is_none()
        && !request.has_bootstrap_payload()
    {
        tracing::warn!("Bootstrap mode without a bootstrap script or user data; setup may never finish");
    }

    tracing::info!(
        mode = %config.fleet.mode,
        fulfillment = %config.polling.fulfillment,
        setup = %config.polling.setup,
        "Starting deployment"
    );

    let mut orch = orchestrator(config, remote.clone());
    let result = tokio::select! {
        r = orch.deploy(&request) => Some(r),
        _ = tokio::signal::ctrl_c() => None,
    };
    let Some(result) = result else {
        if let Some(handle) = orch.handle() {
            println!("Interrupted. Request {} is still live.", handle);
            println!("  Clean up with: fleetscribe cleanup --handle {}", handle);
        }
        anyhow::bail!("interrupted");
    };

    let outcome = result?;
    let handle = outcome.handle();
    println!();
    match &outcome {
        DeployOutcome::Dispatched { instance, .. } => {
            println!("Transcription job started on {}", instance.address);
            println!("  Connect:  {}", remote.login_hint(&instance.address));
            println!(
                "  Progress: tail -f {}/{}",
                config.remote.remote_dir, config.remote.log_file
            );
            println!("  The instance shuts itself down when the job finishes.");
        }
        DeployOutcome::AwaitingFulfillment { attempts, .. } => {
            println!("Request {} not fulfilled after {} checks.", handle, attempts);
            println!("  Check later with: fleetscribe status");
        }
        DeployOutcome::AwaitingSetup {
            instance, attempts, ..
        } => {
            println!(
                "Instance {} is up but setup was not confirmed after {} checks.",
                instance.address, attempts
            );
            println!("  Inspect it with: {}", remote.login_hint(&instance.address));
        }
    }
    println!("  Clean up: fleetscribe cleanup --handle {}", handle);
    Ok(())
}

async fn status(config: &Config) -> anyhow::Result<()> {
    // Status never touches the instance, so no SSH key is needed.
    let remote = Arc::new(SshChannel::new(
        config.remote.user.clone(),
        config.remote.key_path.clone().unwrap_or_default(),
        config.remote.connect_timeout,
    ));
    let orch = orchestrator(config, remote.clone());
    let status = orch.status().await?;

    println!("Run:     {}", status.run.stamp);
    println!("Request: {}", status.run.handle);
    match &status.request {
        Ok(state) => println!("State:   {}", state),
        Err(e) => println!("State:   unknown ({})", e),
    }
    if let Some(address) = &status.run.address {
        println!("Address: {}", address);
        println!("Connect: {}", remote.login_hint(address));
    }
    Ok(())
}

async fn cleanup(config: &Config, handle: Option<String>) -> anyhow::Result<()> {
    let remote = Arc::new(SshChannel::new(
        config.remote.user.clone(),
        config.remote.key_path.clone().unwrap_or_default(),
        config.remote.connect_timeout,
    ));
    let mut orch = orchestrator(config, remote);
    let report = orch.cleanup(handle.map(ProvisionHandle::new)).await?;
    println!("Request {} cleaned up ({:?})", report.handle, report.outcome);
    Ok(())
}

async fn connect(config: &Config) -> anyhow::Result<()> {
    let remote = ssh_channel(config)?;
    let records = RunRecords::new(&config.fleet.state_dir);
    let Some((stamp, address)) = records.latest_address().await? else {
        anyhow::bail!(
            "no recorded instance address in {}",
            config.fleet.state_dir.display()
        );
    };
    tracing::info!(run = %stamp, address = %address, "Connecting");
    remote.open_shell(&address).await?;
    Ok(())
}

async fn upload(config: &Config, files: Vec<PathBuf>) -> anyhow::Result<()> {
    let store = object_store(&config.batch);
    for file in files {
        let Some(name) = file.file_name().and_then(|n| n.to_str()) else {
            anyhow::bail!("not a file: {}", file.display());
        };
        let key = format!("{}{}", config.batch.audio_prefix, name);
        store.upload(&file, &key).await?;
        println!("Uploaded {} -> {}", file.display(), store.object_url(&key));
    }
    if config.batch.bucket.is_none() {
        tracing::warn!(
            root = %config.batch.store_root.display(),
            "Uploaded to a local directory; set BATCH_BUCKET_URL so the instance can read the audio"
        );
    }
    Ok(())
}

async fn transcribe(config: &Config) -> anyhow::Result<()> {
    let batch = &config.batch;
    let store = object_store(batch);
    let runner = BatchRunner::new(
        batch.clone(),
        store.clone(),
        document_store(batch, store.clone()),
        Arc::new(CommandTranscriber::new(
            batch.whisper_bin.clone(),
            batch.whisper_model.clone(),
        )),
    );

    let summary = runner.run().await?;
    println!();
    println!("{}", "=".repeat(50));
    println!(
        "Processed {}/{} files ({} already done, {} failed)",
        summary.completed, summary.total, summary.skipped, summary.failed
    );
    match &batch.bucket {
        Some(_) => println!("Documents: {}", store.object_url(&batch.docs_prefix)),
        None => println!("Documents: {}", batch.docs_root.display()),
    }
    println!("Metadata:  {}", store.object_url(&batch.metadata_prefix));

    if batch.shutdown && summary.completed > 0 {
        power_off(batch.shutdown_delay).await?;
    }
    Ok(())
}
