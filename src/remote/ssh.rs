//! `ssh`/`scp` backed [`RemoteChannel`].

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::RemoteError;
use crate::remote::{CommandOutput, RemoteChannel, shell_quote};

/// Remote channel using the system OpenSSH client.
///
/// Host keys are not checked: every instance is fresh and its key is
/// unknown in advance.
#[derive(Debug, Clone)]
pub struct SshChannel {
    user: String,
    key_path: PathBuf,
    connect_timeout: Duration,
}

impl SshChannel {
    pub fn new(user: impl Into<String>, key_path: impl Into<PathBuf>, connect_timeout: Duration) -> Self {
        Self {
            user: user.into(),
            key_path: key_path.into(),
            connect_timeout,
        }
    }

    fn destination(&self, host: &str) -> String {
        format!("{}@{}", self.user, host)
    }

    /// Options shared by ssh and scp.
    fn common_options(&self, batch: bool) -> Vec<String> {
        let mut args = vec![
            "-i".to_string(),
            self.key_path.display().to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
        ];
        if batch {
            args.push("-o".to_string());
            args.push("BatchMode=yes".to_string());
        }
        args
    }

    pub(crate) fn ssh_args(&self, host: &str, command: &str) -> Vec<String> {
        let mut args = self.common_options(true);
        args.push(self.destination(host));
        args.push(command.to_string());
        args
    }

    pub(crate) fn scp_args(&self, host: &str, local: &Path, remote_path: &str) -> Vec<String> {
        let mut args = self.common_options(true);
        args.push(local.display().to_string());
        args.push(format!("{}:{}", self.destination(host), remote_path));
        args
    }

    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, RemoteError> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| RemoteError::SpawnFailed {
                program: program.to_string(),
                reason: e.to_string(),
            })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Shell snippet that starts `command` in `workdir` detached from the session.
pub(crate) fn detached_command(workdir: &str, command: &str, log_file: &str) -> String {
    format!(
        "cd {} && nohup sh -c {} >> {} 2>&1 < /dev/null &",
        shell_quote(workdir),
        shell_quote(command),
        shell_quote(log_file)
    )
}

#[async_trait]
impl RemoteChannel for SshChannel {
    async fn exec(&self, host: &str, command: &str) -> Result<CommandOutput, RemoteError> {
        tracing::debug!(host, command, "ssh exec");
        self.run("ssh", &self.ssh_args(host, command)).await
    }

    async fn copy_to(
        &self,
        host: &str,
        local: &Path,
        remote_path: &str,
    ) -> Result<(), RemoteError> {
        tracing::debug!(host, local = %local.display(), remote_path, "scp upload");
        let output = self.run("scp", &self.scp_args(host, local, remote_path)).await?;
        if output.success() {
            Ok(())
        } else {
            Err(RemoteError::CopyFailed {
                host: host.to_string(),
                local: local.to_path_buf(),
                remote_path: remote_path.to_string(),
                reason: output.summary(),
            })
        }
    }

    async fn start_detached(
        &self,
        host: &str,
        workdir: &str,
        command: &str,
        log_file: &str,
    ) -> Result<(), RemoteError> {
        let output = self
            .exec(host, &detached_command(workdir, command, log_file))
            .await?;
        if output.success() {
            Ok(())
        } else {
            Err(RemoteError::CommandFailed {
                host: host.to_string(),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }

    async fn open_shell(&self, host: &str) -> Result<(), RemoteError> {
        let mut args = self.common_options(false);
        args.push(self.destination(host));
        let status = Command::new("ssh")
            .args(&args)
            .status()
            .await
            .map_err(|e| RemoteError::SpawnFailed {
                program: "ssh".to_string(),
                reason: e.to_string(),
            })?;
        // 255 is ssh's own failure; anything else is the remote shell's exit.
        if status.code() == Some(255) {
            return Err(RemoteError::CommandFailed {
                host: host.to_string(),
                code: status.code(),
                stderr: "interactive session could not be established".to_string(),
            });
        }
        Ok(())
    }

    fn login_hint(&self, host: &str) -> String {
        format!(
            "ssh -i {} {}",
            self.key_path.display(),
            self.destination(host)
        )
    }
}
