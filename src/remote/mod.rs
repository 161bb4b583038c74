//! Remote execution channel.
//!
//! The orchestrator talks to an instance only through [`RemoteChannel`]:
//! run a command, copy a file up, start a detached job, or hand the
//! terminal to an interactive shell. [`SshChannel`] implements it with the
//! system `ssh` and `scp` binaries.

pub mod ssh;

use std::path::Path;

use async_trait::async_trait;

use crate::error::RemoteError;

pub use ssh::SshChannel;

/// Captured result of a remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` if the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Short description for log lines.
    pub fn summary(&self) -> String {
        let stderr = self.stderr.trim();
        match (self.code, stderr.is_empty()) {
            (Some(code), true) => format!("exit {}", code),
            (Some(code), false) => format!("exit {}: {}", code, stderr),
            (None, _) => "terminated by signal".to_string(),
        }
    }
}

#[async_trait]
pub trait RemoteChannel: Send + Sync {
    /// Run a command and capture its output. A non-zero exit is not an
    /// error here; `Err` means the command could not be run at all.
    async fn exec(&self, host: &str, command: &str) -> Result<CommandOutput, RemoteError>;

    /// Copy a local file to `remote_path` on the host.
    async fn copy_to(&self, host: &str, local: &Path, remote_path: &str)
    -> Result<(), RemoteError>;

    /// Start `command` inside `workdir`, detached from the session, with
    /// output appended to `log_file`. Returns once the job is started.
    async fn start_detached(
        &self,
        host: &str,
        workdir: &str,
        command: &str,
        log_file: &str,
    ) -> Result<(), RemoteError>;

    /// Attach the local terminal to an interactive shell on the host.
    async fn open_shell(&self, host: &str) -> Result<(), RemoteError>;

    /// The command an operator would type to log in, for narration.
    fn login_hint(&self, host: &str) -> String;
}

/// Quote a string for a POSIX shell.
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+,".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}
