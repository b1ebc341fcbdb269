//! Remote execution over SSH.
//!
//! [`RemoteShell`] is the seam the distributor talks through. [`SshShell`]
//! is the production implementation: it shells out to the system `ssh` and
//! `scp` with a fixed identity key and batch mode, so a host that wants a
//! password fails fast instead of prompting.

use crate::error::{FleetError, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Exit status `ssh` and `scp` use for connection-level failures.
pub const SSH_TRANSPORT_FAILURE: i32 = 255;

// ---------------------------------------------------------------------------
// RemoteTarget
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteTarget {
    pub host: String,
    pub user: String,
    /// Absolute path on the host where a snapshot is staged before it is
    /// copied into volumes.
    pub staging_dir: String,
}

impl RemoteTarget {
    pub fn user_at_host(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

// ---------------------------------------------------------------------------
// CommandOutput
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// True when the transport itself failed (host unreachable, auth refused).
    pub fn is_transport_failure(&self) -> bool {
        self.status == Some(SSH_TRANSPORT_FAILURE)
    }

    /// Short human-readable reason for a failed command.
    pub fn failure_reason(&self) -> String {
        let stderr = self.stderr.trim();
        let code = match self.status {
            Some(c) => format!("exit code {c}"),
            None => "terminated by signal".to_string(),
        };
        if stderr.is_empty() {
            code
        } else {
            let hint: String = stderr.chars().take(500).collect();
            format!("{code}: {hint}")
        }
    }
}

impl From<std::process::Output> for CommandOutput {
    fn from(out: std::process::Output) -> Self {
        Self {
            status: out.status.code(),
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        }
    }
}

// ---------------------------------------------------------------------------
// RemoteShell
// ---------------------------------------------------------------------------

pub trait RemoteShell {
    /// Run `command` through the target's login shell.
    ///
    /// `Err` means the local client could not be started at all. A command
    /// that ran and failed (including transport failures) is `Ok` with a
    /// non-zero status.
    fn exec(&self, target: &RemoteTarget, command: &str) -> Result<CommandOutput>;

    /// Copy local `files` into `remote_dir` on the target, overwriting
    /// existing files of the same name.
    fn upload(&self, target: &RemoteTarget, files: &[PathBuf], remote_dir: &str)
        -> Result<CommandOutput>;
}

// ---------------------------------------------------------------------------
// SshShell
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SshShell {
    ssh: PathBuf,
    scp: PathBuf,
    identity: PathBuf,
    port: u16,
}

impl SshShell {
    /// Resolve `ssh` and `scp` on PATH.
    pub fn locate(identity: impl Into<PathBuf>, port: u16) -> Result<Self> {
        let ssh = which::which("ssh").map_err(|_| FleetError::ToolNotFound("ssh".into()))?;
        let scp = which::which("scp").map_err(|_| FleetError::ToolNotFound("scp".into()))?;
        Ok(Self {
            ssh,
            scp,
            identity: identity.into(),
            port,
        })
    }

    pub fn identity(&self) -> &Path {
        &self.identity
    }

    fn common_options(&self) -> Vec<String> {
        vec![
            "-i".to_string(),
            self.identity.display().to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
        ]
    }

    /// Argument vector for `ssh` (program not included).
    pub fn ssh_args(&self, target: &RemoteTarget, command: &str) -> Vec<String> {
        let mut args = self.common_options();
        args.push("-p".to_string());
        args.push(self.port.to_string());
        args.push(target.user_at_host());
        // One argument, so the remote shell handles globs and pipes.
        args.push(command.to_string());
        args
    }

    /// Argument vector for `scp` (program not included).
    pub fn scp_args(&self, target: &RemoteTarget, files: &[PathBuf], remote_dir: &str) -> Vec<String> {
        let mut args = self.common_options();
        args.push("-P".to_string());
        args.push(self.port.to_string());
        args.push("-p".to_string());
        args.extend(files.iter().map(|f| f.display().to_string()));
        args.push(format!(
            "{}:{}/",
            target.user_at_host(),
            remote_dir.trim_end_matches('/')
        ));
        args
    }
}

impl RemoteShell for SshShell {
    fn exec(&self, target: &RemoteTarget, command: &str) -> Result<CommandOutput> {
        tracing::debug!(host = %target.host, command, "ssh");
        let output = Command::new(&self.ssh)
            .args(self.ssh_args(target, command))
            .stdin(Stdio::null())
            .output()?;
        Ok(output.into())
    }

    fn upload(
        &self,
        target: &RemoteTarget,
        files: &[PathBuf],
        remote_dir: &str,
    ) -> Result<CommandOutput> {
        tracing::debug!(host = %target.host, count = files.len(), remote_dir, "scp");
        let output = Command::new(&self.scp)
            .args(self.scp_args(target, files, remote_dir))
            .stdin(Stdio::null())
            .output()?;
        Ok(output.into())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Quote `s` for a POSIX shell. Plain words pass through unchanged.
pub fn shell_escape(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    if s.chars().all(|c| {
        c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | '%' | ':' | '=' | '@' | '+' | ',')
    }) {
        return s.to_string();
    }
    let escaped = s.replace('\'', "'\\''");
    format!("'{}'", escaped)
}
