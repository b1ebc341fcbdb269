//! Best-effort fan-out of a credential snapshot to every worker volume on a
//! list of hosts.
//!
//! Per host, in order:
//!
//! 1. create a fresh run directory under the staging root (`mktemp -d`), plus
//!    any subdirectories the snapshot needs
//! 2. `scp` the snapshot into the run directory
//! 3. discover worker volumes, then copy the run directory into each one
//!    through a throwaway helper container
//! 4. `rm -rf` the run directory
//!
//! Failures are contained at the narrowest scope: a volume copy failure skips
//! that volume, a staging/transfer/discovery failure skips that host, a
//! cleanup failure is only a warning. [`CredentialDistributor::distribute`]
//! never returns early; the outcome of every host is in the report.

use crate::remote::{shell_escape, RemoteShell, RemoteTarget};
use crate::snapshot::CredentialSnapshot;
use crate::volumes::VolumeLocator;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use tracing::{error, info, warn};

/// Mount points inside the helper container.
const STAGING_MOUNT: &str = "/staging";
const VOLUME_MOUNT: &str = "/target";

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Preflight,
    Staging,
    Transfer,
    Discovery,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Preflight => "preflight",
            Stage::Staging => "staging",
            Stage::Transfer => "transfer",
            Stage::Discovery => "discovery",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeResult {
    pub name: String,
    pub updated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TargetOutcome {
    /// Staging and transfer succeeded. Zero volumes is still a delivery.
    Delivered {
        files: usize,
        volumes: Vec<VolumeResult>,
        #[serde(skip_serializing_if = "Option::is_none")]
        cleanup_warning: Option<String>,
    },
    Failed { stage: Stage, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetReport {
    pub host: String,
    #[serde(flatten)]
    pub outcome: TargetOutcome,
}

impl TargetReport {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, TargetOutcome::Delivered { .. })
    }

    pub fn volumes_updated(&self) -> usize {
        match &self.outcome {
            TargetOutcome::Delivered { volumes, .. } => volumes.iter().filter(|v| v.updated).count(),
            TargetOutcome::Failed { .. } => 0,
        }
    }

    pub fn volumes_found(&self) -> usize {
        match &self.outcome {
            TargetOutcome::Delivered { volumes, .. } => volumes.len(),
            TargetOutcome::Failed { .. } => 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DistributionReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub files: usize,
    pub targets: Vec<TargetReport>,
}

impl DistributionReport {
    pub fn succeeded(&self) -> usize {
        self.targets.iter().filter(|t| t.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.targets.len() - self.succeeded()
    }

    pub fn target(&self, host: &str) -> Option<&TargetReport> {
        self.targets.iter().find(|t| t.host == host)
    }
}

// ---------------------------------------------------------------------------
// CredentialDistributor
// ---------------------------------------------------------------------------

pub struct CredentialDistributor<'a, S: RemoteShell + ?Sized> {
    shell: &'a S,
    locator: VolumeLocator,
    helper_image: String,
}

impl<'a, S: RemoteShell + ?Sized> CredentialDistributor<'a, S> {
    pub fn new(shell: &'a S, locator: VolumeLocator, helper_image: impl Into<String>) -> Self {
        Self {
            shell,
            locator,
            helper_image: helper_image.into(),
        }
    }

    /// Push `snapshot` to every target, strictly in the given order.
    pub fn distribute(
        &self,
        snapshot: &CredentialSnapshot,
        targets: &[RemoteTarget],
    ) -> DistributionReport {
        let started_at = Utc::now();
        let mut reports = Vec::with_capacity(targets.len());

        for target in targets {
            let outcome = self.distribute_to(snapshot, target);
            match &outcome {
                TargetOutcome::Delivered { volumes, .. } => info!(
                    host = %target.host,
                    found = volumes.len(),
                    updated = volumes.iter().filter(|v| v.updated).count(),
                    "target done"
                ),
                TargetOutcome::Failed { stage, error } => error!(
                    host = %target.host,
                    stage = stage.as_str(),
                    %error,
                    "target failed"
                ),
            }
            reports.push(TargetReport {
                host: target.host.clone(),
                outcome,
            });
        }

        DistributionReport {
            started_at,
            finished_at: Utc::now(),
            files: snapshot.len(),
            targets: reports,
        }
    }

    fn distribute_to(&self, snapshot: &CredentialSnapshot, target: &RemoteTarget) -> TargetOutcome {
        let staging = target.staging_dir.trim_end_matches('/');
        if staging.is_empty() || !staging.starts_with('/') {
            return failed(
                Stage::Preflight,
                format!("staging directory '{}' must be an absolute, non-root path", target.staging_dir),
            );
        }

        // 1. fresh run directory under staging; leftovers of earlier runs are never reused
        let run_dir = match self.make_run_dir(target, staging) {
            Ok(dir) => dir,
            Err(e) => return failed(Stage::Staging, e),
        };
        let groups = snapshot.by_directory();
        if groups.keys().any(|rel| !rel.as_os_str().is_empty()) {
            let mkdir = mkdir_command(&run_dir, groups.keys().map(|p| p.as_path()));
            if let Err(e) = self.run(target, &mkdir) {
                return failed(Stage::Staging, e);
            }
        }

        // 2. transfer
        for (rel, files) in &groups {
            let remote_dir = join_remote(&run_dir, rel);
            match self.shell.upload(target, files, &remote_dir) {
                Ok(out) if out.success() => {}
                Ok(out) => return failed(Stage::Transfer, out.failure_reason()),
                Err(e) => return failed(Stage::Transfer, e.to_string()),
            }
        }
        info!(host = %target.host, files = snapshot.len(), run_dir = %run_dir, "snapshot staged");

        // 3. discover and copy
        let names = match self.locator.discover(self.shell, target) {
            Ok(names) => names,
            Err(e) => {
                // The host is reachable: remove the staged snapshot.
                self.cleanup(target, &run_dir);
                return failed(Stage::Discovery, e.to_string());
            }
        };
        if names.is_empty() {
            warn!(host = %target.host, pattern = self.locator.pattern(), "no worker volumes found");
        }
        let volumes = names
            .into_iter()
            .map(|name| self.copy_into_volume(target, &run_dir, name))
            .collect();

        // 4. cleanup
        let cleanup_warning = self.cleanup(target, &run_dir);

        TargetOutcome::Delivered {
            files: snapshot.len(),
            volumes,
            cleanup_warning,
        }
    }

    /// Create `<staging>/run.XXXXXX` on the host and return its path.
    fn make_run_dir(&self, target: &RemoteTarget, staging: &str) -> std::result::Result<String, String> {
        let out = self
            .shell
            .exec(target, &run_dir_command(staging))
            .map_err(|e| e.to_string())?;
        if !out.success() {
            return Err(out.failure_reason());
        }
        let dir = out.stdout.trim();
        if !is_run_dir(staging, dir) {
            return Err(format!("mktemp returned unexpected path '{dir}'"));
        }
        Ok(dir.to_string())
    }

    /// Remove the run directory. Failure is returned as a warning message.
    fn cleanup(&self, target: &RemoteTarget, run_dir: &str) -> Option<String> {
        match self.run(target, &format!("rm -rf {}", shell_escape(run_dir))) {
            Ok(()) => None,
            Err(e) => {
                warn!(host = %target.host, run_dir, error = %e, "staging cleanup failed");
                Some(e)
            }
        }
    }

    fn copy_into_volume(&self, target: &RemoteTarget, staging: &str, name: String) -> VolumeResult {
        let command = copy_command(&self.helper_image, staging, &name);
        match self.run(target, &command) {
            Ok(()) => {
                info!(host = %target.host, volume = %name, "volume updated");
                VolumeResult {
                    name,
                    updated: true,
                    error: None,
                }
            }
            Err(e) => {
                warn!(host = %target.host, volume = %name, error = %e, "volume copy failed, skipping");
                VolumeResult {
                    name,
                    updated: false,
                    error: Some(e),
                }
            }
        }
    }

    /// Run a command and flatten every failure mode into a message.
    fn run(&self, target: &RemoteTarget, command: &str) -> std::result::Result<(), String> {
        match self.shell.exec(target, command) {
            Ok(out) if out.success() => Ok(()),
            Ok(out) => Err(out.failure_reason()),
            Err(e) => Err(e.to_string()),
        }
    }
}

fn failed(stage: Stage, error: impl Into<String>) -> TargetOutcome {
    TargetOutcome::Failed {
        stage,
        error: error.into(),
    }
}

/// Template for the per-run directory created under the staging root.
const RUN_DIR_TEMPLATE: &str = "run.XXXXXX";

/// `mkdir -p` the staging root, then `mktemp -d` a run directory inside it.
/// The new path is printed on stdout.
pub fn run_dir_command(staging: &str) -> String {
    format!(
        "mkdir -p {} && mktemp -d {}",
        shell_escape(staging),
        shell_escape(&format!("{staging}/{RUN_DIR_TEMPLATE}"))
    )
}

/// A direct child of `staging` named like the run template.
fn is_run_dir(staging: &str, dir: &str) -> bool {
    dir.strip_prefix(staging)
        .and_then(|rest| rest.strip_prefix("/run."))
        .is_some_and(|suffix| !suffix.is_empty() && !suffix.contains('/'))
}

fn join_remote(staging: &str, rel: &Path) -> String {
    if rel.as_os_str().is_empty() {
        staging.to_string()
    } else {
        format!("{staging}/{}", rel.to_string_lossy())
    }
}

/// `mkdir -p` for a run directory plus every subdirectory the snapshot uses.
pub fn mkdir_command<'p>(staging: &str, rels: impl Iterator<Item = &'p Path>) -> String {
    let mut dirs = vec![shell_escape(staging)];
    for rel in rels {
        if !rel.as_os_str().is_empty() {
            dirs.push(shell_escape(&join_remote(staging, rel)));
        }
    }
    format!("mkdir -p {}", dirs.join(" "))
}

/// Copy staging into a volume from inside a network-less helper container,
/// so the host needs nothing but the container runtime. `cp` overwrites, so
/// repeated runs converge on the same contents.
pub fn copy_command(image: &str, staging: &str, volume: &str) -> String {
    format!(
        "docker run --rm --network none -v {}:{STAGING_MOUNT}:ro -v {}:{VOLUME_MOUNT} {} sh -c {}",
        shell_escape(staging),
        shell_escape(volume),
        shell_escape(image),
        shell_escape(&format!("cp -R {STAGING_MOUNT}/. {VOLUME_MOUNT}/")),
    )
}
