use crate::error::{FleetError, Result};
use crate::remote::{RemoteShell, RemoteTarget};
use regex::Regex;

/// Worker storage volumes are named `cookies-volume`, optionally prefixed by
/// a numeric worker-group id (`3_cookies-volume`).
pub const DEFAULT_VOLUME_PATTERN: &str = "([0-9]+_)?cookies-volume";

/// Lists volume names, one per line.
pub const LIST_VOLUMES_COMMAND: &str = "docker volume ls --format '{{.Name}}'";

/// Finds worker storage volumes on a remote host by name.
///
/// Matching is an unanchored, case-sensitive regex search. Results keep the
/// order the container runtime printed them in; callers that need a stable
/// order must sort.
#[derive(Debug, Clone)]
pub struct VolumeLocator {
    pattern: Regex,
}

impl VolumeLocator {
    pub fn new(pattern: &str) -> Result<Self> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// Enumerate matching volumes on `target`. An empty vector means the host
    /// answered but has no worker volumes; any failure to list is an error.
    pub fn discover<S: RemoteShell + ?Sized>(
        &self,
        shell: &S,
        target: &RemoteTarget,
    ) -> Result<Vec<String>> {
        let out = shell.exec(target, LIST_VOLUMES_COMMAND)?;
        if out.is_transport_failure() {
            return Err(FleetError::Remote {
                host: target.host.clone(),
                message: format!("unreachable: {}", out.failure_reason()),
            });
        }
        if !out.success() {
            return Err(FleetError::VolumeListing {
                host: target.host.clone(),
                message: out.failure_reason(),
            });
        }
        Ok(self.filter(&out.stdout))
    }

    /// Keep the lines of `listing` that match the pattern.
    pub fn filter(&self, listing: &str) -> Vec<String> {
        listing
            .lines()
            .map(str::trim)
            .filter(|name| !name.is_empty() && self.pattern.is_match(name))
            .map(str::to_string)
            .collect()
    }
}
