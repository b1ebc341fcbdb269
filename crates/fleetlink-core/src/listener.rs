//! Rewrites the tunnel listener's static `Directive value` config file for the
//! runtime port and access policy, and hardens its stability settings.

use crate::config::TunnelConfig;
use crate::error::{FleetError, Result};
use crate::io::atomic_write;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerSettings {
    pub port: u16,
    pub allow_cidr: String,
    pub max_clients: u32,
    pub idle_timeout_secs: u32,
}

impl From<&TunnelConfig> for ListenerSettings {
    fn from(cfg: &TunnelConfig) -> Self {
        Self {
            port: cfg.port,
            allow_cidr: cfg.allow_cidr.clone(),
            max_clients: cfg.max_clients,
            idle_timeout_secs: cfg.idle_timeout_secs,
        }
    }
}

impl ListenerSettings {
    /// Directives in the order they are applied.
    pub fn directives(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Port", self.port.to_string()),
            ("Allow", self.allow_cidr.clone()),
            ("DisableViaHeader", "Yes".to_string()),
            ("MaxClients", self.max_clients.to_string()),
            ("Timeout", self.idle_timeout_secs.to_string()),
        ]
    }
}

/// Rewrite the config file at `path` in place. A missing file is fatal: the
/// listener ships with one and we never synthesize it from scratch.
pub fn rewrite_file(path: &Path, settings: &ListenerSettings) -> Result<()> {
    if !path.exists() {
        return Err(FleetError::ListenerConfig {
            path: path.display().to_string(),
            reason: "file does not exist".into(),
        });
    }
    let existing = std::fs::read_to_string(path).map_err(|e| FleetError::ListenerConfig {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let updated = apply_directives(&existing, &settings.directives());
    if updated != existing {
        atomic_write(path, updated.as_bytes())?;
        tracing::info!(path = %path.display(), port = settings.port, "listener config rewritten");
    } else {
        tracing::debug!(path = %path.display(), "listener config already up to date");
    }
    Ok(())
}

/// Set each directive to its value.
///
/// The first active or commented-out occurrence (`Key ...` / `#Key ...`) is
/// replaced in place; further active occurrences are dropped so the key ends
/// up with exactly one value. Keys not present at all are appended.
pub fn apply_directives(existing: &str, directives: &[(&str, String)]) -> String {
    let mut lines: Vec<String> = existing.lines().map(|l| l.to_string()).collect();

    for (key, value) in directives {
        let wanted = format!("{key} {value}");

        let first = lines
            .iter()
            .position(|l| is_active(l, key))
            .or_else(|| lines.iter().position(|l| is_commented(l, key)));

        match first {
            Some(idx) => {
                lines[idx] = wanted;
                let mut i = 0;
                lines.retain(|l| {
                    let keep = i == idx || !is_active(l, key);
                    i += 1;
                    keep
                });
            }
            None => lines.push(wanted),
        }
    }

    let mut result = lines.join("\n");
    if !result.is_empty() && !result.ends_with('\n') {
        result.push('\n');
    }
    result
}

fn first_word(line: &str) -> Option<&str> {
    line.split_whitespace().next()
}

fn is_active(line: &str, key: &str) -> bool {
    first_word(line) == Some(key)
}

fn is_commented(line: &str, key: &str) -> bool {
    let t = line.trim_start();
    match t.strip_prefix('#') {
        Some(rest) => first_word(rest) == Some(key),
        None => false,
    }
}
