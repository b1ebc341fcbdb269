use anyhow::Context;
use clap::Args;
use fleetlink_core::config::{
    parse_host_list, Config, DistributionConfig, ExitPolicy, TunnelConfig, DEFAULT_CONFIG_FILE,
};
use std::path::{Path, PathBuf};

/// Resolve the config file path.
///
/// Priority:
/// 1. `--config` flag / `FLEETLINK_CONFIG` env var (passed in as `explicit`)
/// 2. `fleetlink.yaml` in the current directory
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    cwd.join(DEFAULT_CONFIG_FILE)
}

pub fn load(path: &Path) -> anyhow::Result<Config> {
    Config::load(path).with_context(|| format!("failed to load config {}", path.display()))
}

// ---------------------------------------------------------------------------
// Overrides (env and flags win over the file)
// ---------------------------------------------------------------------------

#[derive(Args, Debug, Default, Clone)]
pub struct TunnelOverrides {
    /// Forward-proxy listen port
    #[arg(long, env = "FLEETLINK_TUNNEL_PORT")]
    pub port: Option<u16>,

    /// Readiness gate file
    #[arg(long, value_name = "PATH")]
    pub gate_file: Option<PathBuf>,

    /// Gate handling when the tunnel client exits: clear or retain
    #[arg(long, value_name = "POLICY")]
    pub on_exit: Option<ExitPolicy>,

    /// Do not touch sysctl or iptables
    #[arg(long)]
    pub no_network_rules: bool,
}

impl TunnelOverrides {
    pub fn apply(&self, cfg: &mut TunnelConfig) {
        if let Some(port) = self.port {
            cfg.port = port;
        }
        if let Some(gate) = &self.gate_file {
            cfg.gate_file = gate.clone();
        }
        if let Some(policy) = self.on_exit {
            cfg.on_exit = policy;
        }
        if self.no_network_rules {
            cfg.apply_network_rules = false;
        }
    }
}

#[derive(Args, Debug, Default, Clone)]
pub struct FleetOverrides {
    /// Comma-separated target hosts
    #[arg(long, env = "FLEETLINK_HOSTS", value_name = "H1,H2")]
    pub hosts: Option<String>,

    /// Remote login user
    #[arg(long, env = "FLEETLINK_REMOTE_USER")]
    pub user: Option<String>,

    /// Absolute staging directory on each host
    #[arg(long, env = "FLEETLINK_REMOTE_DIR", value_name = "DIR")]
    pub remote_dir: Option<String>,

    /// SSH identity key
    #[arg(long, env = "FLEETLINK_SSH_KEY", value_name = "PATH")]
    pub ssh_key: Option<PathBuf>,
}

impl FleetOverrides {
    pub fn apply(&self, cfg: &mut DistributionConfig) {
        if let Some(raw) = &self.hosts {
            cfg.hosts = parse_host_list(raw);
        }
        if let Some(user) = &self.user {
            cfg.user = user.clone();
        }
        if let Some(dir) = &self.remote_dir {
            cfg.staging_dir = dir.clone();
        }
        if let Some(key) = &self.ssh_key {
            cfg.identity_file = Some(key.clone());
        }
    }
}
