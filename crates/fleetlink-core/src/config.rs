use crate::error::{FleetError, Result};
use crate::remote::RemoteTarget;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "fleetlink.yaml";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// ExitPolicy
// ---------------------------------------------------------------------------

/// What the supervisor does with the readiness gate once the tunnel client
/// process has exited after (or without) connecting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitPolicy {
    /// Rewrite the gate to "0" so health checks fail immediately.
    #[default]
    Clear,
    /// Leave the gate as it was; consumers must check writer liveness.
    Retain,
}

impl ExitPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitPolicy::Clear => "clear",
            ExitPolicy::Retain => "retain",
        }
    }
}

impl std::str::FromStr for ExitPolicy {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "clear" => Ok(ExitPolicy::Clear),
            "retain" => Ok(ExitPolicy::Retain),
            other => Err(FleetError::Config(format!(
                "unknown exit policy '{other}' (expected 'clear' or 'retain')"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// TunnelConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_allow_cidr")]
    pub allow_cidr: String,
    #[serde(default = "default_max_clients")]
    pub max_clients: u32,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u32,
    #[serde(default = "default_listener_config")]
    pub listener_config: PathBuf,
    #[serde(default = "default_client_binary")]
    pub client_binary: String,
    #[serde(default = "default_client_config")]
    pub client_config: PathBuf,
    #[serde(default = "default_credentials_file")]
    pub credentials_file: PathBuf,
    #[serde(default = "default_interface")]
    pub interface: String,
    #[serde(default = "default_gate_file")]
    pub gate_file: PathBuf,
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
    #[serde(default = "default_ready_marker")]
    pub ready_marker: String,
    #[serde(default)]
    pub on_exit: ExitPolicy,
    #[serde(default = "default_true")]
    pub apply_network_rules: bool,
}

fn default_port() -> u16 {
    8888
}

fn default_allow_cidr() -> String {
    "0.0.0.0/0".to_string()
}

fn default_max_clients() -> u32 {
    1000
}

fn default_idle_timeout() -> u32 {
    600
}

fn default_listener_config() -> PathBuf {
    PathBuf::from("/etc/tinyproxy/tinyproxy.conf")
}

fn default_client_binary() -> String {
    "openvpn".to_string()
}

fn default_client_config() -> PathBuf {
    PathBuf::from("/etc/openvpn/client.ovpn")
}

fn default_credentials_file() -> PathBuf {
    PathBuf::from("/etc/openvpn/auth.txt")
}

fn default_interface() -> String {
    "tun0".to_string()
}

fn default_gate_file() -> PathBuf {
    PathBuf::from("/tmp/tunnel_ready")
}

fn default_log_file() -> PathBuf {
    PathBuf::from("/var/log/openvpn.log")
}

fn default_ready_marker() -> String {
    crate::readiness::READY_MARKER.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            allow_cidr: default_allow_cidr(),
            max_clients: default_max_clients(),
            idle_timeout_secs: default_idle_timeout(),
            listener_config: default_listener_config(),
            client_binary: default_client_binary(),
            client_config: default_client_config(),
            credentials_file: default_credentials_file(),
            interface: default_interface(),
            gate_file: default_gate_file(),
            log_file: default_log_file(),
            ready_marker: default_ready_marker(),
            on_exit: ExitPolicy::default(),
            apply_network_rules: default_true(),
        }
    }
}

impl TunnelConfig {
    /// The pid file lives next to the gate: `/tmp/tunnel_ready` -> `/tmp/tunnel_ready.pid`.
    pub fn pid_file(&self) -> PathBuf {
        let mut name = self.gate_file.as_os_str().to_os_string();
        name.push(".pid");
        PathBuf::from(name)
    }
}

// ---------------------------------------------------------------------------
// DistributionConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionConfig {
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_staging_dir")]
    pub staging_dir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<PathBuf>,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,
    #[serde(default = "default_file_suffix")]
    pub file_suffix: String,
    #[serde(default = "default_volume_pattern")]
    pub volume_pattern: String,
    #[serde(default = "default_helper_image")]
    pub helper_image: String,
}

fn default_user() -> String {
    "ubuntu".to_string()
}

fn default_staging_dir() -> String {
    "/tmp/fleetlink-staging".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_source_dir() -> PathBuf {
    PathBuf::from("cookies")
}

fn default_file_suffix() -> String {
    "_cookies.json".to_string()
}

fn default_volume_pattern() -> String {
    crate::volumes::DEFAULT_VOLUME_PATTERN.to_string()
}

fn default_helper_image() -> String {
    "alpine".to_string()
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            user: default_user(),
            staging_dir: default_staging_dir(),
            identity_file: None,
            ssh_port: default_ssh_port(),
            source_dir: default_source_dir(),
            file_suffix: default_file_suffix(),
            volume_pattern: default_volume_pattern(),
            helper_image: default_helper_image(),
        }
    }
}

impl DistributionConfig {
    /// Resolve the SSH identity key. Falls back to `~/.ssh/id_rsa`; a leading
    /// `~/` in a configured path is expanded against the home directory.
    pub fn identity_path(&self) -> Result<PathBuf> {
        match &self.identity_file {
            Some(p) => match p.strip_prefix("~") {
                Ok(rest) => Ok(home::home_dir().ok_or(FleetError::HomeNotFound)?.join(rest)),
                Err(_) => Ok(p.clone()),
            },
            None => Ok(home::home_dir()
                .ok_or(FleetError::HomeNotFound)?
                .join(".ssh/id_rsa")),
        }
    }

    /// One [`RemoteTarget`] per configured host, in configuration order.
    pub fn targets(&self) -> Vec<RemoteTarget> {
        self.hosts
            .iter()
            .map(|host| RemoteTarget {
                host: host.clone(),
                user: self.user.clone(),
                staging_dir: self.staging_dir.clone(),
            })
            .collect()
    }
}

/// Split a comma-separated host list, trimming whitespace around each entry
/// and dropping empty entries. Order is preserved.
pub fn parse_host_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .collect()
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tunnel: TunnelConfig,
    #[serde(default)]
    pub distribution: DistributionConfig,
}

impl Config {
    /// Load config from `path`. A missing file yields all defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let t = &self.tunnel;
        let d = &self.distribution;

        if t.port == 0 {
            warnings.push(error("tunnel.port must be non-zero"));
        }
        if t.ready_marker.trim().is_empty() {
            warnings.push(error("tunnel.ready_marker must not be empty"));
        }
        if t.max_clients == 0 {
            warnings.push(warning("tunnel.max_clients is 0; the listener will refuse every client"));
        }
        if t.allow_cidr.trim().is_empty() {
            warnings.push(error("tunnel.allow_cidr must not be empty"));
        }

        if d.hosts.is_empty() {
            warnings.push(warning("distribution.hosts is empty; distribute has nothing to do"));
        }
        if d.hosts.iter().any(|h| h.trim().is_empty() || h.contains(char::is_whitespace)) {
            warnings.push(error("distribution.hosts contains a blank or whitespace-bearing entry"));
        }
        if !d.staging_dir.starts_with('/') {
            warnings.push(error(&format!(
                "distribution.staging_dir '{}' must be absolute (it is bind-mounted into the helper container)",
                d.staging_dir
            )));
        }
        if d.staging_dir.trim_end_matches('/').is_empty() {
            warnings.push(error("distribution.staging_dir must not be the filesystem root"));
        }
        if d.file_suffix.is_empty() {
            warnings.push(error("distribution.file_suffix must not be empty"));
        }
        if let Err(e) = regex::Regex::new(&d.volume_pattern) {
            warnings.push(error(&format!("distribution.volume_pattern is not a valid regex: {e}")));
        }
        if d.helper_image.trim().is_empty() {
            warnings.push(error("distribution.helper_image must not be empty"));
        }

        warnings
    }
}

fn error(message: &str) -> ConfigWarning {
    ConfigWarning {
        level: WarnLevel::Error,
        message: message.to_string(),
    }
}

fn warning(message: &str) -> ConfigWarning {
    ConfigWarning {
        level: WarnLevel::Warning,
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::load(&dir.path().join("nope.yaml")).unwrap();
        assert_eq!(cfg.tunnel.port, 8888);
        assert_eq!(cfg.tunnel.on_exit, ExitPolicy::Clear);
        assert_eq!(cfg.distribution.user, "ubuntu");
        assert!(cfg.distribution.hosts.is_empty());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fleetlink.yaml");
        std::fs::write(
            &path,
            "tunnel:\n  port: 3128\n  on_exit: retain\ndistribution:\n  hosts: [a, b]\n",
        )
        .unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.tunnel.port, 3128);
        assert_eq!(cfg.tunnel.on_exit, ExitPolicy::Retain);
        assert_eq!(cfg.tunnel.interface, "tun0");
        assert_eq!(cfg.distribution.hosts, vec!["a", "b"]);
        assert_eq!(cfg.distribution.staging_dir, "/tmp/fleetlink-staging");
    }

    #[test]
    fn save_then_load_preserves_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fleetlink.yaml");
        let mut cfg = Config::default();
        cfg.distribution.hosts = vec!["10.0.0.1".into()];
        cfg.tunnel.max_clients = 42;
        cfg.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.distribution.hosts, vec!["10.0.0.1"]);
        assert_eq!(loaded.tunnel.max_clients, 42);
    }

    #[test]
    fn host_list_trims_and_drops_empty() {
        assert_eq!(
            parse_host_list(" 10.0.0.1 ,10.0.0.2,, worker-3 "),
            vec!["10.0.0.1", "10.0.0.2", "worker-3"]
        );
        assert_eq!(parse_host_list("single"), vec!["single"]);
        assert!(parse_host_list("  ,  ").is_empty());
    }

    #[test]
    fn targets_follow_host_order() {
        let mut d = DistributionConfig::default();
        d.hosts = parse_host_list("b, a, c");
        let hosts: Vec<_> = d.targets().into_iter().map(|t| t.host).collect();
        assert_eq!(hosts, vec!["b", "a", "c"]);
    }

    #[test]
    fn identity_path_keeps_absolute_paths() {
        let mut d = DistributionConfig::default();
        d.identity_file = Some(PathBuf::from("/keys/deploy"));
        assert_eq!(d.identity_path().unwrap(), PathBuf::from("/keys/deploy"));
    }

    #[test]
    fn pid_file_sits_next_to_gate() {
        let mut t = TunnelConfig::default();
        t.gate_file = PathBuf::from("/run/fleet/ready");
        assert_eq!(t.pid_file(), PathBuf::from("/run/fleet/ready.pid"));
    }

    #[test]
    fn exit_policy_parses() {
        assert_eq!("clear".parse::<ExitPolicy>().unwrap(), ExitPolicy::Clear);
        assert_eq!("retain".parse::<ExitPolicy>().unwrap(), ExitPolicy::Retain);
        assert!("sometimes".parse::<ExitPolicy>().is_err());
    }

    #[test]
    fn validate_default_only_warns_about_hosts() {
        let warnings = Config::default().validate();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].level, WarnLevel::Warning);
        assert!(warnings[0].message.contains("hosts"));
    }

    #[test]
    fn validate_flags_relative_staging_and_bad_regex() {
        let mut cfg = Config::default();
        cfg.distribution.hosts = vec!["h".into()];
        cfg.distribution.staging_dir = "staging".into();
        cfg.distribution.volume_pattern = "(unclosed".into();
        let warnings = cfg.validate();
        let errors: Vec<_> = warnings
            .iter()
            .filter(|w| w.level == WarnLevel::Error)
            .collect();
        assert_eq!(errors.len(), 2, "got {warnings:?}");
    }
}
