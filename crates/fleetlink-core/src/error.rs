use thiserror::Error;

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("required tool not found on PATH: {0}")]
    ToolNotFound(String),

    #[error("listener config {path}: {reason}")]
    ListenerConfig { path: String, reason: String },

    #[error("readiness gate holds unexpected value {0:?} (expected \"0\" or \"1\")")]
    InvalidGateValue(String),

    #[error("credential source directory does not exist: {0}")]
    SourceMissing(String),

    #[error("no files ending in '{suffix}' found under {dir}")]
    EmptySnapshot { dir: String, suffix: String },

    #[error("remote command on {host} failed: {message}")]
    Remote { host: String, message: String },

    #[error("transfer to {host} failed: {message}")]
    Transfer { host: String, message: String },

    #[error("volume listing on {host} failed: {message}")]
    VolumeListing { host: String, message: String },

    #[error("home directory not found: set HOME environment variable")]
    HomeNotFound,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Regex(#[from] regex::Error),
}

pub type Result<T> = std::result::Result<T, FleetError>;
