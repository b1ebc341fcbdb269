use fleetlink_core::FleetError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("{binary} not found on PATH; install it or set its path in the tunnel config")]
    NotFound { binary: String },

    #[error(
        "tunnel credentials file {path} does not exist.\n\
         Provide it, or set FLEETLINK_TUNNEL_USER and FLEETLINK_TUNNEL_PASS to have it written."
    )]
    CredentialsMissing { path: String },

    #[error("setup step '{step}' failed: {message}")]
    Setup { step: String, message: String },

    #[error("process error: {0}")]
    Process(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] FleetError),
}
