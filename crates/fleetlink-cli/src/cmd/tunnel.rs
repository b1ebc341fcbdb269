use crate::settings::{self, TunnelOverrides};
use anyhow::Context;
use clap::Subcommand;
use std::path::Path;
use tunnel_agent::{Credentials, Supervisor};

// ---------------------------------------------------------------------------
// Subcommand definition
// ---------------------------------------------------------------------------

#[derive(Subcommand, Debug)]
pub enum TunnelSubcommand {
    /// Prepare the host, start the tunnel client and supervise it until SIGINT/SIGTERM
    Run {
        #[command(flatten)]
        overrides: TunnelOverrides,

        /// Tunnel login; written to tunnel.credentials_file together with the password
        #[arg(long, env = "FLEETLINK_TUNNEL_USER", hide_env_values = true)]
        tunnel_user: Option<String>,

        /// Tunnel password
        #[arg(long, env = "FLEETLINK_TUNNEL_PASS", hide_env_values = true)]
        tunnel_pass: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

pub fn run(config_path: &Path, subcommand: TunnelSubcommand) -> anyhow::Result<()> {
    match subcommand {
        TunnelSubcommand::Run {
            overrides,
            tunnel_user,
            tunnel_pass,
        } => run_supervisor(config_path, &overrides, tunnel_user, tunnel_pass),
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

fn run_supervisor(
    config_path: &Path,
    overrides: &TunnelOverrides,
    tunnel_user: Option<String>,
    tunnel_pass: Option<String>,
) -> anyhow::Result<()> {
    let mut config = settings::load(config_path)?;
    overrides.apply(&mut config.tunnel);

    if tunnel_user.is_some() != tunnel_pass.is_some() {
        tracing::warn!("only one of the tunnel user/password was given; ignoring both");
    }
    let credentials = Credentials::from_parts(tunnel_user, tunnel_pass);

    tracing::info!(
        port = config.tunnel.port,
        gate = %config.tunnel.gate_file.display(),
        on_exit = config.tunnel.on_exit.as_str(),
        "starting tunnel supervisor"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(Supervisor::new(config.tunnel, credentials).run())
        .context("tunnel supervisor failed")
}
