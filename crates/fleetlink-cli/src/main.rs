mod cmd;
mod output;
mod settings;

use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, tunnel::TunnelSubcommand};
use settings::FleetOverrides;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "fleetlink",
    about = "Tunnel readiness supervision and credential fan-out for worker fleets",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file (default: ./fleetlink.yaml)
    #[arg(long, global = true, env = "FLEETLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the VPN tunnel supervisor inside a worker container
    Tunnel {
        #[command(subcommand)]
        subcommand: TunnelSubcommand,
    },

    /// Exit 0 only if the tunnel is connected and its supervisor is alive
    Health {
        /// Readiness gate file (default: tunnel.gate_file)
        #[arg(long, value_name = "PATH")]
        gate_file: Option<PathBuf>,
    },

    /// Push the local credential files into every worker volume on every host
    Distribute {
        #[command(flatten)]
        fleet: FleetOverrides,

        /// Local directory holding the credential files
        #[arg(long, env = "FLEETLINK_SOURCE_DIR", value_name = "DIR")]
        source_dir: Option<PathBuf>,

        /// Print the plan without contacting any host
        #[arg(long)]
        dry_run: bool,
    },

    /// List the worker volumes found on each host
    Volumes {
        #[command(flatten)]
        fleet: FleetOverrides,

        /// Query only this host
        #[arg(long)]
        host: Option<String>,
    },

    /// Inspect and validate the effective configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Tunnel { .. } | Commands::Distribute { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = settings::resolve_config_path(cli.config.as_deref());

    let result = match cli.command {
        Commands::Tunnel { subcommand } => cmd::tunnel::run(&config_path, subcommand),
        Commands::Health { gate_file } => {
            cmd::health::run(&config_path, gate_file.as_deref(), cli.json)
        }
        Commands::Distribute {
            fleet,
            source_dir,
            dry_run,
        } => cmd::distribute::run(&config_path, &fleet, source_dir, dry_run, cli.json),
        Commands::Volumes { fleet, host } => {
            cmd::volumes::run(&config_path, &fleet, host.as_deref(), cli.json)
        }
        Commands::Config { subcommand } => cmd::config::run(&config_path, subcommand, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
