use crate::output::print_json;
use crate::settings::{self, FleetOverrides, TunnelOverrides};
use clap::Subcommand;
use fleetlink_core::config::{Config, WarnLevel};
use std::path::Path;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Print the effective config (file, then env, then flags)
    Show {
        #[command(flatten)]
        tunnel: TunnelOverrides,
        #[command(flatten)]
        fleet: FleetOverrides,
    },

    /// Validate the config for common mistakes
    Validate,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(config_path: &Path, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Show { tunnel, fleet } => {
            let mut config = settings::load(config_path)?;
            tunnel.apply(&mut config.tunnel);
            fleet.apply(&mut config.distribution);
            show(&config, json)
        }
        ConfigSubcommand::Validate => validate(config_path, json),
    }
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

fn show(config: &Config, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(config);
    }
    print!("{}", serde_yaml::to_string(config)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

fn validate(config_path: &Path, json: bool) -> anyhow::Result<()> {
    let config = settings::load(config_path)?;
    let warnings = config.validate();

    if json {
        let value = serde_json::json!({
            "path": config_path,
            "warnings": warnings,
        });
        print_json(&value)?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}
