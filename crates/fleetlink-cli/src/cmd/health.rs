use crate::output::print_json;
use crate::settings;
use fleetlink_core::health;
use fleetlink_core::readiness::ReadinessGate;
use std::path::Path;

/// Healthy means the gate reads "1" and the supervisor that wrote it is
/// still running. Anything else exits 1 with the reason.
pub fn run(config_path: &Path, gate_file: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let mut config = settings::load(config_path)?;
    if let Some(gate) = gate_file {
        config.tunnel.gate_file = gate.to_path_buf();
    }

    let gate = ReadinessGate::new(&config.tunnel.gate_file);
    let verdict = health::evaluate(&gate, &config.tunnel.pid_file())?;

    if json {
        print_json(&verdict)?;
    }
    if !verdict.is_healthy() {
        anyhow::bail!("unhealthy: {}", verdict.describe());
    }
    if !json {
        println!("{}", verdict.describe());
    }
    Ok(())
}
