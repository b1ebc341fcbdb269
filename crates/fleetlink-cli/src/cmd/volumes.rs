use crate::output::{print_json, print_table};
use crate::settings::{self, FleetOverrides};
use anyhow::Context;
use fleetlink_core::remote::{RemoteTarget, SshShell};
use fleetlink_core::volumes::VolumeLocator;
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
struct HostVolumes {
    host: String,
    volumes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub fn run(
    config_path: &Path,
    fleet: &FleetOverrides,
    host: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let mut config = settings::load(config_path)?;
    fleet.apply(&mut config.distribution);
    let d = &config.distribution;

    let targets: Vec<RemoteTarget> = match host {
        Some(h) => vec![RemoteTarget {
            host: h.to_string(),
            user: d.user.clone(),
            staging_dir: d.staging_dir.clone(),
        }],
        None => d.targets(),
    };
    if targets.is_empty() {
        anyhow::bail!("no hosts configured; pass --host or set FLEETLINK_HOSTS");
    }

    let locator = VolumeLocator::new(&d.volume_pattern).context("invalid volume_pattern")?;
    let shell = SshShell::locate(d.identity_path()?, d.ssh_port)?;

    let results: Vec<HostVolumes> = targets
        .iter()
        .map(|t| match locator.discover(&shell, t) {
            Ok(volumes) => HostVolumes {
                host: t.host.clone(),
                volumes,
                error: None,
            },
            Err(e) => {
                tracing::warn!(host = %t.host, error = %e, "volume listing failed");
                HostVolumes {
                    host: t.host.clone(),
                    volumes: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        })
        .collect();

    if json {
        print_json(&results)?;
    } else {
        let rows = results
            .iter()
            .map(|r| {
                let listed = match &r.error {
                    Some(e) => format!("error: {e}"),
                    None if r.volumes.is_empty() => "(none)".to_string(),
                    None => r.volumes.join(", "),
                };
                vec![r.host.clone(), listed]
            })
            .collect();
        print_table(&["HOST", "VOLUMES"], rows);
    }

    let failed = results.iter().filter(|r| r.error.is_some()).count();
    if failed > 0 {
        anyhow::bail!("volume listing failed on {failed} of {} host(s)", results.len());
    }
    Ok(())
}
