use crate::output::{print_json, print_table};
use crate::settings::{self, FleetOverrides};
use anyhow::Context;
use fleetlink_core::distribute::{CredentialDistributor, DistributionReport, TargetOutcome};
use fleetlink_core::remote::{RemoteTarget, SshShell};
use fleetlink_core::snapshot::CredentialSnapshot;
use fleetlink_core::volumes::VolumeLocator;
use serde::Serialize;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Per-host failures are reported, not raised: the command exits 0 as long
/// as the local preconditions hold (a non-empty snapshot, at least one host).
pub fn run(
    config_path: &Path,
    fleet: &FleetOverrides,
    source_dir: Option<PathBuf>,
    dry_run: bool,
    json: bool,
) -> anyhow::Result<()> {
    let mut config = settings::load(config_path)?;
    fleet.apply(&mut config.distribution);
    if let Some(dir) = source_dir {
        config.distribution.source_dir = dir;
    }
    let d = &config.distribution;

    let snapshot = CredentialSnapshot::collect_non_empty(&d.source_dir, &d.file_suffix)
        .context("nothing to distribute")?;
    if d.hosts.is_empty() {
        anyhow::bail!("no hosts configured; set distribution.hosts, FLEETLINK_HOSTS or --hosts");
    }
    let targets = d.targets();
    let locator = VolumeLocator::new(&d.volume_pattern).context("invalid volume_pattern")?;

    if dry_run {
        let plan = Plan {
            source_dir: &snapshot.root,
            files: &snapshot.files,
            targets: &targets,
            volume_pattern: locator.pattern(),
            helper_image: &d.helper_image,
        };
        return print_plan(&plan, json);
    }

    let identity = d.identity_path()?;
    let shell = SshShell::locate(&identity, d.ssh_port)?;
    tracing::info!(
        files = snapshot.len(),
        hosts = targets.len(),
        identity = %identity.display(),
        "distributing credentials"
    );

    let report = CredentialDistributor::new(&shell, locator, d.helper_image.clone())
        .distribute(&snapshot, &targets);

    if json {
        print_json(&report)?;
    } else {
        print_report(&report);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// dry run
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct Plan<'a> {
    source_dir: &'a Path,
    files: &'a [PathBuf],
    targets: &'a [RemoteTarget],
    volume_pattern: &'a str,
    helper_image: &'a str,
}

fn print_plan(plan: &Plan<'_>, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(plan);
    }

    println!(
        "Would push {} file(s) from {} to {} host(s):",
        plan.files.len(),
        plan.source_dir.display(),
        plan.targets.len()
    );
    println!();
    let rows = plan
        .targets
        .iter()
        .map(|t| vec![t.host.clone(), t.user.clone(), t.staging_dir.clone()])
        .collect();
    print_table(&["HOST", "USER", "STAGING"], rows);
    println!();
    println!("Files:");
    for f in plan.files {
        println!("  {}", f.display());
    }
    println!();
    println!(
        "Volumes matching '{}' on each host are updated via the '{}' image.",
        plan.volume_pattern, plan.helper_image
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// report
// ---------------------------------------------------------------------------

fn print_report(report: &DistributionReport) {
    let rows: Vec<Vec<String>> = report
        .targets
        .iter()
        .map(|t| {
            let (result, note) = match &t.outcome {
                TargetOutcome::Delivered {
                    volumes,
                    cleanup_warning,
                    ..
                } => {
                    let skipped: Vec<&str> = volumes
                        .iter()
                        .filter(|v| !v.updated)
                        .map(|v| v.name.as_str())
                        .collect();
                    let mut notes = Vec::new();
                    if volumes.is_empty() {
                        notes.push("no worker volumes".to_string());
                    }
                    if !skipped.is_empty() {
                        notes.push(format!("skipped: {}", skipped.join(", ")));
                    }
                    if let Some(w) = cleanup_warning {
                        notes.push(format!("cleanup: {w}"));
                    }
                    ("delivered", notes.join("; "))
                }
                TargetOutcome::Failed { stage, error } => {
                    ("failed", format!("{}: {error}", stage.as_str()))
                }
            };
            vec![
                t.host.clone(),
                result.to_string(),
                t.volumes_found().to_string(),
                t.volumes_updated().to_string(),
                note,
            ]
        })
        .collect();

    print_table(&["HOST", "RESULT", "FOUND", "UPDATED", "NOTE"], rows);
    println!();
    let elapsed = report.finished_at - report.started_at;
    println!(
        "{} file(s) to {} of {} host(s) in {:.1}s ({} failed)",
        report.files,
        report.succeeded(),
        report.targets.len(),
        elapsed.num_milliseconds() as f64 / 1000.0,
        report.failed()
    );
}
