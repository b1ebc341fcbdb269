use std::path::{Path, PathBuf};

use tokio::process::Command;

use crate::{Result, TunnelError};

// ─── NetworkRules ─────────────────────────────────────────────────────────

/// Host-level forwarding and NAT for traffic leaving through the tunnel
/// interface.
///
/// Applying is idempotent: the masquerade rule is checked with `iptables -C`
/// first and only appended when missing, so a restarted supervisor does not
/// stack duplicate rules.
#[derive(Debug, Clone)]
pub struct NetworkRules {
    interface: String,
}

impl NetworkRules {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
        }
    }

    pub fn forwarding_args() -> Vec<String> {
        vec!["-w".into(), "net.ipv4.ip_forward=1".into()]
    }

    /// `iptables` arguments for the masquerade rule with the given action
    /// (`-C` to check, `-A` to append).
    pub fn masquerade_args(&self, action: &str) -> Vec<String> {
        vec![
            "-t".into(),
            "nat".into(),
            action.into(),
            "POSTROUTING".into(),
            "-o".into(),
            self.interface.clone(),
            "-j".into(),
            "MASQUERADE".into(),
        ]
    }

    pub async fn apply(&self) -> Result<()> {
        let sysctl = locate("sysctl")?;
        let iptables = locate("iptables")?;

        run_step("ip_forward", &sysctl, &Self::forwarding_args()).await?;

        let present = Command::new(&iptables)
            .args(self.masquerade_args("-C"))
            .output()
            .await?
            .status
            .success();
        if present {
            tracing::debug!(interface = %self.interface, "masquerade rule already present");
        } else {
            run_step("masquerade", &iptables, &self.masquerade_args("-A")).await?;
        }

        tracing::info!(interface = %self.interface, "forwarding and NAT rules applied");
        Ok(())
    }
}

fn locate(binary: &str) -> Result<PathBuf> {
    which::which(binary).map_err(|_| TunnelError::NotFound {
        binary: binary.to_string(),
    })
}

async fn run_step(step: &str, program: &Path, args: &[String]) -> Result<()> {
    let output = Command::new(program).args(args).output().await?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(TunnelError::Setup {
        step: step.to_string(),
        message: format!(
            "{} exited with {:?}: {}",
            program.display(),
            output.status.code(),
            stderr.trim()
        ),
    })
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masquerade_args_target_interface() {
        let rules = NetworkRules::new("tun0");
        assert_eq!(
            rules.masquerade_args("-A").join(" "),
            "-t nat -A POSTROUTING -o tun0 -j MASQUERADE"
        );
        assert_eq!(rules.masquerade_args("-C")[2], "-C");
    }

    #[test]
    fn forwarding_enables_ipv4() {
        assert_eq!(
            NetworkRules::forwarding_args(),
            vec!["-w".to_string(), "net.ipv4.ip_forward=1".to_string()]
        );
    }

    #[tokio::test]
    async fn failing_step_reports_stderr() {
        let err = run_step(
            "ip_forward",
            &PathBuf::from("sh"),
            &["-c".into(), "echo nope >&2; exit 3".into()],
        )
        .await
        .unwrap_err();
        match err {
            TunnelError::Setup { step, message } => {
                assert_eq!(step, "ip_forward");
                assert!(message.contains("nope"), "got: {message}");
                assert!(message.contains("Some(3)"), "got: {message}");
            }
            other => panic!("expected Setup, got {other:?}"),
        }
    }
}
