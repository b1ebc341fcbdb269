use crate::error::{FleetError, Result};
use crate::io::atomic_write;
use crate::readiness::ReadinessGate;
use serde::Serialize;
use std::path::Path;

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

/// Verdict of the health check. Only [`Health::Ready`] is healthy: a gate
/// reading "1" with no live writer is treated the same as not ready.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Health {
    Ready { pid: u32 },
    NotReady,
    GateMissing,
    InvalidGate { value: String },
    WriterMissing,
    WriterDead { pid: u32 },
}

impl Health {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Health::Ready { .. })
    }

    pub fn describe(&self) -> String {
        match self {
            Health::Ready { pid } => format!("ready (supervisor pid {pid})"),
            Health::NotReady => "tunnel not connected yet".to_string(),
            Health::GateMissing => "readiness gate file does not exist".to_string(),
            Health::InvalidGate { value } => format!("readiness gate holds {value:?}"),
            Health::WriterMissing => "no supervisor pid file".to_string(),
            Health::WriterDead { pid } => format!("supervisor pid {pid} is not running"),
        }
    }
}

/// Combine the gate value with supervisor liveness.
pub fn evaluate(gate: &ReadinessGate, pid_file: &Path) -> Result<Health> {
    let ready = match gate.read() {
        Ok(Some(v)) => v,
        Ok(None) => return Ok(Health::GateMissing),
        Err(FleetError::InvalidGateValue(value)) => return Ok(Health::InvalidGate { value }),
        Err(e) => return Err(e),
    };

    let pid = match read_pid(pid_file)? {
        Some(pid) => pid,
        None => return Ok(Health::WriterMissing),
    };
    if !is_pid_alive(pid) {
        return Ok(Health::WriterDead { pid });
    }

    if ready {
        Ok(Health::Ready { pid })
    } else {
        Ok(Health::NotReady)
    }
}

// ---------------------------------------------------------------------------
// PID helpers (Unix only)
// ---------------------------------------------------------------------------

pub fn write_pid(path: &Path, pid: u32) -> Result<()> {
    atomic_write(path, pid.to_string().as_bytes())
}

/// `Ok(None)` when the file is missing or does not hold a number.
pub fn read_pid(path: &Path) -> Result<Option<u32>> {
    match std::fs::read_to_string(path) {
        Ok(s) => Ok(s.trim().parse().ok()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Returns true if the process is still alive (`kill -0 {pid}`).
pub fn is_pid_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        std::process::Command::new("kill")
            .args(["-0", &pid.to_string()])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        gate: ReadinessGate,
        pid_file: std::path::PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let gate = ReadinessGate::new(dir.path().join("tunnel_ready"));
        let pid_file = dir.path().join("tunnel_ready.pid");
        Fixture {
            _dir: dir,
            gate,
            pid_file,
        }
    }

    #[test]
    fn ready_with_live_writer_is_healthy() {
        let f = fixture();
        f.gate.write(true).unwrap();
        write_pid(&f.pid_file, std::process::id()).unwrap();
        let h = evaluate(&f.gate, &f.pid_file).unwrap();
        assert_eq!(h, Health::Ready { pid: std::process::id() });
        assert!(h.is_healthy());
    }

    #[test]
    fn zero_gate_is_not_ready() {
        let f = fixture();
        f.gate.initialize().unwrap();
        write_pid(&f.pid_file, std::process::id()).unwrap();
        assert_eq!(evaluate(&f.gate, &f.pid_file).unwrap(), Health::NotReady);
    }

    #[test]
    fn stale_one_without_writer_is_unhealthy() {
        let f = fixture();
        f.gate.write(true).unwrap();
        let h = evaluate(&f.gate, &f.pid_file).unwrap();
        assert_eq!(h, Health::WriterMissing);
        assert!(!h.is_healthy());
    }

    #[cfg(unix)]
    #[test]
    fn stale_one_with_dead_writer_is_unhealthy() {
        let f = fixture();
        f.gate.write(true).unwrap();
        // Reap a short-lived child so its pid is known to be gone.
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        write_pid(&f.pid_file, pid).unwrap();
        assert_eq!(
            evaluate(&f.gate, &f.pid_file).unwrap(),
            Health::WriterDead { pid }
        );
    }

    #[test]
    fn missing_gate_is_reported() {
        let f = fixture();
        assert_eq!(evaluate(&f.gate, &f.pid_file).unwrap(), Health::GateMissing);
    }

    #[test]
    fn garbage_gate_is_reported() {
        let f = fixture();
        std::fs::write(f.gate.path(), "ready").unwrap();
        assert_eq!(
            evaluate(&f.gate, &f.pid_file).unwrap(),
            Health::InvalidGate {
                value: "ready".into()
            }
        );
    }

    #[test]
    fn unparseable_pid_reads_as_none() {
        let f = fixture();
        std::fs::write(&f.pid_file, "abc").unwrap();
        assert_eq!(read_pid(&f.pid_file).unwrap(), None);
    }
}
