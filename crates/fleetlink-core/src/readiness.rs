//! Readiness state derived from the tunnel client's log stream.
//!
//! [`ReadinessGate`] is the durable, file-backed boolean an external health
//! check polls. [`ReadinessTracker`] is the line-at-a-time state machine that
//! decides when the gate flips. The tracker owns the only write path to the
//! gate during normal operation.

use crate::error::{FleetError, Result};
use crate::io::atomic_write;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Line emitted by the tunnel client once the session is fully established.
pub const READY_MARKER: &str = "Initialization Sequence Completed";

// ---------------------------------------------------------------------------
// TunnelState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelState {
    Initializing,
    Connected,
}

impl TunnelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TunnelState::Initializing => "initializing",
            TunnelState::Connected => "connected",
        }
    }
}

// ---------------------------------------------------------------------------
// ReadinessGate
// ---------------------------------------------------------------------------

/// A plain-text file holding exactly `0` or `1`.
///
/// Every write goes through [`atomic_write`], so a concurrent reader sees
/// either the old or the new value, never a torn one.
#[derive(Debug, Clone)]
pub struct ReadinessGate {
    path: PathBuf,
}

impl ReadinessGate {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reset the gate to not-ready. Called once at supervisor start.
    pub fn initialize(&self) -> Result<()> {
        self.write(false)
    }

    pub fn write(&self, ready: bool) -> Result<()> {
        atomic_write(&self.path, if ready { b"1" } else { b"0" })
    }

    /// `Ok(None)` when the file does not exist.
    pub fn read(&self) -> Result<Option<bool>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match raw.trim_end() {
            "1" => Ok(Some(true)),
            "0" => Ok(Some(false)),
            other => Err(FleetError::InvalidGateValue(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// ReadinessTracker
// ---------------------------------------------------------------------------

/// Consumes log lines one at a time and flips the gate on the first marker.
///
/// The state only moves forward: once `Connected`, later marker lines (e.g.
/// after a client-side reconnect) are counted but never rewrite the gate or
/// report a second transition.
#[derive(Debug)]
pub struct ReadinessTracker {
    gate: ReadinessGate,
    marker: String,
    state: TunnelState,
    lines_seen: u64,
    marker_hits: u64,
    connected_at_line: Option<u64>,
}

impl ReadinessTracker {
    pub fn new(gate: ReadinessGate, marker: impl Into<String>) -> Self {
        Self {
            gate,
            marker: marker.into(),
            state: TunnelState::Initializing,
            lines_seen: 0,
            marker_hits: 0,
            connected_at_line: None,
        }
    }

    /// Feed one line. Returns `Some(TunnelState::Connected)` exactly once,
    /// on the line that completes the handshake.
    pub fn observe(&mut self, line: &str) -> Result<Option<TunnelState>> {
        self.lines_seen += 1;
        if !line.contains(self.marker.as_str()) {
            return Ok(None);
        }
        self.marker_hits += 1;
        if self.state == TunnelState::Connected {
            return Ok(None);
        }
        self.gate.write(true)?;
        self.state = TunnelState::Connected;
        self.connected_at_line = Some(self.lines_seen);
        Ok(Some(TunnelState::Connected))
    }

    pub fn state(&self) -> TunnelState {
        self.state
    }

    pub fn gate(&self) -> &ReadinessGate {
        &self.gate
    }

    pub fn lines_seen(&self) -> u64 {
        self.lines_seen
    }

    pub fn marker_hits(&self) -> u64 {
        self.marker_hits
    }

    /// 1-based index of the line that flipped the gate.
    pub fn connected_at_line(&self) -> Option<u64> {
        self.connected_at_line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn gate_in(dir: &TempDir) -> ReadinessGate {
        let gate = ReadinessGate::new(dir.path().join("tunnel_ready"));
        gate.initialize().unwrap();
        gate
    }

    fn gate_text(gate: &ReadinessGate) -> String {
        std::fs::read_to_string(gate.path()).unwrap()
    }

    #[test]
    fn initialize_writes_zero() {
        let dir = TempDir::new().unwrap();
        let gate = gate_in(&dir);
        assert_eq!(gate_text(&gate), "0");
        assert_eq!(gate.read().unwrap(), Some(false));
    }

    #[test]
    fn read_missing_gate_is_none() {
        let dir = TempDir::new().unwrap();
        let gate = ReadinessGate::new(dir.path().join("absent"));
        assert_eq!(gate.read().unwrap(), None);
    }

    #[test]
    fn read_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let gate = ReadinessGate::new(dir.path().join("g"));
        std::fs::write(gate.path(), "yes").unwrap();
        assert!(matches!(gate.read(), Err(FleetError::InvalidGateValue(v)) if v == "yes"));
    }

    #[test]
    fn read_tolerates_trailing_newline() {
        let dir = TempDir::new().unwrap();
        let gate = ReadinessGate::new(dir.path().join("g"));
        std::fs::write(gate.path(), "1\n").unwrap();
        assert_eq!(gate.read().unwrap(), Some(true));
    }

    #[test]
    fn stream_without_marker_stays_not_ready() {
        let dir = TempDir::new().unwrap();
        let mut tracker = ReadinessTracker::new(gate_in(&dir), READY_MARKER);
        for line in ["OpenVPN 2.6 starting", "TCP/UDP: Preserving socket", "Peer Connection Initiated"] {
            assert_eq!(tracker.observe(line).unwrap(), None);
        }
        assert_eq!(tracker.state(), TunnelState::Initializing);
        assert_eq!(gate_text(tracker.gate()), "0");
    }

    #[test]
    fn empty_stream_stays_not_ready() {
        let dir = TempDir::new().unwrap();
        let tracker = ReadinessTracker::new(gate_in(&dir), READY_MARKER);
        assert_eq!(tracker.lines_seen(), 0);
        assert_eq!(gate_text(tracker.gate()), "0");
    }

    #[test]
    fn marker_embedded_in_timestamped_line_connects() {
        let dir = TempDir::new().unwrap();
        let mut tracker = ReadinessTracker::new(gate_in(&dir), READY_MARKER);
        let hit = tracker
            .observe("2024-05-01 12:00:00 Initialization Sequence Completed")
            .unwrap();
        assert_eq!(hit, Some(TunnelState::Connected));
        assert_eq!(gate_text(tracker.gate()), "1");
    }

    #[test]
    fn gate_flips_once_after_line_51_and_stays_set() {
        let dir = TempDir::new().unwrap();
        let mut tracker = ReadinessTracker::new(gate_in(&dir), READY_MARKER);
        let mut transitions = 0;

        for i in 0..50 {
            if tracker.observe(&format!("connecting attempt {i}")).unwrap().is_some() {
                transitions += 1;
            }
            assert_eq!(gate_text(tracker.gate()), "0");
        }

        if tracker.observe(READY_MARKER).unwrap().is_some() {
            transitions += 1;
        }
        assert_eq!(gate_text(tracker.gate()), "1");
        assert_eq!(tracker.connected_at_line(), Some(51));

        for i in 0..10 {
            if tracker.observe(&format!("data channel line {i}")).unwrap().is_some() {
                transitions += 1;
            }
            assert_eq!(gate_text(tracker.gate()), "1");
        }

        assert_eq!(transitions, 1);
        assert_eq!(tracker.lines_seen(), 61);
    }

    #[test]
    fn repeated_marker_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut tracker = ReadinessTracker::new(gate_in(&dir), READY_MARKER);
        assert!(tracker.observe(READY_MARKER).unwrap().is_some());
        let before = std::fs::metadata(tracker.gate().path()).unwrap().modified().unwrap();
        assert!(tracker.observe(READY_MARKER).unwrap().is_none());
        assert!(tracker.observe(READY_MARKER).unwrap().is_none());
        let after = std::fs::metadata(tracker.gate().path()).unwrap().modified().unwrap();

        assert_eq!(tracker.marker_hits(), 3);
        assert_eq!(tracker.connected_at_line(), Some(1));
        assert_eq!(before, after, "duplicate markers must not rewrite the gate");
        assert_eq!(gate_text(tracker.gate()), "1");
    }

    #[test]
    fn marker_match_is_case_sensitive() {
        let dir = TempDir::new().unwrap();
        let mut tracker = ReadinessTracker::new(gate_in(&dir), READY_MARKER);
        assert!(tracker
            .observe("initialization sequence completed")
            .unwrap()
            .is_none());
        assert_eq!(tracker.state(), TunnelState::Initializing);
    }
}
