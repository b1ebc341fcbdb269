use fleetlink_core::readiness::{ReadinessTracker, TunnelState};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

// ─── ScanSummary ──────────────────────────────────────────────────────────

/// What the scanner saw before its input closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSummary {
    pub state: TunnelState,
    pub lines: u64,
    pub marker_hits: u64,
    pub connected_at_line: Option<u64>,
}

// ─── scan ─────────────────────────────────────────────────────────────────

/// Tap the tunnel client's output.
///
/// Every line is appended to `sink` and fed to `tracker`; the first marker
/// line flips the readiness gate. The loop has no timeout and never stops
/// on its own: it ends only when `lines` closes, i.e. when the client's
/// pipes are gone.
///
/// Sink and gate write failures are logged and the scan carries on, since
/// stopping here would also stop draining the client's pipes.
pub async fn scan<W>(
    mut lines: mpsc::Receiver<String>,
    mut sink: W,
    mut tracker: ReadinessTracker,
) -> ScanSummary
where
    W: AsyncWrite + Unpin,
{
    let mut sink_ok = true;

    while let Some(line) = lines.recv().await {
        if sink_ok {
            if let Err(e) = write_line(&mut sink, &line).await {
                tracing::error!(error = %e, "tunnel log sink write failed; lines are no longer persisted");
                sink_ok = false;
            }
        }

        match tracker.observe(&line) {
            Ok(Some(TunnelState::Connected)) => {
                tracing::info!(
                    line = tracker.lines_seen(),
                    gate = %tracker.gate().path().display(),
                    "tunnel connected"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "failed to update readiness gate");
            }
        }
    }

    if sink_ok {
        let _ = sink.flush().await;
    }

    ScanSummary {
        state: tracker.state(),
        lines: tracker.lines_seen(),
        marker_hits: tracker.marker_hits(),
        connected_at_line: tracker.connected_at_line(),
    }
}

async fn write_line<W: AsyncWrite + Unpin>(sink: &mut W, line: &str) -> std::io::Result<()> {
    sink.write_all(line.as_bytes()).await?;
    sink.write_all(b"\n").await?;
    sink.flush().await
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use fleetlink_core::readiness::{ReadinessGate, READY_MARKER};
    use tempfile::TempDir;

    fn tracker(dir: &TempDir) -> ReadinessTracker {
        let gate = ReadinessGate::new(dir.path().join("tunnel_ready"));
        gate.initialize().unwrap();
        ReadinessTracker::new(gate, READY_MARKER)
    }

    async fn feed(lines: Vec<String>) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(lines.len().max(1));
        for l in lines {
            tx.send(l).await.unwrap();
        }
        rx
    }

    fn gate_value(dir: &TempDir) -> String {
        std::fs::read_to_string(dir.path().join("tunnel_ready")).unwrap()
    }

    #[tokio::test]
    async fn empty_stream_leaves_gate_closed() {
        let dir = TempDir::new().unwrap();
        let mut sink = Vec::new();
        let summary = scan(feed(vec![]).await, &mut sink, tracker(&dir)).await;
        assert_eq!(summary.state, TunnelState::Initializing);
        assert_eq!(summary.lines, 0);
        assert_eq!(gate_value(&dir), "0");
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn stream_without_marker_leaves_gate_closed() {
        let dir = TempDir::new().unwrap();
        let lines = (0..20).map(|i| format!("TLS: handshake attempt {i}")).collect();
        let summary = scan(feed(lines).await, tokio::io::sink(), tracker(&dir)).await;
        assert_eq!(summary.state, TunnelState::Initializing);
        assert_eq!(summary.lines, 20);
        assert_eq!(gate_value(&dir), "0");
    }

    #[tokio::test]
    async fn marker_after_fifty_lines_connects_on_line_51() {
        let dir = TempDir::new().unwrap();
        let mut lines: Vec<String> = (0..50).map(|i| format!("connecting {i}")).collect();
        lines.push(format!("Tue May 7 10:00:00 2024 {READY_MARKER}"));
        lines.extend((0..10).map(|i| format!("after {i}")));

        let mut sink = Vec::new();
        let summary = scan(feed(lines).await, &mut sink, tracker(&dir)).await;

        assert_eq!(summary.state, TunnelState::Connected);
        assert_eq!(summary.connected_at_line, Some(51));
        assert_eq!(summary.lines, 61);
        assert_eq!(gate_value(&dir), "1");

        let logged = String::from_utf8(sink).unwrap();
        assert_eq!(logged.lines().count(), 61, "every line must reach the sink");
        assert!(logged.ends_with("after 9\n"));
    }

    #[tokio::test]
    async fn duplicate_markers_count_but_do_not_reconnect() {
        let dir = TempDir::new().unwrap();
        let lines = vec![
            READY_MARKER.to_string(),
            "SIGUSR1[soft,ping-restart] received, process restarting".to_string(),
            READY_MARKER.to_string(),
        ];
        let summary = scan(feed(lines).await, tokio::io::sink(), tracker(&dir)).await;
        assert_eq!(summary.marker_hits, 2);
        assert_eq!(summary.connected_at_line, Some(1));
        assert_eq!(gate_value(&dir), "1");
    }

    #[tokio::test]
    async fn gate_write_failure_does_not_stop_the_scan() {
        let dir = TempDir::new().unwrap();
        // Gate path under a regular file: every write fails.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let gate = ReadinessGate::new(blocker.join("tunnel_ready"));
        let tracker = ReadinessTracker::new(gate, READY_MARKER);

        let lines = vec![READY_MARKER.to_string(), "still logging".to_string()];
        let mut sink = Vec::new();
        let summary = scan(feed(lines).await, &mut sink, tracker).await;

        assert_eq!(summary.state, TunnelState::Initializing);
        assert_eq!(summary.lines, 2);
        assert!(String::from_utf8(sink).unwrap().contains("still logging"));
    }
}
