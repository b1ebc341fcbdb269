use std::ffi::OsStr;
use std::future::Future;
use std::path::{Path, PathBuf};

use fleetlink_core::config::{ExitPolicy, TunnelConfig};
use fleetlink_core::health;
use fleetlink_core::listener::{self, ListenerSettings};
use fleetlink_core::readiness::{ReadinessGate, ReadinessTracker, TunnelState};
use tokio::process::Child;
use tokio::task::JoinHandle;

use crate::credentials::{self, Credentials};
use crate::network::NetworkRules;
use crate::process::{ClientCommand, ClientProcess};
use crate::scanner::{scan, ScanSummary};
use crate::{Result, TunnelError};

// ─── Supervisor ───────────────────────────────────────────────────────────

/// Owns the tunnel client for the lifetime of the worker process.
///
/// [`setup`](Self::setup) is all-or-nothing: any failure there is fatal and
/// nothing has been exposed yet (the gate is not touched until
/// [`launch`](Self::launch)). After launch the supervisor is the sole writer
/// of the readiness gate.
pub struct Supervisor {
    cfg: TunnelConfig,
    credentials: Option<Credentials>,
    client: Option<ClientCommand>,
}

impl Supervisor {
    pub fn new(cfg: TunnelConfig, credentials: Option<Credentials>) -> Self {
        Self {
            cfg,
            credentials,
            client: None,
        }
    }

    /// Replace the tunnel client invocation (the default is
    /// `<client_binary> --config <client_config> --auth-user-pass <credentials_file>`).
    pub fn with_client(mut self, client: ClientCommand) -> Self {
        self.client = Some(client);
        self
    }

    pub fn config(&self) -> &TunnelConfig {
        &self.cfg
    }

    fn client_command(&self) -> Result<ClientCommand> {
        if let Some(c) = &self.client {
            return Ok(c.clone());
        }
        let binary = which::which(&self.cfg.client_binary).map_err(|_| TunnelError::NotFound {
            binary: self.cfg.client_binary.clone(),
        })?;
        Ok(ClientCommand::new(
            binary,
            [
                OsStr::new("--config"),
                self.cfg.client_config.as_os_str(),
                OsStr::new("--auth-user-pass"),
                self.cfg.credentials_file.as_os_str(),
            ],
        ))
    }

    /// Fail-fast preparation: client binary, credential file, listener
    /// config rewrite, host network rules.
    pub async fn setup(&self) -> Result<()> {
        self.client_command()?;
        if self.client.is_none() && !self.cfg.client_config.is_file() {
            return Err(TunnelError::Setup {
                step: "client_config".into(),
                message: format!("{} does not exist", self.cfg.client_config.display()),
            });
        }

        credentials::ensure_file(&self.cfg.credentials_file, self.credentials.as_ref())?;
        listener::rewrite_file(&self.cfg.listener_config, &ListenerSettings::from(&self.cfg))?;

        if self.cfg.apply_network_rules {
            NetworkRules::new(&self.cfg.interface).apply().await?;
        } else {
            tracing::info!("skipping host network rules (disabled in config)");
        }
        Ok(())
    }

    /// Reset the gate, record our pid, start the client and attach the
    /// readiness scanner.
    pub async fn launch(&self) -> Result<TunnelHandle> {
        let gate = ReadinessGate::new(&self.cfg.gate_file);
        gate.initialize()?;
        let pid_file = self.cfg.pid_file();
        health::write_pid(&pid_file, std::process::id())?;

        let sink = open_log_sink(&self.cfg.log_file).await?;
        let client = self.client_command()?;
        let ClientProcess { child, lines } = ClientProcess::spawn(&client)?;
        tracing::info!(
            client = %client.program.to_string_lossy(),
            pid = ?child.id(),
            log = %self.cfg.log_file.display(),
            "tunnel client started"
        );

        let tracker = ReadinessTracker::new(gate.clone(), self.cfg.ready_marker.clone());
        let scanner = tokio::spawn(scan(lines, sink, tracker));

        Ok(TunnelHandle {
            child,
            scanner,
            gate,
            pid_file,
            policy: self.cfg.on_exit,
        })
    }

    /// Setup, launch, then stay up until SIGINT/SIGTERM.
    ///
    /// If the tunnel client dies first, the exit policy is applied to the
    /// gate and the supervisor keeps running; the tunnel is not restarted.
    pub async fn run(self) -> Result<()> {
        self.run_until(shutdown_signal).await
    }

    /// [`run`](Self::run) with a caller-supplied shutdown trigger. `shutdown`
    /// is called once while the client runs and again after it has exited.
    pub async fn run_until<F, Fut>(self, shutdown: F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = ()>,
    {
        self.setup().await?;
        let mut handle = self.launch().await?;

        let exited = tokio::select! {
            _ = shutdown() => None,
            exit = handle.wait() => Some(exit),
        };

        match exited {
            None => {
                tracing::info!("shutdown requested, stopping tunnel client");
                handle.stop().await;
                return Ok(());
            }
            Some(Ok(exit)) => {
                tracing::error!(
                    status = ?exit.status,
                    connected = exit.summary.state == TunnelState::Connected,
                    lines = exit.summary.lines,
                    gate_cleared = exit.gate_cleared,
                    "tunnel client exited; restart the container to reconnect"
                );
            }
            Some(Err(e)) => {
                tracing::error!(
                    error = %e,
                    gate = %handle.gate().path().display(),
                    "tunnel client exited and its exit could not be recorded; restart the container to reconnect"
                );
            }
        }

        shutdown().await;
        handle.release_pid_file();
        tracing::info!("shutdown requested");
        Ok(())
    }
}

async fn open_log_sink(path: &Path) -> Result<tokio::fs::File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    Ok(file)
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM, waiting for Ctrl-C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

// ─── TunnelHandle ─────────────────────────────────────────────────────────

/// How the tunnel client ended.
#[derive(Debug)]
pub struct TunnelExit {
    /// Exit code, `None` if killed by a signal.
    pub status: Option<i32>,
    pub summary: ScanSummary,
    /// True if the exit policy reset the gate to "0".
    pub gate_cleared: bool,
}

pub struct TunnelHandle {
    child: Child,
    scanner: JoinHandle<ScanSummary>,
    gate: ReadinessGate,
    pid_file: PathBuf,
    policy: ExitPolicy,
}

impl TunnelHandle {
    pub fn gate(&self) -> &ReadinessGate {
        &self.gate
    }

    /// Wait for the scanner to drain and the client to exit, then apply the
    /// exit policy to the gate.
    pub async fn wait(&mut self) -> Result<TunnelExit> {
        let summary = (&mut self.scanner).await.map_err(|e| TunnelError::Setup {
            step: "scanner".into(),
            message: e.to_string(),
        })?;
        let status = self.child.wait().await?.code();

        let gate_cleared = match self.policy {
            ExitPolicy::Clear => {
                self.gate.write(false)?;
                true
            }
            ExitPolicy::Retain => {
                tracing::warn!(
                    gate = %self.gate.path().display(),
                    "tunnel client exited but gate is retained; health checks must verify supervisor liveness"
                );
                false
            }
        };

        Ok(TunnelExit {
            status,
            summary,
            gate_cleared,
        })
    }

    /// Kill the client, close the gate and drop the pid file.
    pub async fn stop(&mut self) {
        let _ = self.child.kill().await;
        let _ = self.child.wait().await;
        // Orphans of the client may still hold its pipes open.
        self.scanner.abort();
        if let Err(e) = self.gate.write(false) {
            tracing::warn!(error = %e, "failed to reset readiness gate on shutdown");
        }
        self.release_pid_file();
    }

    fn release_pid_file(&self) {
        if let Err(e) = std::fs::remove_file(&self.pid_file) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(error = %e, path = %self.pid_file.display(), "failed to remove pid file");
            }
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────
