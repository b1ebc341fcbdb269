//! `tunnel-agent`: supervisor for the VPN tunnel client inside a worker
//! container.
//!
//! The supervisor prepares the host (credential file, forward-proxy listener
//! config, forwarding and NAT rules), starts the tunnel client, and turns the
//! client's log stream into a single readiness bit other processes can poll.
//!
//! # Architecture
//!
//! ```text
//! Supervisor::setup   ← credentials, listener rewrite, iptables/sysctl
//!     │                  any failure here is fatal; gate untouched
//!     ▼
//! Supervisor::launch  ← gate := "0", pid file, spawn client
//!     │
//!     ▼
//! ClientProcess       ← stdout + stderr merged into an mpsc line channel
//!     │
//!     ▼
//! scan()              ← every line → log sink; marker line → gate := "1"
//!     │
//!     ▼
//! TunnelHandle        ← wait for exit, apply ExitPolicy to the gate
//! ```
//!
//! # Quick start
//!
//! ```rust,ignore
//! use fleetlink_core::config::TunnelConfig;
//! use tunnel_agent::Supervisor;
//!
//! Supervisor::new(TunnelConfig::default(), None).run().await?;
//! ```

pub mod credentials;
pub mod error;
pub mod network;
pub mod process;
pub mod scanner;
pub mod supervisor;

pub use credentials::Credentials;
pub use error::TunnelError;
pub use process::{ClientCommand, ClientProcess};
pub use scanner::{scan, ScanSummary};
pub use supervisor::{shutdown_signal, Supervisor, TunnelExit, TunnelHandle};

pub type Result<T> = std::result::Result<T, TunnelError>;
