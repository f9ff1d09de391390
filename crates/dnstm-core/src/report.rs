//! Structured results of orchestrator operations

use std::fmt;
use tracing::warn;

use dnstm_config::{Topology, TunnelConfig};
use dnstm_system::{KeyMaterial, ServiceState};

use crate::bind::BindOptions;

/// Non-fatal problems hit while an operation succeeded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    pub warnings: Vec<String>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record and log a warning
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.warnings.push(message);
    }

    pub fn merge(&mut self, other: Report) {
        self.warnings.extend(other.warnings);
    }

    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Result of adding a tunnel
#[derive(Debug, Clone)]
pub struct AddedTunnel {
    pub tunnel: TunnelConfig,
    /// Certificate fingerprint or dnstt public key to hand to clients
    pub material: KeyMaterial,
    pub report: Report,
}

/// One tunnel in a [`StatusReport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelStatus {
    pub tag: String,
    pub transport: String,
    pub backend: String,
    pub domain: String,
    pub port: u16,
    pub enabled: bool,
    /// Active tunnel (single) or default route (multi)
    pub selected: bool,
    pub state: ServiceState,
    /// Where the tunnel listens in the current topology, if it should run
    pub bind: Option<BindOptions>,
}

/// Snapshot of configuration next to the observed service states
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub topology: Topology,
    pub active: String,
    pub default: String,
    pub listen: String,
    pub router: ServiceState,
    pub tunnels: Vec<TunnelStatus>,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Mode: {}", self.topology)?;
        match self.topology {
            Topology::Single => writeln!(f, "Active: {}", or_none(&self.active))?,
            Topology::Multi => {
                writeln!(f, "Default route: {}", or_none(&self.default))?;
                writeln!(f, "Router: {} on {}", self.router, self.listen)?;
            }
        }

        if self.tunnels.is_empty() {
            return writeln!(f, "No tunnels configured");
        }

        writeln!(f)?;
        writeln!(
            f,
            "{:<2}{:<24} {:<11} {:<28} {:<16} {:<8} STATE",
            "", "TAG", "TRANSPORT", "DOMAIN", "LISTEN", "ENABLED"
        )?;
        for tunnel in &self.tunnels {
            let listen = tunnel
                .bind
                .map(|b| b.to_string())
                .unwrap_or_else(|| "-".to_string());
            writeln!(
                f,
                "{:<2}{:<24} {:<11} {:<28} {:<16} {:<8} {}",
                if tunnel.selected { "*" } else { "" },
                tunnel.tag,
                tunnel.transport,
                tunnel.domain,
                listen,
                if tunnel.enabled { "yes" } else { "no" },
                tunnel.state
            )?;
        }
        Ok(())
    }
}

fn or_none(tag: &str) -> &str {
    if tag.is_empty() {
        "(none)"
    } else {
        tag
    }
}
