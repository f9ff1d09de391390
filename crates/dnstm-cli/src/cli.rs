//! Command-line arguments

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use dnstm_config::{BackendKind, Topology, TransportKind, DEFAULT_CONFIG_PATH};

/// dnstm - Run DNS tunnels on one host, alone or behind a DNS router
#[derive(Parser, Debug)]
#[command(name = "dnstm")]
#[command(about = "Manage DNS tunnel services", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file
    #[arg(long, global = true, env = "DNSTM_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show mode, tunnels and service states
    Status,
    /// Start the services of the current mode
    Start,
    /// Stop every tunnel and the DNS router
    Stop,
    /// Stop, then start the current mode
    Restart,
    /// Switch between single and multi mode
    Mode {
        /// Target mode (single, multi)
        mode: Topology,
    },
    /// Make a tunnel the active one (single mode)
    Switch {
        /// Tunnel tag
        tag: String,
    },
    /// Set the DNS router's fallback tunnel (multi mode)
    Default {
        /// Tunnel tag
        tag: String,
    },
    /// Manage tunnels
    Tunnel {
        #[command(subcommand)]
        command: TunnelCommands,
    },
    /// Manage backends
    Backend {
        #[command(subcommand)]
        command: BackendCommands,
    },
    /// Remove every dnstm service (configuration is kept)
    Uninstall,
    /// Built-in DNS router
    Dnsrouter {
        #[command(subcommand)]
        command: DnsrouterCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum TunnelCommands {
    /// Add a tunnel
    Add {
        /// Transport (slipstream, dnstt)
        #[arg(short, long)]
        transport: TransportKind,
        /// Domain delegated to this host
        #[arg(short, long)]
        domain: String,
        /// Backend tag to forward to
        #[arg(short, long, default_value = "socks")]
        backend: String,
        /// Tunnel tag (generated when omitted)
        #[arg(long)]
        tag: Option<String>,
        /// Loopback port for multi mode (allocated when omitted)
        #[arg(short, long)]
        port: Option<u16>,
        /// MTU (dnstt only)
        #[arg(long)]
        mtu: Option<u16>,
    },
    /// Remove a tunnel and its service
    Remove {
        /// Tunnel tag
        tag: String,
    },
    /// List configured tunnels
    List,
    /// Enable a tunnel
    Enable {
        /// Tunnel tag
        tag: String,
    },
    /// Disable a tunnel
    Disable {
        /// Tunnel tag
        tag: String,
    },
    /// Show a tunnel's service logs
    Logs {
        /// Tunnel tag
        tag: String,
        /// Number of lines
        #[arg(short = 'n', long, default_value = "50")]
        lines: usize,
    },
}

#[derive(Subcommand, Debug)]
pub enum BackendCommands {
    /// Add a backend
    Add {
        /// Backend tag
        tag: String,
        /// Forwarding address (host:port)
        address: String,
        /// Backend type (socks, ssh, shadowsocks, custom)
        #[arg(long = "type", default_value = "socks")]
        kind: BackendKind,
    },
    /// Remove a backend no tunnel uses
    Remove {
        /// Backend tag
        tag: String,
    },
    /// List configured backends
    List,
}

#[derive(Subcommand, Debug)]
pub enum DnsrouterCommands {
    /// Run the DNS router in the foreground
    Serve {
        /// Routing table file
        #[arg(long)]
        routes: PathBuf,
    },
}
