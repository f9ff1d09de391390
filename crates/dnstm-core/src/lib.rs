//! Orchestration of DNS tunnel services
//!
//! Ties the configuration, the host collaborators and the DNS router
//! together. [`Orchestrator`] is the entry point: it runs tunnels either in
//! single topology (one tunnel on the DNS port) or multi topology (all
//! enabled tunnels on loopback behind the router) and switches between the
//! two with rollback on failure.

pub mod bind;
pub mod error;
pub mod host;
pub mod orchestrator;
pub mod report;
pub mod transport;

pub use bind::{BindOptions, BindResolver};
pub use error::{Error, Result};
pub use host::{Host, PortWait};
pub use orchestrator::{ModeSnapshot, NewTunnel, Orchestrator};
pub use report::{AddedTunnel, Report, StatusReport, TunnelStatus};
pub use transport::{service_name, tunnel_service_spec, DNSTT_BINARY, SLIPSTREAM_BINARY};
