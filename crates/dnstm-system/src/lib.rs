//! Host collaborators driven by the orchestrator
//!
//! Everything that touches the operating system lives here behind a trait:
//! the service manager (systemd), the firewall (iptables), privileged port
//! probing, external address detection and key material issuing.

pub mod address;
pub mod certs;
mod command;
pub mod error;
pub mod firewall;
pub mod probe;
pub mod service;

pub use address::{AddressResolver, UdpAddressResolver};
pub use certs::{CertificateIssuer, FileCertificateIssuer, KeyMaterial};
pub use error::SystemError;
pub use firewall::{Firewall, IptablesFirewall};
pub use probe::{PortProbe, SocketPortProbe, DNS_PORT};
pub use service::{ManagedService, ServiceManager, ServiceSpec, ServiceState, SystemdServiceManager};
