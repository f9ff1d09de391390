//! Collaborators the orchestrator drives

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dnstm_config::ConfigStore;
use dnstm_router::{DnsRouterService, RoutingDaemon};
use dnstm_system::{
    AddressResolver, CertificateIssuer, FileCertificateIssuer, Firewall, IptablesFirewall,
    PortProbe, ServiceManager, SocketPortProbe, SystemdServiceManager, UdpAddressResolver,
};

use crate::transport::DNSTT_BINARY;

/// Everything outside the process the orchestrator talks to
#[derive(Clone)]
pub struct Host {
    pub services: Arc<dyn ServiceManager>,
    pub firewall: Arc<dyn Firewall>,
    pub ports: Arc<dyn PortProbe>,
    pub address: Arc<dyn AddressResolver>,
    pub certs: Arc<dyn CertificateIssuer>,
    pub router: Arc<dyn RoutingDaemon>,
}

impl Host {
    /// The real host: systemd, iptables, socket probes and on-disk key material
    ///
    /// `program` is the dnstm binary the router service runs.
    pub fn system(store: &ConfigStore, program: impl Into<PathBuf>) -> Self {
        let state_dir = store.state_dir();
        let services: Arc<dyn ServiceManager> = Arc::new(SystemdServiceManager::new());
        let router = DnsRouterService::new(services.clone(), program, &state_dir);

        Self {
            services,
            firewall: Arc::new(IptablesFirewall::new()),
            ports: Arc::new(SocketPortProbe::new()),
            address: Arc::new(UdpAddressResolver::new()),
            certs: Arc::new(FileCertificateIssuer::new(state_dir, DNSTT_BINARY)),
            router: Arc::new(router),
        }
    }
}

/// How long to wait for the DNS port to be released
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortWait {
    /// First wait, before killing the holder
    pub timeout: Duration,
    /// Second wait, after the kill
    pub retry_timeout: Duration,
}

impl Default for PortWait {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            retry_timeout: Duration::from_secs(2),
        }
    }
}
