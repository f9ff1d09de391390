//! Where a tunnel's server listens

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tracing::warn;

use dnstm_config::{Topology, TunnelConfig};
use dnstm_system::{AddressResolver, DNS_PORT};

/// Resolved listen address of a tunnel's service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindOptions {
    pub host: IpAddr,
    pub port: u16,
}

impl BindOptions {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Ports below 1024 need CAP_NET_BIND_SERVICE
    pub fn is_privileged(&self) -> bool {
        self.port < 1024
    }
}

impl fmt::Display for BindOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}

/// Computes bind options from the topology
///
/// In single topology the tunnel owns the DNS port on the external address;
/// in multi topology it sits on loopback at its allocated port.
#[derive(Clone)]
pub struct BindResolver {
    address: Arc<dyn AddressResolver>,
}

impl BindResolver {
    pub fn new(address: Arc<dyn AddressResolver>) -> Self {
        Self { address }
    }

    pub fn resolve(&self, tunnel: &TunnelConfig, topology: Topology) -> BindOptions {
        match topology {
            Topology::Single => {
                let host = match self.address.detect_external_ip() {
                    Ok(ip) => ip,
                    Err(e) => {
                        warn!(
                            tag = %tunnel.tag,
                            "Could not detect external address, binding to all interfaces: {}", e
                        );
                        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
                    }
                };
                BindOptions {
                    host,
                    port: DNS_PORT,
                }
            }
            Topology::Multi => BindOptions {
                host: IpAddr::V4(Ipv4Addr::LOCALHOST),
                port: tunnel.port,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dnstm_config::{Enablement, TransportKind};
    use dnstm_system::SystemError;
    use mockall::mock;

    mock! {
        Resolver {}
        impl AddressResolver for Resolver {
            fn detect_external_ip(&self) -> Result<IpAddr, SystemError>;
        }
    }

    fn tunnel() -> TunnelConfig {
        TunnelConfig {
            tag: "swift-otter".to_string(),
            transport: TransportKind::Dnstt,
            backend: "socks".to_string(),
            domain: "t.example.com".to_string(),
            port: 5312,
            enabled: Enablement::Enabled,
            mtu: None,
        }
    }

    #[test]
    fn test_single_binds_external_address_on_dns_port() {
        let mut resolver = MockResolver::new();
        resolver
            .expect_detect_external_ip()
            .times(1)
            .returning(|| Ok("203.0.113.7".parse().unwrap()));

        let bind = BindResolver::new(Arc::new(resolver)).resolve(&tunnel(), Topology::Single);
        assert_eq!(bind.to_string(), "203.0.113.7:53");
        assert!(bind.is_privileged());
    }

    #[test]
    fn test_single_falls_back_to_wildcard() {
        let mut resolver = MockResolver::new();
        resolver
            .expect_detect_external_ip()
            .returning(|| Err(SystemError::AddressDetection("offline".to_string())));

        let bind = BindResolver::new(Arc::new(resolver)).resolve(&tunnel(), Topology::Single);
        assert_eq!(bind.to_string(), "0.0.0.0:53");
    }

    #[test]
    fn test_multi_binds_loopback_without_detection() {
        let mut resolver = MockResolver::new();
        resolver.expect_detect_external_ip().never();

        let bind = BindResolver::new(Arc::new(resolver)).resolve(&tunnel(), Topology::Multi);
        assert_eq!(bind.to_string(), "127.0.0.1:5312");
        assert!(!bind.is_privileged());
    }
}
