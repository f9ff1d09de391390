//! External address detection

use std::net::{IpAddr, UdpSocket};

use crate::error::SystemError;

pub trait AddressResolver: Send + Sync {
    /// Address the host uses to reach the internet
    fn detect_external_ip(&self) -> Result<IpAddr, SystemError>;
}

/// Detects the outbound address with the UDP-connect trick
///
/// Connecting a UDP socket sends nothing; it only makes the kernel pick the
/// source address it would route through.
pub struct UdpAddressResolver {
    probe_target: String,
}

impl UdpAddressResolver {
    pub fn new() -> Self {
        Self::with_probe_target("8.8.8.8:53")
    }

    pub fn with_probe_target(probe_target: impl Into<String>) -> Self {
        Self {
            probe_target: probe_target.into(),
        }
    }
}

impl Default for UdpAddressResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressResolver for UdpAddressResolver {
    fn detect_external_ip(&self) -> Result<IpAddr, SystemError> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .map_err(|e| SystemError::AddressDetection(e.to_string()))?;
        socket
            .connect(&self.probe_target)
            .map_err(|e| SystemError::AddressDetection(e.to_string()))?;
        let ip = socket
            .local_addr()
            .map_err(|e| SystemError::AddressDetection(e.to_string()))?
            .ip();

        if ip.is_unspecified() {
            return Err(SystemError::AddressDetection(
                "no route to the internet".to_string(),
            ));
        }
        Ok(ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_probe_detects_loopback() {
        let resolver = UdpAddressResolver::with_probe_target("127.0.0.1:9");
        let ip = resolver.detect_external_ip().unwrap();
        assert!(ip.is_loopback());
    }

    #[test]
    fn test_unresolvable_target_is_an_error() {
        let resolver = UdpAddressResolver::with_probe_target("not an address");
        assert!(matches!(
            resolver.detect_external_ip(),
            Err(SystemError::AddressDetection(_))
        ));
    }
}
