//! Service definitions for transport servers

use dnstm_config::{BackendConfig, TransportKind, TunnelConfig};
use dnstm_system::{KeyMaterial, ServiceSpec};

use crate::bind::BindOptions;

pub const SLIPSTREAM_BINARY: &str = "/usr/local/bin/slipstream-server";
pub const DNSTT_BINARY: &str = "/usr/local/bin/dnstt-server";

/// Prefix of every tunnel service name
pub const SERVICE_PREFIX: &str = "dnstm-";

pub fn service_name(tag: &str) -> String {
    format!("{}{}", SERVICE_PREFIX, tag)
}

pub fn transport_binary(transport: TransportKind) -> &'static str {
    match transport {
        TransportKind::Slipstream => SLIPSTREAM_BINARY,
        TransportKind::Dnstt => DNSTT_BINARY,
    }
}

/// Service running a tunnel's transport server with the given binding
pub fn tunnel_service_spec(
    tunnel: &TunnelConfig,
    backend: &BackendConfig,
    bind: &BindOptions,
    material: &KeyMaterial,
) -> ServiceSpec {
    let mut command = vec![transport_binary(tunnel.transport).to_string()];
    let key = material.key_path.to_string_lossy().to_string();

    match tunnel.transport {
        TransportKind::Slipstream => {
            command.extend([
                "--dns-listen-host".to_string(),
                bind.host.to_string(),
                "--dns-listen-port".to_string(),
                bind.port.to_string(),
                "--target-address".to_string(),
                backend.address.clone(),
                "--domain".to_string(),
                tunnel.domain.clone(),
                "--cert".to_string(),
                material.cert_path.to_string_lossy().to_string(),
                "--key".to_string(),
                key,
            ]);
        }
        TransportKind::Dnstt => {
            command.extend([
                "-udp".to_string(),
                bind.to_string(),
                "-privkey-file".to_string(),
                key,
                "-mtu".to_string(),
                tunnel.mtu().to_string(),
                tunnel.domain.clone(),
                backend.address.clone(),
            ]);
        }
    }

    ServiceSpec::new(
        service_name(&tunnel.tag),
        format!("dnstm {} tunnel {} ({})", tunnel.transport, tunnel.tag, tunnel.domain),
        command,
    )
    .with_privileged_bind(bind.is_privileged())
}
