//! Persisted configuration model
//!
//! One JSON document describes the whole host: the DNS listen address, the
//! current topology with its active/default tunnel tags, the forwarding
//! backends, and the tunnels themselves.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::error::ConfigError;
use crate::tag::validate_tag;

/// Address the DNS-routing daemon binds to in multi topology
pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:53";

/// MTU handed to dnstt servers when the tunnel does not set one
pub const DEFAULT_DNSTT_MTU: u16 = 1232;

/// System-wide operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topology {
    /// One tunnel bound directly to the privileged DNS port
    #[default]
    Single,
    /// All enabled tunnels on loopback behind the DNS router
    Multi,
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topology::Single => write!(f, "single"),
            Topology::Multi => write!(f, "multi"),
        }
    }
}

impl FromStr for Topology {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "single" => Ok(Topology::Single),
            "multi" => Ok(Topology::Multi),
            other => Err(ConfigError::Invalid(format!(
                "Unknown mode '{}': must be single or multi",
                other
            ))),
        }
    }
}

/// Tri-state enabled flag
///
/// An omitted `enabled` key is `Unset`, which counts as enabled.
/// [`Config::normalize`] turns every `Unset` into `Enabled` before the
/// configuration is handed to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Enablement {
    #[default]
    Unset,
    Enabled,
    Disabled,
}

impl Enablement {
    pub fn resolve(self) -> bool {
        !matches!(self, Enablement::Disabled)
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, Enablement::Unset)
    }
}

impl From<bool> for Enablement {
    fn from(value: bool) -> Self {
        if value {
            Enablement::Enabled
        } else {
            Enablement::Disabled
        }
    }
}

impl Serialize for Enablement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Enablement::Unset => serializer.serialize_none(),
            Enablement::Enabled => serializer.serialize_bool(true),
            Enablement::Disabled => serializer.serialize_bool(false),
        }
    }
}

impl<'de> Deserialize<'de> for Enablement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Option::<bool>::deserialize(deserializer)? {
            None => Enablement::Unset,
            Some(value) => Enablement::from(value),
        })
    }
}

/// DNS tunnel transport run by a tunnel's service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Slipstream,
    Dnstt,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Slipstream => write!(f, "slipstream"),
            TransportKind::Dnstt => write!(f, "dnstt"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "slipstream" => Ok(TransportKind::Slipstream),
            "dnstt" => Ok(TransportKind::Dnstt),
            other => Err(ConfigError::Invalid(format!(
                "Unknown transport '{}': must be slipstream or dnstt",
                other
            ))),
        }
    }
}

/// Kind of forwarding target a backend describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Socks,
    Ssh,
    Shadowsocks,
    Custom,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Socks => write!(f, "socks"),
            BackendKind::Ssh => write!(f, "ssh"),
            BackendKind::Shadowsocks => write!(f, "shadowsocks"),
            BackendKind::Custom => write!(f, "custom"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "socks" | "socks5" => Ok(BackendKind::Socks),
            "ssh" => Ok(BackendKind::Ssh),
            "shadowsocks" | "ss" => Ok(BackendKind::Shadowsocks),
            "custom" => Ok(BackendKind::Custom),
            other => Err(ConfigError::Invalid(format!(
                "Unknown backend type '{}': must be socks, ssh, shadowsocks or custom",
                other
            ))),
        }
    }
}

/// A forwarding target that tunnels deliver traffic to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub tag: String,
    #[serde(rename = "type")]
    pub kind: BackendKind,
    /// host:port the transport forwards decoded traffic to
    pub address: String,
}

/// One configured tunnel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelConfig {
    pub tag: String,
    pub transport: TransportKind,
    /// Tag of the backend this tunnel forwards to
    pub backend: String,
    pub domain: String,
    /// Private loopback port used in multi topology
    pub port: u16,
    #[serde(default, skip_serializing_if = "Enablement::is_unset")]
    pub enabled: Enablement,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u16>,
}

impl TunnelConfig {
    pub fn is_enabled(&self) -> bool {
        self.enabled.resolve()
    }

    /// MTU for dnstt tunnels, falling back to the default
    pub fn mtu(&self) -> u16 {
        self.mtu.unwrap_or(DEFAULT_DNSTT_MTU)
    }
}

/// DNS-routing daemon listen settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenConfig {
    pub address: String,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_LISTEN_ADDRESS.to_string(),
        }
    }
}

/// Topology plus the tags that give it context
///
/// Both `active` and `default` survive topology switches so that switching
/// back restores the previous selection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RouteConfig {
    #[serde(default)]
    pub mode: Topology,
    /// Tunnel bound to the privileged port in single topology
    #[serde(default)]
    pub active: String,
    /// Tunnel used by the DNS router when no domain matches
    #[serde(default)]
    pub default: String,
}

/// Root of the persisted configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub route: RouteConfig,
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
    #[serde(default)]
    pub tunnels: Vec<TunnelConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: ListenConfig::default(),
            route: RouteConfig::default(),
            backends: vec![BackendConfig {
                tag: "socks".to_string(),
                kind: BackendKind::Socks,
                address: "127.0.0.1:1080".to_string(),
            }],
            tunnels: Vec::new(),
        }
    }
}

impl Config {
    pub fn topology(&self) -> Topology {
        self.route.mode
    }

    pub fn tunnel(&self, tag: &str) -> Option<&TunnelConfig> {
        self.tunnels.iter().find(|t| t.tag == tag)
    }

    pub fn tunnel_mut(&mut self, tag: &str) -> Option<&mut TunnelConfig> {
        self.tunnels.iter_mut().find(|t| t.tag == tag)
    }

    pub fn backend(&self, tag: &str) -> Option<&BackendConfig> {
        self.backends.iter().find(|b| b.tag == tag)
    }

    pub fn enabled_tunnels(&self) -> impl Iterator<Item = &TunnelConfig> {
        self.tunnels.iter().filter(|t| t.is_enabled())
    }

    /// Tags of tunnels and backends, which share one namespace
    pub fn used_tags(&self) -> HashSet<String> {
        self.tunnels
            .iter()
            .map(|t| t.tag.clone())
            .chain(self.backends.iter().map(|b| b.tag.clone()))
            .collect()
    }

    pub fn used_ports(&self) -> HashSet<u16> {
        self.tunnels.iter().map(|t| t.port).collect()
    }

    /// First pair of tunnels sharing a domain, as `(domain, first_tag, second_tag)`
    pub fn find_duplicate_domain(&self) -> Option<(String, String, String)> {
        let mut seen: HashMap<String, &str> = HashMap::new();
        for tunnel in &self.tunnels {
            let domain = normalize_domain(&tunnel.domain);
            if let Some(first) = seen.get(&domain) {
                return Some((domain, first.to_string(), tunnel.tag.clone()));
            }
            seen.insert(domain, &tunnel.tag);
        }
        None
    }

    /// Tag of a tunnel already using `domain`, if any
    pub fn domain_owner(&self, domain: &str) -> Option<&str> {
        let wanted = normalize_domain(domain);
        self.tunnels
            .iter()
            .find(|t| normalize_domain(&t.domain) == wanted)
            .map(|t| t.tag.as_str())
    }

    /// Resolve every unset `enabled` flag to its concrete default
    pub fn normalize(&mut self) {
        for tunnel in &mut self.tunnels {
            if tunnel.enabled.is_unset() {
                tunnel.enabled = Enablement::Enabled;
            }
        }
    }

    /// Check the structural invariants of the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen
            .address
            .parse::<SocketAddr>()
            .map_err(|e| {
                ConfigError::Invalid(format!(
                    "Invalid listen address '{}': {}",
                    self.listen.address, e
                ))
            })?;

        let mut backend_tags = HashSet::new();
        for backend in &self.backends {
            validate_tag(&backend.tag)?;
            if !backend_tags.insert(backend.tag.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "Duplicate backend tag: {}",
                    backend.tag
                )));
            }
            if backend.address.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "Backend '{}' has an empty address",
                    backend.tag
                )));
            }
        }

        let mut tunnel_tags = HashSet::new();
        let mut ports = HashMap::new();
        for tunnel in &self.tunnels {
            validate_tag(&tunnel.tag)?;
            if !tunnel_tags.insert(tunnel.tag.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "Duplicate tunnel tag: {}",
                    tunnel.tag
                )));
            }
            if backend_tags.contains(tunnel.tag.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "Tag '{}' names both a tunnel and a backend",
                    tunnel.tag
                )));
            }
            if let Some(other) = ports.insert(tunnel.port, tunnel.tag.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "Port {} is used by both '{}' and '{}'",
                    tunnel.port, other, tunnel.tag
                )));
            }
            if tunnel.port == 0 {
                return Err(ConfigError::Invalid(format!(
                    "Tunnel '{}' has no port",
                    tunnel.tag
                )));
            }
            if normalize_domain(&tunnel.domain).is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "Tunnel '{}' has an empty domain",
                    tunnel.tag
                )));
            }
            if !backend_tags.contains(tunnel.backend.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "Tunnel '{}' references unknown backend '{}'",
                    tunnel.tag, tunnel.backend
                )));
            }
        }

        if !self.route.active.is_empty() && !tunnel_tags.contains(self.route.active.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Active tunnel '{}' does not exist",
                self.route.active
            )));
        }
        if !self.route.default.is_empty() && !tunnel_tags.contains(self.route.default.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Default route '{}' does not exist",
                self.route.default
            )));
        }

        if self.route.mode == Topology::Multi {
            if let Some((domain, first, second)) = self.find_duplicate_domain() {
                return Err(ConfigError::Invalid(format!(
                    "Domain '{}' is used by both '{}' and '{}' (multi mode needs unique domains)",
                    domain, first, second
                )));
            }
        }

        Ok(())
    }
}

/// Lowercase a domain and strip surrounding dots so comparisons are exact
pub fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_matches('.').to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tunnel(tag: &str, domain: &str, port: u16) -> TunnelConfig {
        TunnelConfig {
            tag: tag.to_string(),
            transport: TransportKind::Slipstream,
            backend: "socks".to_string(),
            domain: domain.to_string(),
            port,
            enabled: Enablement::Unset,
            mtu: None,
        }
    }

    #[test]
    fn test_enablement_roundtrip_keeps_unset_absent() {
        let config = Config {
            tunnels: vec![tunnel("alpha", "a.example.com", 5310)],
            ..Config::default()
        };

        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("enabled"));

        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.tunnels[0].enabled, Enablement::Unset);
        assert!(parsed.tunnels[0].is_enabled());
    }

    #[test]
    fn test_enablement_parses_explicit_values() {
        let json = r#"{
            "backends": [{"tag": "socks", "type": "socks", "address": "127.0.0.1:1080"}],
            "tunnels": [
                {"tag": "on-one", "transport": "dnstt", "backend": "socks", "domain": "a.com", "port": 5310, "enabled": true},
                {"tag": "off-one", "transport": "dnstt", "backend": "socks", "domain": "b.com", "port": 5311, "enabled": false}
            ]
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.tunnels[0].enabled, Enablement::Enabled);
        assert_eq!(config.tunnels[1].enabled, Enablement::Disabled);
        assert_eq!(config.enabled_tunnels().count(), 1);
        assert_eq!(config.topology(), Topology::Single);
    }

    #[test]
    fn test_normalize_resolves_unset() {
        let mut config = Config {
            tunnels: vec![tunnel("alpha", "a.example.com", 5310)],
            ..Config::default()
        };
        config.normalize();
        assert_eq!(config.tunnels[0].enabled, Enablement::Enabled);
    }

    #[test]
    fn test_validate_rejects_duplicate_ports() {
        let config = Config {
            tunnels: vec![
                tunnel("alpha", "a.example.com", 5310),
                tunnel("bravo", "b.example.com", 5310),
            ],
            ..Config::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Port 5310"));
    }

    #[test]
    fn test_duplicate_domains_only_matter_in_multi() {
        let mut config = Config {
            tunnels: vec![
                tunnel("alpha", "t.example.com", 5310),
                tunnel("bravo", "T.example.com.", 5311),
            ],
            ..Config::default()
        };
        assert!(config.validate().is_ok());

        config.route.mode = Topology::Multi;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("t.example.com"));
    }

    #[test]
    fn test_validate_rejects_dangling_references() {
        let mut config = Config {
            tunnels: vec![tunnel("alpha", "a.example.com", 5310)],
            ..Config::default()
        };
        config.route.active = "ghost".to_string();
        assert!(config.validate().is_err());

        config.route.active = "alpha".to_string();
        config.tunnels[0].backend = "missing".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tunnel_and_backend_tags_share_namespace() {
        let config = Config {
            tunnels: vec![tunnel("socks", "a.example.com", 5310)],
            ..Config::default()
        };
        assert!(config.used_tags().contains("socks"));

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("both a tunnel and a backend"));
    }

    #[test]
    fn test_topology_parse_and_display() {
        assert_eq!("Multi".parse::<Topology>().unwrap(), Topology::Multi);
        assert_eq!(Topology::Single.to_string(), "single");
        assert!("both".parse::<Topology>().is_err());
    }
}
