//! Routing table consumed by the DNS router
//!
//! The table is a small YAML file written next to the main configuration:
//!
//! ```yaml
//! listen: 0.0.0.0:53
//! default: 127.0.0.1:5310
//! routes:
//!   - domain: t.example.com
//!     upstream: 127.0.0.1:5310
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::debug;

use dnstm_config::{normalize_domain, TunnelConfig, DEFAULT_LISTEN_ADDRESS};

use crate::error::RouterError;

/// One domain to upstream mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEntry {
    pub domain: String,
    /// host:port of the tunnel serving the domain
    pub upstream: String,
}

/// Everything the router needs to run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTable {
    pub listen: String,
    /// Upstream for queries no route matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default)]
    pub routes: Vec<RouteEntry>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN_ADDRESS.to_string(),
            default: None,
            routes: Vec::new(),
        }
    }
}

impl RouteTable {
    pub fn load(path: &Path) -> Result<Self, RouterError> {
        let yaml = fs::read_to_string(path).map_err(|source| RouterError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&yaml).map_err(|source| RouterError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write the table through a temp file and rename
    pub fn save(&self, path: &Path) -> Result<(), RouterError> {
        let io_err = |source| RouterError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
        }

        let yaml = serde_yaml::to_string(self)?;
        let tmp_path = path.with_extension("yaml.tmp");
        fs::write(&tmp_path, yaml).map_err(io_err)?;
        fs::rename(&tmp_path, path).map_err(io_err)?;

        debug!("Saved routing table with {} routes to {:?}", self.routes.len(), path);
        Ok(())
    }

    pub fn upstream_for(&self, domain: &str) -> Option<&str> {
        let domain = normalize_domain(domain);
        self.routes
            .iter()
            .find(|r| r.domain == domain)
            .map(|r| r.upstream.as_str())
    }
}

/// Loopback address a tunnel listens on in multi topology
pub fn tunnel_upstream(tunnel: &TunnelConfig) -> String {
    format!("127.0.0.1:{}", tunnel.port)
}

/// Builds routing tables from the configured tunnels
#[derive(Debug, Clone)]
pub struct RouteConfigBuilder {
    listen: String,
}

impl RouteConfigBuilder {
    pub fn new(listen: impl Into<String>) -> Self {
        Self {
            listen: listen.into(),
        }
    }

    /// Route every enabled tunnel's domain to its loopback port
    ///
    /// Disabled tunnels get no entry, so the router never forwards to a
    /// service that is not supposed to be running.
    pub fn build(&self, tunnels: &[TunnelConfig], default_backend: Option<&str>) -> RouteTable {
        let routes = tunnels
            .iter()
            .filter(|t| t.is_enabled())
            .map(|t| RouteEntry {
                domain: normalize_domain(&t.domain),
                upstream: tunnel_upstream(t),
            })
            .collect();

        RouteTable {
            listen: self.listen.clone(),
            default: default_backend.map(str::to_string),
            routes,
        }
    }
}

impl Default for RouteConfigBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_LISTEN_ADDRESS)
    }
}
