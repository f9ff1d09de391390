//! Configuration model for the DNS tunnel manager
//!
//! Holds the persisted configuration (tunnels, backends, topology), the
//! atomic JSON store, and the tag and port allocators used when new tunnels
//! are added.

pub mod error;
pub mod model;
pub mod port;
pub mod store;
pub mod tag;

pub use error::ConfigError;
pub use model::{
    normalize_domain, BackendConfig, BackendKind, Config, Enablement, ListenConfig, RouteConfig,
    Topology, TransportKind, TunnelConfig, DEFAULT_DNSTT_MTU, DEFAULT_LISTEN_ADDRESS,
};
pub use port::{PortAllocator, BASE_PORT, MAX_PORT};
pub use store::{ConfigStore, DEFAULT_CONFIG_PATH};
pub use tag::{generate_unique_tag, normalize_tag, validate_tag};
