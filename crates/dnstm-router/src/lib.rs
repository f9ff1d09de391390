//! DNS routing for multi topology
//!
//! In multi topology every enabled tunnel listens on a loopback port and a
//! single router owns the privileged DNS port, forwarding each query to the
//! tunnel whose domain matches the query name.
//!
//! This crate holds the routing-table file format and its builder, the
//! managed service that runs the router, and the router itself.

pub mod daemon;
pub mod dns;
pub mod error;
pub mod matcher;
pub mod server;
pub mod table;

pub use daemon::{DnsRouterService, RoutingDaemon, ROUTER_SERVICE_NAME, ROUTE_TABLE_FILE};
pub use dns::parse_query_name;
pub use error::RouterError;
pub use matcher::RouteMatcher;
pub use server::{RouterServer, DEFAULT_SESSION_TIMEOUT};
pub use table::{tunnel_upstream, RouteConfigBuilder, RouteEntry, RouteTable};
