//! Domain suffix matching
//!
//! A query for `x.y.t.example.com` is served by the route for
//! `t.example.com`. Matching walks the name from the full query towards the
//! root, so the first hit is the longest dot-aligned suffix.

use dashmap::DashMap;
use std::net::SocketAddr;
use tracing::trace;

use dnstm_config::normalize_domain;

use crate::error::RouterError;
use crate::table::RouteTable;

/// Resolved routes of a [`RouteTable`]
pub struct RouteMatcher {
    routes: DashMap<String, SocketAddr>,
    default: Option<SocketAddr>,
}

impl RouteMatcher {
    /// Parse every upstream address in the table
    pub fn from_table(table: &RouteTable) -> Result<Self, RouterError> {
        let routes = DashMap::new();
        for entry in &table.routes {
            let upstream = parse_upstream(&entry.domain, &entry.upstream)?;
            routes.insert(normalize_domain(&entry.domain), upstream);
        }

        let default = table
            .default
            .as_deref()
            .map(|address| parse_upstream("default route", address))
            .transpose()?;

        Ok(Self { routes, default })
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn default_upstream(&self) -> Option<SocketAddr> {
        self.default
    }

    /// Upstream for an exact or suffix match, ignoring the default
    pub fn route_for(&self, qname: &str) -> Option<SocketAddr> {
        let qname = normalize_domain(qname);
        let mut candidate = qname.as_str();
        loop {
            if let Some(upstream) = self.routes.get(candidate) {
                trace!("Query {} matched route {}", qname, candidate);
                return Some(*upstream);
            }
            match candidate.split_once('.') {
                Some((_, parent)) => candidate = parent,
                None => return None,
            }
        }
    }

    /// Upstream for a query name, falling back to the default route
    pub fn lookup(&self, qname: &str) -> Option<SocketAddr> {
        self.route_for(qname).or(self.default)
    }
}

fn parse_upstream(what: &str, address: &str) -> Result<SocketAddr, RouterError> {
    address
        .parse()
        .map_err(|_| RouterError::InvalidAddress {
            what: what.to_string(),
            address: address.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::RouteEntry;

    fn table(default: Option<&str>) -> RouteTable {
        RouteTable {
            listen: "0.0.0.0:53".to_string(),
            default: default.map(str::to_string),
            routes: vec![
                RouteEntry {
                    domain: "example.com".to_string(),
                    upstream: "127.0.0.1:5310".to_string(),
                },
                RouteEntry {
                    domain: "t.example.com".to_string(),
                    upstream: "127.0.0.1:5311".to_string(),
                },
            ],
        }
    }

    #[test]
    fn test_exact_and_longest_suffix() {
        let matcher = RouteMatcher::from_table(&table(None)).unwrap();
        assert_eq!(matcher.len(), 2);

        let t: SocketAddr = "127.0.0.1:5311".parse().unwrap();
        let base: SocketAddr = "127.0.0.1:5310".parse().unwrap();

        assert_eq!(matcher.lookup("t.example.com"), Some(t));
        assert_eq!(matcher.lookup("abc.def.T.EXAMPLE.com."), Some(t));
        assert_eq!(matcher.lookup("u.example.com"), Some(base));
        assert_eq!(matcher.lookup("example.com"), Some(base));
    }

    #[test]
    fn test_suffix_must_be_dot_aligned() {
        let matcher = RouteMatcher::from_table(&table(None)).unwrap();
        assert_eq!(matcher.lookup("badexample.com"), None);
        assert_eq!(matcher.lookup("xt.example.org"), None);
    }

    #[test]
    fn test_default_fallback() {
        let matcher = RouteMatcher::from_table(&table(Some("127.0.0.1:5399"))).unwrap();
        let default: SocketAddr = "127.0.0.1:5399".parse().unwrap();
        assert_eq!(matcher.lookup("other.org"), Some(default));
        assert_eq!(matcher.route_for("other.org"), None);
        assert_eq!(matcher.default_upstream(), Some(default));
    }

    #[test]
    fn test_invalid_upstream() {
        let mut bad = table(None);
        bad.routes[0].upstream = "localhost".to_string();
        assert!(matches!(
            RouteMatcher::from_table(&bad),
            Err(RouterError::InvalidAddress { .. })
        ));
    }
}
