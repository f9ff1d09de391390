//! Loopback port allocation for tunnels
//!
//! Ports come from a fixed range and fill gaps left by removed tunnels.
//! When the range is full the scan keeps going past its end up to 65535.

use std::collections::HashSet;
use tracing::warn;

use crate::error::ConfigError;

/// First port of the tunnel range
pub const BASE_PORT: u16 = 5310;
/// Last port of the tunnel range
pub const MAX_PORT: u16 = 5399;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortAllocator {
    range_start: u16,
    range_end: u16,
}

impl PortAllocator {
    pub fn new(range_start: u16, range_end: u16) -> Self {
        Self {
            range_start,
            range_end,
        }
    }

    /// Return the lowest free port, preferring the configured range
    pub fn allocate(&self, used_ports: &HashSet<u16>) -> Result<u16, ConfigError> {
        if let Some(port) =
            (self.range_start..=self.range_end).find(|port| !used_ports.contains(port))
        {
            return Ok(port);
        }

        let overflow_start = self.range_end.saturating_add(1);
        if self.range_end < u16::MAX {
            if let Some(port) = (overflow_start..=u16::MAX).find(|port| !used_ports.contains(port))
            {
                warn!(
                    "Port range {}-{} exhausted, allocating {} outside the range",
                    self.range_start, self.range_end, port
                );
                return Ok(port);
            }
        }

        Err(ConfigError::PortsExhausted {
            start: self.range_start,
        })
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(BASE_PORT, MAX_PORT)
    }
}
