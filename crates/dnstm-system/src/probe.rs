//! Privileged port availability checks

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::command;
use crate::error::SystemError;

/// The privileged DNS port
pub const DNS_PORT: u16 = 53;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub trait PortProbe: Send + Sync {
    /// Poll until `addr` can be bound, giving up after `timeout`
    fn wait_for_port_available(&self, addr: SocketAddr, timeout: Duration) -> bool;
    /// Kill the processes whose UDP sockets keep `addr` from being bound
    fn kill_process_on_port(&self, addr: SocketAddr) -> Result<(), SystemError>;
}

/// Probe that test-binds a UDP socket and finds holders with `ss`
pub struct SocketPortProbe {
    poll_interval: Duration,
}

impl SocketPortProbe {
    pub fn new() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    fn is_port_free(addr: SocketAddr) -> bool {
        match UdpSocket::bind(addr) {
            Ok(_) => true,
            Err(e) if e.kind() == ErrorKind::AddrInUse => false,
            Err(e) => {
                // Without the right to bind we cannot tell; let the service find out.
                debug!("Cannot probe {}: {}", addr, e);
                true
            }
        }
    }
}

impl Default for SocketPortProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl PortProbe for SocketPortProbe {
    fn wait_for_port_available(&self, addr: SocketAddr, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if Self::is_port_free(addr) {
                return true;
            }
            if Instant::now() >= deadline {
                debug!("{} still busy after {:?}", addr, timeout);
                return false;
            }
            thread::sleep(self.poll_interval);
        }
    }

    fn kill_process_on_port(&self, addr: SocketAddr) -> Result<(), SystemError> {
        let filter = format!("sport = :{}", addr.port());
        let output = command::run("ss", &["-H", "-l", "-u", "-n", "-p", &filter])?;
        let listing = String::from_utf8_lossy(&output.stdout);

        let pids = conflicting_pids(&listing, addr);
        if pids.is_empty() {
            debug!("No process found holding {}", addr);
            return Ok(());
        }
        for pid in &pids {
            command::run("kill", &["-KILL", &pid.to_string()])?;
        }
        info!(pids = ?pids, "Killed processes holding {}", addr);
        Ok(())
    }
}

/// Pids from `ss -H -l -u -n -p` output whose sockets conflict with binding `addr`
///
/// A socket conflicts when it is on the same port and either side is a
/// wildcard address or both addresses are equal. A resolver stub on
/// 127.0.0.53 does not conflict with a tunnel bound to the external address.
pub fn conflicting_pids(listing: &str, addr: SocketAddr) -> BTreeSet<u32> {
    let mut pids = BTreeSet::new();
    for line in listing.lines() {
        let mut fields = line.split_whitespace();
        let Some(local) = fields.nth(3) else {
            continue;
        };
        let Some((host, port)) = local.rsplit_once(':') else {
            continue;
        };
        if port.parse::<u16>().ok() != Some(addr.port()) {
            continue;
        }
        let holder = parse_socket_host(host);
        let conflicts = addr.ip().is_unspecified()
            || holder.map_or(true, |ip| ip.is_unspecified() || ip == addr.ip());
        if !conflicts {
            continue;
        }

        let mut rest = line;
        while let Some(start) = rest.find("pid=") {
            rest = &rest[start + 4..];
            let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
            if let Ok(pid) = digits.parse() {
                pids.insert(pid);
            }
        }
    }
    pids
}

/// `*`, `0.0.0.0`, `[::]`, `127.0.0.53%lo`
fn parse_socket_host(host: &str) -> Option<IpAddr> {
    let host = host.split('%').next().unwrap_or(host);
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host == "*" {
        return Some(IpAddr::from([0u8, 0, 0, 0]));
    }
    host.parse().ok()
}
