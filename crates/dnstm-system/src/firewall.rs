//! Firewall control for the privileged DNS port
//!
//! Only two operations are needed: make sure port 53 is accepted, and drop
//! any NAT redirects on port 53 so that whichever process binds the port
//! receives the queries directly.

use tracing::{debug, info, warn};

use crate::command;
use crate::error::SystemError;
use crate::probe::DNS_PORT;

pub trait Firewall: Send + Sync {
    /// Accept inbound UDP and TCP on the DNS port
    fn allow_privileged_port(&self) -> Result<(), SystemError>;
    /// Delete PREROUTING redirects that target the DNS port
    fn clear_nat_rules(&self) -> Result<(), SystemError>;
}

/// iptables-backed firewall controller
///
/// Hosts without iptables are treated as having no firewall: both
/// operations log a warning and succeed.
pub struct IptablesFirewall {
    program: String,
    port: u16,
}

impl IptablesFirewall {
    pub fn new() -> Self {
        Self::with_program("iptables", DNS_PORT)
    }

    pub fn with_program(program: impl Into<String>, port: u16) -> Self {
        Self {
            program: program.into(),
            port,
        }
    }

    fn rule_args(&self, protocol: &str) -> Vec<String> {
        vec![
            "INPUT".to_string(),
            "-p".to_string(),
            protocol.to_string(),
            "--dport".to_string(),
            self.port.to_string(),
            "-j".to_string(),
            "ACCEPT".to_string(),
        ]
    }

    fn iptables(&self, args: &[String]) -> Result<(), SystemError> {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        command::run(&self.program, &args).map(|_| ())
    }
}

impl Default for IptablesFirewall {
    fn default() -> Self {
        Self::new()
    }
}

impl Firewall for IptablesFirewall {
    fn allow_privileged_port(&self) -> Result<(), SystemError> {
        for protocol in ["udp", "tcp"] {
            let rule = self.rule_args(protocol);

            let mut check = vec!["-C".to_string()];
            check.extend(rule.iter().cloned());
            match self.iptables(&check) {
                Ok(()) => {
                    debug!("{} port {} already allowed", protocol, self.port);
                    continue;
                }
                Err(e) if command::is_missing_binary(&e) => {
                    warn!("{} not found, skipping firewall setup", self.program);
                    return Ok(());
                }
                Err(_) => {}
            }

            let mut insert = vec!["-I".to_string()];
            insert.extend(rule);
            self.iptables(&insert)?;
            info!("Allowed {} port {} through the firewall", protocol, self.port);
        }
        Ok(())
    }

    fn clear_nat_rules(&self) -> Result<(), SystemError> {
        let listing = match command::run(&self.program, &["-t", "nat", "-S", "PREROUTING"]) {
            Ok(output) => String::from_utf8_lossy(&output.stdout).to_string(),
            Err(e) if command::is_missing_binary(&e) => {
                warn!("{} not found, skipping NAT cleanup", self.program);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        for rule in dns_redirect_rules(&listing, self.port) {
            let mut args = vec!["-t".to_string(), "nat".to_string()];
            args.extend(rule);
            self.iptables(&args)?;
        }
        Ok(())
    }
}

/// Turn `-A PREROUTING ...` lines redirecting the DNS port into delete commands
fn dns_redirect_rules(listing: &str, port: u16) -> Vec<Vec<String>> {
    let dport = port.to_string();
    listing
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.first() != Some(&"-A") || parts.get(1) != Some(&"PREROUTING") {
                return None;
            }
            let targets_port = parts
                .windows(2)
                .any(|w| w[0] == "--dport" && w[1] == dport);
            let redirects = parts.iter().any(|p| *p == "REDIRECT" || *p == "DNAT");
            if !targets_port || !redirects || line.contains('"') {
                return None;
            }

            let mut rule = vec!["-D".to_string()];
            rule.extend(parts[1..].iter().map(|p| p.to_string()));
            Some(rule)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dns_redirect_rules() {
        let listing = "\
-P PREROUTING ACCEPT
-A PREROUTING -i eth0 -p udp -m udp --dport 53 -j REDIRECT --to-ports 5310
-A PREROUTING -p tcp -m tcp --dport 80 -j REDIRECT --to-ports 8080
-A PREROUTING -p udp -m udp --dport 53 -j DNAT --to-destination 127.0.0.1:5311
-A PREROUTING -p udp -m udp --dport 5353 -j REDIRECT --to-ports 5310
";
        let rules = dns_redirect_rules(listing, 53);
        assert_eq!(rules.len(), 2);
        assert_eq!(
            rules[0].join(" "),
            "-D PREROUTING -i eth0 -p udp -m udp --dport 53 -j REDIRECT --to-ports 5310"
        );
        assert!(rules[1].join(" ").contains("DNAT"));
    }

    #[test]
    fn test_missing_iptables_is_not_an_error() {
        let firewall = IptablesFirewall::with_program("dnstm-no-such-iptables", 53);
        assert!(firewall.allow_privileged_port().is_ok());
        assert!(firewall.clear_nat_rules().is_ok());
    }
}
