//! Topology orchestration
//!
//! The orchestrator owns the loaded configuration and one
//! [`ManagedService`] per tunnel. Every operation validates first, then
//! drives the host, then persists the configuration.
//!
//! Topology switches and active-tunnel switches capture a [`ModeSnapshot`]
//! before touching anything. If a step after the snapshot fails, the
//! topology and the active/default tags are restored, the services that
//! were running are started again on a best-effort basis, and the original
//! failure is returned wrapped in [`Error::ModeSwitch`].

use std::collections::{BTreeMap, BTreeSet};
use std::net::{Ipv4Addr, SocketAddr};
use tracing::{debug, info, warn};

use dnstm_config::{
    generate_unique_tag, normalize_domain, normalize_tag, validate_tag, BackendConfig,
    BackendKind, Config, ConfigError, ConfigStore, Enablement, PortAllocator, Topology,
    TransportKind, TunnelConfig,
};
use dnstm_router::{tunnel_upstream, RouteConfigBuilder, RouteTable, ROUTER_SERVICE_NAME};
use dnstm_system::{ManagedService, ServiceState, DNS_PORT};

use crate::bind::{BindOptions, BindResolver};
use crate::error::{Error, Result};
use crate::host::{Host, PortWait};
use crate::report::{AddedTunnel, Report, StatusReport, TunnelStatus};
use crate::transport::{service_name, tunnel_service_spec};

/// Request to add a tunnel; unset fields are allocated
#[derive(Debug, Clone)]
pub struct NewTunnel {
    pub tag: Option<String>,
    pub transport: TransportKind,
    pub backend: String,
    pub domain: String,
    pub port: Option<u16>,
    pub mtu: Option<u16>,
}

impl NewTunnel {
    pub fn new(
        transport: TransportKind,
        backend: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            tag: None,
            transport,
            backend: backend.into(),
            domain: domain.into(),
            port: None,
            mtu: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_mtu(mut self, mtu: u16) -> Self {
        self.mtu = Some(mtu);
        self
    }
}

/// State captured before a topology switch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeSnapshot {
    pub topology: Topology,
    pub active: String,
    pub default: String,
    /// Service names that were active when the switch began
    pub running_services: BTreeSet<String>,
}

pub struct Orchestrator {
    config: Config,
    store: ConfigStore,
    host: Host,
    bind: BindResolver,
    services: BTreeMap<String, ManagedService>,
    port_wait: PortWait,
}

impl Orchestrator {
    pub fn new(config: Config, store: ConfigStore, host: Host) -> Self {
        let services = config
            .tunnels
            .iter()
            .map(|t| {
                (
                    t.tag.clone(),
                    ManagedService::new(service_name(&t.tag), host.services.clone()),
                )
            })
            .collect();

        Self {
            bind: BindResolver::new(host.address.clone()),
            config,
            store,
            host,
            services,
            port_wait: PortWait::default(),
        }
    }

    /// Load the configuration from `store` and build an orchestrator over it
    pub fn load(store: ConfigStore, host: Host) -> Result<Self> {
        let config = store.load()?;
        Ok(Self::new(config, store, host))
    }

    pub fn with_port_wait(mut self, port_wait: PortWait) -> Self {
        self.port_wait = port_wait;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ---- lifecycle of the current topology ----

    /// Bring the current topology up, regenerating services from configuration
    pub fn start(&mut self) -> Result<Report> {
        let mut report = Report::new();
        match self.config.topology() {
            Topology::Single => {
                let active = self.config.route.active.clone();
                if active.is_empty() {
                    return Err(Error::validation(
                        "No active tunnel; select one with `dnstm switch <tag>`",
                    ));
                }
                self.tunnel(&active)?;

                // Regenerating stops the tunnel, so a running one releases the port first
                self.host.router.stop()?;
                self.regenerate_tunnel(&active, Topology::Single)?;
                self.free_dns_port(self.single_bind_addr(&active)?)?;
                self.prepare_firewall(&mut report);
                self.start_tunnel(&active)?;
                info!(tag = %active, "Started single topology");
            }
            Topology::Multi => {
                self.prepare_firewall(&mut report);
                for tag in self.enabled_tags() {
                    self.regenerate_tunnel(&tag, Topology::Multi)?;
                    self.start_tunnel(&tag)?;
                }
                self.install_router()?;
                if self.host.router.is_active() {
                    self.host.router.restart()?;
                } else {
                    self.free_dns_port(self.router_listen_addr())?;
                    self.host.router.start()?;
                }
                info!("Started multi topology");
            }
        }
        Ok(report)
    }

    /// Stop the router and every tunnel
    pub fn stop(&mut self) -> Result<Report> {
        let report = Report::new();
        self.host.router.stop()?;
        for tag in self.tags() {
            self.stop_tunnel(&tag)?;
        }
        info!("Stopped all services");
        Ok(report)
    }

    pub fn restart(&mut self) -> Result<Report> {
        let mut report = self.stop()?;
        report.merge(self.start()?);
        Ok(report)
    }

    // ---- topology switch ----

    pub fn switch_topology(&mut self, target: Topology) -> Result<Report> {
        if self.config.topology() == target {
            info!("Already in {} mode", target);
            return Ok(Report::new());
        }

        match target {
            Topology::Multi => self.switch_to_multi(),
            Topology::Single => self.switch_to_single(),
        }
    }

    fn switch_to_multi(&mut self) -> Result<Report> {
        if let Some((domain, first, second)) = self.config.find_duplicate_domain() {
            return Err(Error::Validation(format!(
                "Tunnels '{}' and '{}' share domain {}; multi mode routes by domain",
                first, second, domain
            )));
        }

        let snapshot = self.snapshot();
        let mut report = Report::new();
        match self.try_switch_to_multi(&mut report) {
            Ok(()) => {
                info!("Switched to multi mode");
                Ok(report)
            }
            Err(reason) => Err(self.rollback(snapshot, reason)),
        }
    }

    fn try_switch_to_multi(&mut self, report: &mut Report) -> Result<()> {
        let previous_active = self.config.route.active.clone();
        if !previous_active.is_empty() {
            self.stop_tunnel(&previous_active)?;
        }

        self.free_dns_port(self.router_listen_addr())?;
        self.host.firewall.clear_nat_rules()?;
        self.host.firewall.allow_privileged_port()?;

        self.config.route.mode = Topology::Multi;
        if self.config.route.default.is_empty() {
            self.config.route.default = if self.config.tunnel(&previous_active).is_some() {
                previous_active
            } else {
                self.first_enabled_tag().unwrap_or_default()
            };
        }

        let enabled = self.enabled_tags();
        if enabled.is_empty() {
            report.warn("No enabled tunnels; the DNS router starts with an empty table");
        }
        for tag in &enabled {
            self.regenerate_tunnel(tag, Topology::Multi)?;
        }
        self.install_router()?;

        self.persist()?;

        for tag in &enabled {
            self.start_tunnel(tag)?;
        }
        self.host.router.start()?;
        Ok(())
    }

    fn switch_to_single(&mut self) -> Result<Report> {
        let target = self.pick_single_target()?;

        let snapshot = self.snapshot();
        match self.try_switch_to_single(&target) {
            Ok(()) => {
                info!(tag = %target, "Switched to single mode");
                Ok(Report::new())
            }
            Err(reason) => Err(self.rollback(snapshot, reason)),
        }
    }

    /// Tunnel to activate when entering single topology
    ///
    /// Keeps the current active tunnel if it is usable, then tries the
    /// default route, then the first enabled tunnel.
    fn pick_single_target(&self) -> Result<String> {
        let usable = |tag: &str| self.config.tunnel(tag).map_or(false, |t| t.is_enabled());

        [&self.config.route.active, &self.config.route.default]
            .into_iter()
            .find(|tag| usable(tag))
            .cloned()
            .or_else(|| self.first_enabled_tag())
            .ok_or_else(|| Error::validation("No enabled tunnel to activate in single mode"))
    }

    fn try_switch_to_single(&mut self, target: &str) -> Result<()> {
        self.host.router.stop()?;
        for tag in self.tags() {
            self.stop_tunnel(&tag)?;
        }

        self.free_dns_port(self.single_bind_addr(target)?)?;
        self.host.firewall.clear_nat_rules()?;
        self.host.firewall.allow_privileged_port()?;

        self.config.route.mode = Topology::Single;
        self.config.route.active = target.to_string();
        self.regenerate_tunnel(target, Topology::Single)?;

        self.persist()?;

        self.start_tunnel(target)?;
        Ok(())
    }

    /// Capture what a failed switch must restore
    pub fn snapshot(&self) -> ModeSnapshot {
        let mut running_services: BTreeSet<String> = self
            .services
            .values()
            .filter(|s| s.is_active())
            .map(|s| s.name().to_string())
            .collect();
        if self.host.router.is_active() {
            running_services.insert(ROUTER_SERVICE_NAME.to_string());
        }

        ModeSnapshot {
            topology: self.config.route.mode,
            active: self.config.route.active.clone(),
            default: self.config.route.default.clone(),
            running_services,
        }
    }

    /// Restore `snapshot` after a failed switch and wrap `reason`
    ///
    /// Failures while restoring are logged only; the returned error always
    /// carries the original reason.
    fn rollback(&mut self, snapshot: ModeSnapshot, reason: Error) -> Error {
        warn!("Mode switch failed: {}; rolling back", reason);

        self.config.route.mode = snapshot.topology;
        self.config.route.active = snapshot.active.clone();
        self.config.route.default = snapshot.default.clone();

        // Anything the switch started or enabled that was not running before goes down first
        if !snapshot.running_services.contains(ROUTER_SERVICE_NAME)
            && self.host.router.is_service_installed()
        {
            if let Err(e) = self.host.router.stop() {
                warn!("Rollback: failed to stop DNS router: {}", e);
            }
        }
        for (tag, service) in &self.services {
            let touched = service.is_active() || service.is_enabled();
            if touched && !snapshot.running_services.contains(service.name()) {
                if let Err(e) = self.stop_tunnel(tag) {
                    warn!("Rollback: failed to stop {}: {}", service.name(), e);
                }
            }
        }

        let tags: Vec<String> = self
            .services
            .iter()
            .filter(|(_, s)| snapshot.running_services.contains(s.name()))
            .map(|(tag, _)| tag.clone())
            .collect();
        for tag in tags {
            if let Err(e) = self.regenerate_tunnel(&tag, snapshot.topology) {
                warn!(tag = %tag, "Rollback: failed to regenerate service: {}", e);
            }
            if let Err(e) = self.start_tunnel(&tag) {
                warn!(tag = %tag, "Rollback: failed to restart service: {}", e);
            }
        }
        if snapshot.running_services.contains(ROUTER_SERVICE_NAME) {
            if let Err(e) = self.host.router.start() {
                warn!("Rollback: failed to restart DNS router: {}", e);
            }
        }

        if let Err(e) = self.persist() {
            warn!("Rollback: failed to save configuration: {}", e);
        }

        Error::ModeSwitch {
            reason: Box::new(reason),
        }
    }

    // ---- active tunnel ----

    /// Move the privileged port to another tunnel (single topology only)
    pub fn switch_active(&mut self, tag: &str) -> Result<Report> {
        if self.config.topology() != Topology::Single {
            return Err(Error::validation(
                "Switching the active tunnel is only possible in single mode",
            ));
        }
        let tunnel = self.tunnel(tag)?;
        if !tunnel.is_enabled() {
            return Err(Error::Validation(format!("Tunnel '{}' is disabled", tag)));
        }
        if self.config.route.active == tag {
            info!(tag = %tag, "Tunnel is already active");
            return Ok(Report::new());
        }

        let previous = self.config.route.active.clone();
        let snapshot = self.snapshot();
        match self.try_switch_active(&previous, tag) {
            Ok(()) => {
                info!(from = %previous, to = %tag, "Switched active tunnel");
                Ok(Report::new())
            }
            Err(reason) => Err(self.rollback(snapshot, reason)),
        }
    }

    fn try_switch_active(&mut self, previous: &str, tag: &str) -> Result<()> {
        if self.config.tunnel(previous).is_some() {
            // Rebinding to loopback releases the DNS port and leaves it stopped
            self.regenerate_tunnel(previous, Topology::Multi)?;
        }

        self.free_dns_port(self.single_bind_addr(tag)?)?;
        self.regenerate_tunnel(tag, Topology::Single)?;
        self.config.route.active = tag.to_string();
        self.persist()?;
        self.start_tunnel(tag)?;
        Ok(())
    }

    /// Select the tunnel the DNS router uses for unmatched queries
    pub fn set_default_route(&mut self, tag: &str) -> Result<Report> {
        let tunnel = self.tunnel(tag)?;
        if !tunnel.is_enabled() {
            return Err(Error::Validation(format!(
                "Tunnel '{}' is disabled and cannot be the default route",
                tag
            )));
        }

        self.config.route.default = tag.to_string();
        self.persist()?;

        let mut report = Report::new();
        if self.config.topology() == Topology::Multi {
            self.refresh_router(&mut report)?;
        }
        info!(tag = %tag, "Default route set");
        Ok(report)
    }

    // ---- tunnels ----

    pub fn add_tunnel(&mut self, request: NewTunnel) -> Result<AddedTunnel> {
        let mut report = Report::new();
        let topology = self.config.topology();
        let used_tags = self.config.used_tags();

        let tag = match &request.tag {
            Some(raw) => {
                let tag = normalize_tag(raw);
                validate_tag(&tag).map_err(|e| Error::Validation(e.to_string()))?;
                if used_tags.contains(&tag) {
                    return Err(Error::exists("tag", tag));
                }
                tag
            }
            None => generate_unique_tag(&used_tags),
        };

        if self.config.backend(&request.backend).is_none() {
            return Err(Error::not_found("backend", request.backend.clone()));
        }

        let domain = normalize_domain(&request.domain);
        if domain.is_empty() {
            return Err(Error::validation("Domain must not be empty"));
        }
        if let Some(owner) = self.config.domain_owner(&domain) {
            if topology == Topology::Multi {
                return Err(Error::exists("domain", domain));
            }
            report.warn(format!(
                "Domain {} is also used by '{}'; switching to multi mode requires unique domains",
                domain, owner
            ));
        }

        let used_ports = self.config.used_ports();
        let port = match request.port {
            Some(port) if port < 1024 => {
                return Err(Error::Validation(format!(
                    "Port {} is privileged; tunnel ports must be 1024 or above",
                    port
                )))
            }
            Some(port) if used_ports.contains(&port) => {
                return Err(Error::exists("port", port.to_string()))
            }
            Some(port) => port,
            None => PortAllocator::default()
                .allocate(&used_ports)
                .map_err(|e| match e {
                    ConfigError::PortsExhausted { .. } => Error::ResourceUnavailable(e.to_string()),
                    other => Error::Config(other),
                })?,
        };

        let tunnel = TunnelConfig {
            tag: tag.clone(),
            transport: request.transport,
            backend: request.backend.clone(),
            domain: domain.clone(),
            port,
            enabled: Enablement::Enabled,
            mtu: request.mtu.filter(|_| request.transport == TransportKind::Dnstt),
        };

        let material = self.host.certs.get_or_create(&domain, tunnel.transport)?;

        self.config.tunnels.push(tunnel.clone());
        let service = ManagedService::new(service_name(&tag), self.host.services.clone());
        self.services.insert(tag.clone(), service);

        if let Err(e) = self.regenerate_tunnel(&tag, topology) {
            self.config.tunnels.retain(|t| t.tag != tag);
            if let Some(service) = self.services.remove(&tag) {
                if let Err(cleanup) = service.remove() {
                    warn!(tag = %tag, "Failed to clean up service: {}", cleanup);
                }
            }
            return Err(e);
        }

        self.persist()?;

        if topology == Topology::Multi {
            if self.host.router.is_active() {
                self.start_tunnel(&tag)?;
            }
            self.refresh_router(&mut report)?;
        }

        info!(tag = %tag, domain = %domain, port, "Added tunnel");
        Ok(AddedTunnel {
            tunnel,
            material,
            report,
        })
    }

    pub fn remove_tunnel(&mut self, tag: &str) -> Result<Report> {
        self.tunnel(tag)?;
        let mut report = Report::new();

        if let Some(service) = self.services.get(tag) {
            service.remove()?;
        }
        self.services.remove(tag);
        self.config.tunnels.retain(|t| t.tag != tag);

        if self.config.route.active == tag {
            self.config.route.active.clear();
            if self.config.topology() == Topology::Single {
                report.warn(
                    "Removed the active tunnel; select a new one with `dnstm switch <tag>`",
                );
            }
        }
        if self.config.route.default == tag {
            self.config.route.default.clear();
        }

        self.persist()?;

        if self.config.topology() == Topology::Multi {
            self.refresh_router(&mut report)?;
        }

        info!(tag = %tag, "Removed tunnel");
        Ok(report)
    }

    pub fn enable_tunnel(&mut self, tag: &str) -> Result<Report> {
        self.set_enabled(tag, true)
    }

    pub fn disable_tunnel(&mut self, tag: &str) -> Result<Report> {
        self.set_enabled(tag, false)
    }

    fn set_enabled(&mut self, tag: &str, enabled: bool) -> Result<Report> {
        let tunnel = self.tunnel(tag)?;
        let mut report = Report::new();
        if tunnel.is_enabled() == enabled {
            debug!(tag = %tag, enabled, "Tunnel already in requested state");
            return Ok(report);
        }

        let topology = self.config.topology();
        if !enabled && topology == Topology::Single && self.config.route.active == tag {
            return Err(Error::Validation(format!(
                "Tunnel '{}' is active; switch to another tunnel before disabling it",
                tag
            )));
        }
        if !enabled && self.config.route.default == tag {
            report.warn(format!(
                "Tunnel '{}' is the default route; unmatched queries will be dropped",
                tag
            ));
        }

        if let Some(tunnel) = self.config.tunnel_mut(tag) {
            tunnel.enabled = Enablement::from(enabled);
        }

        if topology == Topology::Multi {
            if enabled {
                self.regenerate_tunnel(tag, Topology::Multi)?;
                if self.host.router.is_active() {
                    self.start_tunnel(tag)?;
                }
            } else {
                self.stop_tunnel(tag)?;
            }
        }

        self.persist()?;

        if topology == Topology::Multi {
            self.refresh_router(&mut report)?;
        }

        info!(tag = %tag, enabled, "Tunnel updated");
        Ok(report)
    }

    pub fn tunnel_logs(&self, tag: &str, lines: usize) -> Result<String> {
        self.tunnel(tag)?;
        let service = self.service(tag)?;
        Ok(service.tail_logs(lines)?)
    }

    // ---- backends ----

    pub fn add_backend(&mut self, tag: &str, kind: BackendKind, address: &str) -> Result<()> {
        let tag = normalize_tag(tag);
        validate_tag(&tag).map_err(|e| Error::Validation(e.to_string()))?;
        if self.config.used_tags().contains(&tag) {
            return Err(Error::exists("tag", tag));
        }
        validate_address(address)?;

        self.config.backends.push(BackendConfig {
            tag: tag.clone(),
            kind,
            address: address.trim().to_string(),
        });
        self.persist()?;
        info!(tag = %tag, kind = %kind, "Added backend");
        Ok(())
    }

    pub fn remove_backend(&mut self, tag: &str) -> Result<()> {
        if self.config.backend(tag).is_none() {
            return Err(Error::not_found("backend", tag));
        }
        let users: Vec<&str> = self
            .config
            .tunnels
            .iter()
            .filter(|t| t.backend == tag)
            .map(|t| t.tag.as_str())
            .collect();
        if !users.is_empty() {
            return Err(Error::Validation(format!(
                "Backend '{}' is used by: {}",
                tag,
                users.join(", ")
            )));
        }

        self.config.backends.retain(|b| b.tag != tag);
        self.persist()?;
        info!(tag = %tag, "Removed backend");
        Ok(())
    }

    // ---- inspection and teardown ----

    pub fn status(&self) -> StatusReport {
        let topology = self.config.topology();
        let tunnels = self
            .config
            .tunnels
            .iter()
            .map(|t| {
                let runs = match topology {
                    Topology::Single => self.config.route.active == t.tag,
                    Topology::Multi => t.is_enabled(),
                };
                let selected = match topology {
                    Topology::Single => self.config.route.active == t.tag,
                    Topology::Multi => self.config.route.default == t.tag,
                };
                TunnelStatus {
                    tag: t.tag.clone(),
                    transport: t.transport.to_string(),
                    backend: t.backend.clone(),
                    domain: t.domain.clone(),
                    port: t.port,
                    enabled: t.is_enabled(),
                    selected,
                    state: self
                        .services
                        .get(&t.tag)
                        .map_or(ServiceState::NotInstalled, |s| s.state()),
                    bind: runs.then(|| self.bind.resolve(t, topology)),
                }
            })
            .collect();

        StatusReport {
            topology,
            active: self.config.route.active.clone(),
            default: self.config.route.default.clone(),
            listen: self.config.listen.address.clone(),
            router: self.host.router.state(),
            tunnels,
        }
    }

    /// Remove every service dnstm installed; the configuration stays
    pub fn uninstall(&mut self) -> Result<Report> {
        let mut report = Report::new();

        for service in self.services.values() {
            if let Err(e) = service.remove() {
                report.warn(format!("Failed to remove {}: {}", service.name(), e));
            }
        }
        if let Err(e) = self.host.router.remove() {
            report.warn(format!("Failed to remove DNS router: {}", e));
        }
        if let Err(e) = self.host.firewall.clear_nat_rules() {
            report.warn(format!("Failed to clear NAT rules: {}", e));
        }

        info!("Uninstalled dnstm services");
        Ok(report)
    }

    // ---- helpers ----

    fn persist(&self) -> Result<()> {
        self.store.save(&self.config)?;
        Ok(())
    }

    fn tunnel(&self, tag: &str) -> Result<&TunnelConfig> {
        self.config
            .tunnel(tag)
            .ok_or_else(|| Error::not_found("tunnel", tag))
    }

    fn service(&self, tag: &str) -> Result<&ManagedService> {
        self.services
            .get(tag)
            .ok_or_else(|| Error::not_found("tunnel", tag))
    }

    fn tags(&self) -> Vec<String> {
        self.config.tunnels.iter().map(|t| t.tag.clone()).collect()
    }

    fn enabled_tags(&self) -> Vec<String> {
        self.config.enabled_tunnels().map(|t| t.tag.clone()).collect()
    }

    fn first_enabled_tag(&self) -> Option<String> {
        self.config.enabled_tunnels().next().map(|t| t.tag.clone())
    }

    fn bind_options(&self, tag: &str, topology: Topology) -> Result<BindOptions> {
        Ok(self.bind.resolve(self.tunnel(tag)?, topology))
    }

    /// Rewrite a tunnel's service for `topology`, leaving it stopped
    fn regenerate_tunnel(&self, tag: &str, topology: Topology) -> Result<()> {
        let tunnel = self.tunnel(tag)?;
        let backend = self
            .config
            .backend(&tunnel.backend)
            .ok_or_else(|| Error::not_found("backend", tunnel.backend.clone()))?;
        let bind = self.bind_options(tag, topology)?;
        let material = self.host.certs.get_or_create(&tunnel.domain, tunnel.transport)?;

        let spec = tunnel_service_spec(tunnel, backend, &bind, &material);
        self.service(tag)?.regenerate(&spec)?;
        debug!(tag = %tag, bind = %bind, "Regenerated tunnel service");
        Ok(())
    }

    fn start_tunnel(&self, tag: &str) -> Result<()> {
        let service = self.service(tag)?;
        service.enable()?;
        service.start()?;
        Ok(())
    }

    fn stop_tunnel(&self, tag: &str) -> Result<()> {
        let service = self.service(tag)?;
        if service.is_installed() {
            service.stop()?;
            service.disable()?;
        }
        Ok(())
    }

    /// Wait until `addr` can be bound, killing its holders once if needed
    fn free_dns_port(&self, addr: SocketAddr) -> Result<()> {
        let ports = &self.host.ports;
        if ports.wait_for_port_available(addr, self.port_wait.timeout) {
            return Ok(());
        }

        warn!("{} still in use, killing its holder", addr);
        if let Err(e) = ports.kill_process_on_port(addr) {
            warn!("Failed to kill process on {}: {}", addr, e);
        }

        if ports.wait_for_port_available(addr, self.port_wait.retry_timeout) {
            Ok(())
        } else {
            Err(Error::ResourceUnavailable(format!(
                "port {} is still in use",
                addr.port()
            )))
        }
    }

    /// Address a tunnel binds when it owns the DNS port
    fn single_bind_addr(&self, tag: &str) -> Result<SocketAddr> {
        Ok(self.bind_options(tag, Topology::Single)?.socket_addr())
    }

    /// Address the DNS router binds
    fn router_listen_addr(&self) -> SocketAddr {
        self.config
            .listen
            .address
            .parse()
            .unwrap_or_else(|_| SocketAddr::from((Ipv4Addr::UNSPECIFIED, DNS_PORT)))
    }

    /// Firewall setup outside a switch is best effort
    fn prepare_firewall(&self, report: &mut Report) {
        if let Err(e) = self.host.firewall.clear_nat_rules() {
            report.warn(format!("Failed to clear NAT rules: {}", e));
        }
        if let Err(e) = self.host.firewall.allow_privileged_port() {
            report.warn(format!("Failed to open port {}: {}", DNS_PORT, e));
        }
    }

    /// Routing table for the current tunnels and default route
    pub fn route_table(&self) -> RouteTable {
        let default = self
            .config
            .tunnel(&self.config.route.default)
            .filter(|t| t.is_enabled())
            .map(tunnel_upstream);
        RouteConfigBuilder::new(self.config.listen.address.clone())
            .build(&self.config.tunnels, default.as_deref())
    }

    fn install_router(&self) -> Result<()> {
        self.host.router.save_routing_table(&self.route_table())?;
        if !self.host.router.is_service_installed() {
            self.host.router.create_service()?;
        }
        Ok(())
    }

    /// Rewrite the routing table and restart the router if it runs
    fn refresh_router(&self, report: &mut Report) -> Result<()> {
        self.install_router()?;
        if self.host.router.is_active() {
            self.host.router.restart()?;
        } else {
            report.warn("DNS router is not running; start it with `dnstm start`");
        }
        Ok(())
    }
}

/// Backends are `host:port`
fn validate_address(address: &str) -> Result<()> {
    let address = address.trim();
    let valid = address
        .rsplit_once(':')
        .map_or(false, |(host, port)| {
            !host.is_empty() && port.parse::<u16>().map_or(false, |p| p != 0)
        });
    if valid {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "Invalid backend address '{}': expected host:port",
            address
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_address() {
        assert!(validate_address("127.0.0.1:1080").is_ok());
        assert!(validate_address("proxy.internal:22").is_ok());
        assert!(validate_address("[::1]:1080").is_ok());
        assert!(validate_address("127.0.0.1").is_err());
        assert!(validate_address(":1080").is_err());
        assert!(validate_address("host:0").is_err());
        assert!(validate_address("host:99999").is_err());
    }

    #[test]
    fn test_new_tunnel_builder() {
        let request = NewTunnel::new(TransportKind::Dnstt, "socks", "t.example.com")
            .with_tag("alpha")
            .with_port(5320)
            .with_mtu(1400);
        assert_eq!(request.tag.as_deref(), Some("alpha"));
        assert_eq!(request.port, Some(5320));
        assert_eq!(request.mtu, Some(1400));
    }
}
