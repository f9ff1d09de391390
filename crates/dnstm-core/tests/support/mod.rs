//! Recording fake host for orchestrator tests
//!
//! Every collaborator call is appended to an operation log such as
//! `start:dnstm-alpha` or `firewall:clear_nat`. `fail_on(op)` makes every
//! call with that name fail.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use dnstm_config::{Config, ConfigStore, TransportKind};
use dnstm_core::{Host, Orchestrator, PortWait};
use dnstm_router::{DnsRouterService, RouteTable, ROUTE_TABLE_FILE};
use dnstm_system::{
    AddressResolver, CertificateIssuer, Firewall, KeyMaterial, PortProbe, ServiceManager,
    ServiceSpec, SystemError,
};
use tempfile::TempDir;

#[derive(Default)]
struct State {
    operations: Vec<String>,
    fail_on: HashSet<String>,
    units: BTreeMap<String, ServiceSpec>,
    active: BTreeSet<String>,
    enabled: BTreeSet<String>,
    port_busy: bool,
    port_busy_after_kill: bool,
    probed: Vec<SocketAddr>,
}

#[derive(Clone, Default)]
pub struct FakeHost {
    state: Arc<Mutex<State>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn step(&self, operation: String) -> Result<(), SystemError> {
        let mut state = self.lock();
        let fail = state.fail_on.contains(&operation);
        state.operations.push(operation.clone());
        if fail {
            return Err(SystemError::Other(format!("injected failure at {}", operation)));
        }
        Ok(())
    }

    pub fn fail_on(&self, operation: &str) -> &Self {
        self.lock().fail_on.insert(operation.to_string());
        self
    }

    pub fn clear_failures(&self) {
        self.lock().fail_on.clear();
    }

    /// Something else holds the DNS port; `after_kill` keeps it held after a kill
    pub fn occupy_dns_port(&self, after_kill: bool) {
        let mut state = self.lock();
        state.port_busy = true;
        state.port_busy_after_kill = after_kill;
    }

    /// Every address the orchestrator waited on, in order
    pub fn probed_addresses(&self) -> Vec<SocketAddr> {
        self.lock().probed.clone()
    }

    pub fn operations(&self) -> Vec<String> {
        self.lock().operations.clone()
    }

    pub fn clear_operations(&self) {
        self.lock().operations.clear();
    }

    pub fn count(&self, operation: &str) -> usize {
        self.lock().operations.iter().filter(|o| *o == operation).count()
    }

    /// Index of the first occurrence of `operation`
    pub fn position(&self, operation: &str) -> Option<usize> {
        self.lock().operations.iter().position(|o| o == operation)
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.lock().active.contains(name)
    }

    pub fn is_enabled_unit(&self, name: &str) -> bool {
        self.lock().enabled.contains(name)
    }

    pub fn running(&self) -> BTreeSet<String> {
        self.lock().active.clone()
    }

    pub fn unit(&self, name: &str) -> Option<ServiceSpec> {
        self.lock().units.get(name).cloned()
    }

    /// Unit command line joined with spaces
    pub fn command_line(&self, name: &str) -> String {
        self.unit(name).map(|u| u.command.join(" ")).unwrap_or_default()
    }

    pub fn host(&self, state_dir: &Path) -> Host {
        let services: Arc<dyn ServiceManager> = Arc::new(self.clone());
        Host {
            services: services.clone(),
            firewall: Arc::new(self.clone()),
            ports: Arc::new(self.clone()),
            address: Arc::new(self.clone()),
            certs: Arc::new(self.clone()),
            router: Arc::new(DnsRouterService::new(
                services,
                "/usr/local/bin/dnstm",
                state_dir,
            )),
        }
    }
}

impl ServiceManager for FakeHost {
    fn create(&self, spec: &ServiceSpec) -> Result<(), SystemError> {
        self.step(format!("create:{}", spec.name))?;
        self.lock().units.insert(spec.name.clone(), spec.clone());
        Ok(())
    }

    fn start(&self, name: &str) -> Result<(), SystemError> {
        self.step(format!("start:{}", name))?;
        let mut state = self.lock();
        if !state.units.contains_key(name) {
            return Err(SystemError::NotInstalled(name.to_string()));
        }
        state.active.insert(name.to_string());
        Ok(())
    }

    fn stop(&self, name: &str) -> Result<(), SystemError> {
        self.step(format!("stop:{}", name))?;
        self.lock().active.remove(name);
        Ok(())
    }

    fn restart(&self, name: &str) -> Result<(), SystemError> {
        self.step(format!("restart:{}", name))?;
        let mut state = self.lock();
        if !state.units.contains_key(name) {
            return Err(SystemError::NotInstalled(name.to_string()));
        }
        state.active.insert(name.to_string());
        Ok(())
    }

    fn enable(&self, name: &str) -> Result<(), SystemError> {
        self.step(format!("enable:{}", name))?;
        self.lock().enabled.insert(name.to_string());
        Ok(())
    }

    fn disable(&self, name: &str) -> Result<(), SystemError> {
        self.step(format!("disable:{}", name))?;
        self.lock().enabled.remove(name);
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), SystemError> {
        self.step(format!("remove:{}", name))?;
        let mut state = self.lock();
        if state.units.remove(name).is_none() {
            return Err(SystemError::NotInstalled(name.to_string()));
        }
        state.active.remove(name);
        state.enabled.remove(name);
        Ok(())
    }

    fn is_active(&self, name: &str) -> bool {
        self.lock().active.contains(name)
    }

    fn is_enabled(&self, name: &str) -> bool {
        self.lock().enabled.contains(name)
    }

    fn is_installed(&self, name: &str) -> bool {
        self.lock().units.contains_key(name)
    }

    fn logs(&self, name: &str, lines: usize) -> Result<String, SystemError> {
        self.step(format!("logs:{}", name))?;
        Ok(format!("{} lines of {}", lines, name))
    }

    fn status(&self, name: &str) -> Result<String, SystemError> {
        Ok(format!("{} status", name))
    }
}

impl Firewall for FakeHost {
    fn allow_privileged_port(&self) -> Result<(), SystemError> {
        self.step("firewall:allow".to_string())
    }

    fn clear_nat_rules(&self) -> Result<(), SystemError> {
        self.step("firewall:clear_nat".to_string())
    }
}

impl PortProbe for FakeHost {
    fn wait_for_port_available(&self, addr: SocketAddr, _timeout: Duration) -> bool {
        let mut state = self.lock();
        state.operations.push(format!("port:wait:{}", addr.port()));
        state.probed.push(addr);
        !state.port_busy
    }

    fn kill_process_on_port(&self, addr: SocketAddr) -> Result<(), SystemError> {
        self.step(format!("port:kill:{}", addr.port()))?;
        let mut state = self.lock();
        state.port_busy = state.port_busy_after_kill;
        Ok(())
    }
}

impl AddressResolver for FakeHost {
    fn detect_external_ip(&self) -> Result<IpAddr, SystemError> {
        Ok("203.0.113.10".parse().unwrap())
    }
}

impl CertificateIssuer for FakeHost {
    fn get_or_create(
        &self,
        domain: &str,
        transport: TransportKind,
    ) -> Result<KeyMaterial, SystemError> {
        self.step(format!("certs:{}", domain))?;
        let dir = PathBuf::from("/var/lib/dnstm-test");
        Ok(KeyMaterial {
            cert_path: dir.join(format!("{}.crt", domain)),
            key_path: dir.join(format!("{}.key", domain)),
            fingerprint: format!("{}-{}", transport, domain),
        })
    }
}

/// A temp state directory with a config file and a fake host
pub struct Fixture {
    pub dir: TempDir,
    pub fake: FakeHost,
}

impl Fixture {
    pub fn new(config: &Config) -> Self {
        let dir = TempDir::new().unwrap();
        let fixture = Self {
            dir,
            fake: FakeHost::new(),
        };
        fixture.store().save(config).unwrap();
        fixture
    }

    pub fn store(&self) -> ConfigStore {
        ConfigStore::new(self.dir.path().join("config.json"))
    }

    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::load(self.store(), self.fake.host(self.dir.path()))
            .unwrap()
            .with_port_wait(PortWait {
                timeout: Duration::from_millis(1),
                retry_timeout: Duration::from_millis(1),
            })
    }

    pub fn saved(&self) -> Config {
        self.store().load().unwrap()
    }

    pub fn config_bytes(&self) -> Vec<u8> {
        std::fs::read(self.store().path()).unwrap()
    }

    pub fn route_table(&self) -> RouteTable {
        RouteTable::load(&self.dir.path().join(ROUTE_TABLE_FILE)).unwrap()
    }
}
