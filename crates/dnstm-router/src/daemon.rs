//! The router as a supervised service

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use dnstm_system::{ManagedService, ServiceManager, ServiceSpec, ServiceState};

use crate::error::RouterError;
use crate::table::RouteTable;

/// Service name of the DNS router
pub const ROUTER_SERVICE_NAME: &str = "dnstm-dnsrouter";

/// Routing table file name inside the state directory
pub const ROUTE_TABLE_FILE: &str = "dnsrouter.yaml";

/// Operations the orchestrator needs from the DNS-routing daemon
pub trait RoutingDaemon: Send + Sync {
    /// Install the service definition
    fn create_service(&self) -> Result<(), RouterError>;
    fn start(&self) -> Result<(), RouterError>;
    fn stop(&self) -> Result<(), RouterError>;
    fn restart(&self) -> Result<(), RouterError>;
    fn remove(&self) -> Result<(), RouterError>;
    fn is_active(&self) -> bool;
    fn is_service_installed(&self) -> bool;
    fn save_routing_table(&self, table: &RouteTable) -> Result<(), RouterError>;
    fn state(&self) -> ServiceState;
}

/// Router run as `<program> dnsrouter serve --routes <table>`
pub struct DnsRouterService {
    service: ManagedService,
    program: PathBuf,
    table_path: PathBuf,
}

impl DnsRouterService {
    pub fn new(
        manager: Arc<dyn ServiceManager>,
        program: impl Into<PathBuf>,
        state_dir: &Path,
    ) -> Self {
        Self {
            service: ManagedService::new(ROUTER_SERVICE_NAME, manager),
            program: program.into(),
            table_path: state_dir.join(ROUTE_TABLE_FILE),
        }
    }

    pub fn table_path(&self) -> &Path {
        &self.table_path
    }

    pub fn service_spec(&self) -> ServiceSpec {
        ServiceSpec::new(
            ROUTER_SERVICE_NAME,
            "dnstm DNS router",
            vec![
                self.program.to_string_lossy().to_string(),
                "dnsrouter".to_string(),
                "serve".to_string(),
                "--routes".to_string(),
                self.table_path.to_string_lossy().to_string(),
            ],
        )
        .with_privileged_bind(true)
    }
}

impl RoutingDaemon for DnsRouterService {
    fn create_service(&self) -> Result<(), RouterError> {
        self.service.create(&self.service_spec())?;
        info!("Installed DNS router service");
        Ok(())
    }

    fn start(&self) -> Result<(), RouterError> {
        self.service.enable()?;
        self.service.start()?;
        Ok(())
    }

    fn stop(&self) -> Result<(), RouterError> {
        if self.service.is_installed() {
            self.service.stop()?;
            self.service.disable()?;
        }
        Ok(())
    }

    fn restart(&self) -> Result<(), RouterError> {
        self.service.restart()?;
        Ok(())
    }

    fn remove(&self) -> Result<(), RouterError> {
        self.service.remove()?;
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.service.is_active()
    }

    fn is_service_installed(&self) -> bool {
        self.service.is_installed()
    }

    fn save_routing_table(&self, table: &RouteTable) -> Result<(), RouterError> {
        table.save(&self.table_path)
    }

    fn state(&self) -> ServiceState {
        self.service.state()
    }
}
