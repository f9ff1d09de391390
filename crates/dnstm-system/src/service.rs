//! Service management through systemd
//!
//! [`ServiceManager`] is the raw OS service manager; [`ManagedService`] wraps
//! one named unit and adds the idempotent removal and the regenerate
//! primitive the orchestrator uses on every topology change.

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::command;
use crate::error::SystemError;

/// Default directory for system unit files
pub const SYSTEMD_UNIT_DIR: &str = "/etc/systemd/system";

/// Definition of a supervised process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    /// Unit name without the `.service` suffix
    pub name: String,
    pub description: String,
    /// Program followed by its arguments
    pub command: Vec<String>,
    /// Run as this user instead of root
    pub user: Option<String>,
    /// Grant CAP_NET_BIND_SERVICE so the process can bind port 53
    pub bind_privileged: bool,
}

impl ServiceSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            command,
            user: None,
            bind_privileged: false,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_privileged_bind(mut self, bind_privileged: bool) -> Self {
        self.bind_privileged = bind_privileged;
        self
    }

    /// Render the systemd unit file
    pub fn to_systemd_unit(&self) -> String {
        let exec_start = self
            .command
            .iter()
            .map(|arg| quote_arg(arg))
            .collect::<Vec<_>>()
            .join(" ");

        let mut service = format!("Type=simple\nExecStart={}\n", exec_start);
        if let Some(user) = &self.user {
            service.push_str(&format!("User={}\n", user));
        }
        if self.bind_privileged {
            service.push_str("AmbientCapabilities=CAP_NET_BIND_SERVICE\n");
            service.push_str("CapabilityBoundingSet=CAP_NET_BIND_SERVICE\n");
        }
        service.push_str("Restart=on-failure\nRestartSec=5s\n");

        format!(
            r#"[Unit]
Description={description}
After=network-online.target
Wants=network-online.target

[Service]
{service}
[Install]
WantedBy=multi-user.target
"#,
            description = self.description,
            service = service,
        )
    }
}

fn quote_arg(arg: &str) -> String {
    if arg.is_empty() || arg.chars().any(|c| c.is_whitespace() || c == '"' || c == '\\') {
        format!("\"{}\"", arg.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        arg.to_string()
    }
}

/// Observed state of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Running,
    Stopped,
    NotInstalled,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceState::Running => write!(f, "running"),
            ServiceState::Stopped => write!(f, "stopped"),
            ServiceState::NotInstalled => write!(f, "not installed"),
        }
    }
}

/// OS service manager operations, addressed by unit name
#[cfg_attr(test, mockall::automock)]
pub trait ServiceManager: Send + Sync {
    /// Write the unit definition (overwriting any previous one)
    fn create(&self, spec: &ServiceSpec) -> Result<(), SystemError>;
    fn start(&self, name: &str) -> Result<(), SystemError>;
    fn stop(&self, name: &str) -> Result<(), SystemError>;
    fn restart(&self, name: &str) -> Result<(), SystemError>;
    fn enable(&self, name: &str) -> Result<(), SystemError>;
    fn disable(&self, name: &str) -> Result<(), SystemError>;
    /// Delete the unit definition
    fn remove(&self, name: &str) -> Result<(), SystemError>;
    fn is_active(&self, name: &str) -> bool;
    fn is_enabled(&self, name: &str) -> bool;
    fn is_installed(&self, name: &str) -> bool;
    fn logs(&self, name: &str, lines: usize) -> Result<String, SystemError>;
    fn status(&self, name: &str) -> Result<String, SystemError>;
}

/// systemd implementation driving `systemctl` and `journalctl`
pub struct SystemdServiceManager {
    unit_dir: PathBuf,
}

impl SystemdServiceManager {
    pub fn new() -> Self {
        Self::with_unit_dir(SYSTEMD_UNIT_DIR)
    }

    pub fn with_unit_dir(unit_dir: impl Into<PathBuf>) -> Self {
        Self {
            unit_dir: unit_dir.into(),
        }
    }

    fn unit_path(&self, name: &str) -> PathBuf {
        self.unit_dir.join(format!("{}.service", name))
    }

    fn systemctl(&self, args: &[&str]) -> Result<(), SystemError> {
        command::run("systemctl", args).map(|_| ())
    }

    fn daemon_reload(&self) -> Result<(), SystemError> {
        self.systemctl(&["daemon-reload"])
    }

    fn query(&self, verb: &str, name: &str) -> String {
        match command::output("systemctl", &[verb, name]) {
            Ok(output) => String::from_utf8_lossy(&output.stdout).trim().to_string(),
            Err(e) => {
                debug!("systemctl {} {} failed: {}", verb, name, e);
                String::new()
            }
        }
    }

    fn require_installed(&self, name: &str) -> Result<(), SystemError> {
        if self.is_installed(name) {
            Ok(())
        } else {
            Err(SystemError::NotInstalled(name.to_string()))
        }
    }
}

impl Default for SystemdServiceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceManager for SystemdServiceManager {
    fn create(&self, spec: &ServiceSpec) -> Result<(), SystemError> {
        fs::create_dir_all(&self.unit_dir).map_err(|source| SystemError::Io {
            path: self.unit_dir.clone(),
            source,
        })?;

        let unit_path = self.unit_path(&spec.name);
        fs::write(&unit_path, spec.to_systemd_unit()).map_err(|source| SystemError::Io {
            path: unit_path.clone(),
            source,
        })?;

        self.daemon_reload()?;
        info!("Installed service unit {}", unit_path.display());
        Ok(())
    }

    fn start(&self, name: &str) -> Result<(), SystemError> {
        self.require_installed(name)?;
        self.systemctl(&["start", name])
    }

    fn stop(&self, name: &str) -> Result<(), SystemError> {
        self.systemctl(&["stop", name])
    }

    fn restart(&self, name: &str) -> Result<(), SystemError> {
        self.require_installed(name)?;
        self.systemctl(&["restart", name])
    }

    fn enable(&self, name: &str) -> Result<(), SystemError> {
        self.require_installed(name)?;
        self.systemctl(&["enable", name])
    }

    fn disable(&self, name: &str) -> Result<(), SystemError> {
        self.systemctl(&["disable", name])
    }

    fn remove(&self, name: &str) -> Result<(), SystemError> {
        let unit_path = self.unit_path(name);
        if !unit_path.exists() {
            return Err(SystemError::NotInstalled(name.to_string()));
        }

        fs::remove_file(&unit_path).map_err(|source| SystemError::Io {
            path: unit_path.clone(),
            source,
        })?;
        self.daemon_reload()?;
        command::run_allow_failure("systemctl", &["reset-failed", name]);
        Ok(())
    }

    fn is_active(&self, name: &str) -> bool {
        self.query("is-active", name) == "active"
    }

    fn is_enabled(&self, name: &str) -> bool {
        self.query("is-enabled", name) == "enabled"
    }

    fn is_installed(&self, name: &str) -> bool {
        self.unit_path(name).exists()
    }

    fn logs(&self, name: &str, lines: usize) -> Result<String, SystemError> {
        let lines = lines.to_string();
        let output = command::run("journalctl", &["-u", name, "-n", &lines, "--no-pager"])?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn status(&self, name: &str) -> Result<String, SystemError> {
        // `systemctl status` exits non-zero for stopped units; the text is still wanted.
        let output = command::output("systemctl", &["status", name, "--no-pager"])?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Lifecycle wrapper around one named service
#[derive(Clone)]
pub struct ManagedService {
    name: String,
    manager: Arc<dyn ServiceManager>,
}

impl ManagedService {
    pub fn new(name: impl Into<String>, manager: Arc<dyn ServiceManager>) -> Self {
        Self {
            name: name.into(),
            manager,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Install the definition; `spec.name` must be this service's name
    pub fn create(&self, spec: &ServiceSpec) -> Result<(), SystemError> {
        if spec.name != self.name {
            return Err(SystemError::Other(format!(
                "Service spec '{}' does not belong to service '{}'",
                spec.name, self.name
            )));
        }
        self.manager.create(spec)
    }

    pub fn start(&self) -> Result<(), SystemError> {
        self.manager.start(&self.name)
    }

    pub fn stop(&self) -> Result<(), SystemError> {
        self.manager.stop(&self.name)
    }

    pub fn restart(&self) -> Result<(), SystemError> {
        self.manager.restart(&self.name)
    }

    pub fn enable(&self) -> Result<(), SystemError> {
        self.manager.enable(&self.name)
    }

    pub fn disable(&self) -> Result<(), SystemError> {
        self.manager.disable(&self.name)
    }

    /// Stop, disable and delete the unit; removing a missing unit succeeds
    pub fn remove(&self) -> Result<(), SystemError> {
        if !self.manager.is_installed(&self.name) {
            debug!("Service {} already removed", self.name);
            return Ok(());
        }

        if let Err(e) = self.manager.stop(&self.name) {
            if !e.is_not_installed() {
                warn!("Failed to stop {} before removal: {}", self.name, e);
            }
        }
        if let Err(e) = self.manager.disable(&self.name) {
            if !e.is_not_installed() {
                warn!("Failed to disable {} before removal: {}", self.name, e);
            }
        }

        match self.manager.remove(&self.name) {
            Err(e) if e.is_not_installed() => Ok(()),
            other => other,
        }
    }

    /// Replace the definition, leaving the service stopped
    ///
    /// The enabled flag is cleared too; callers enable and start the service
    /// again when the new binding should go live.
    pub fn regenerate(&self, spec: &ServiceSpec) -> Result<(), SystemError> {
        if self.manager.is_active(&self.name) {
            self.manager.stop(&self.name)?;
        }
        self.remove()?;
        self.create(spec)
    }

    pub fn is_active(&self) -> bool {
        self.manager.is_active(&self.name)
    }

    pub fn is_enabled(&self) -> bool {
        self.manager.is_enabled(&self.name)
    }

    pub fn is_installed(&self) -> bool {
        self.manager.is_installed(&self.name)
    }

    pub fn state(&self) -> ServiceState {
        if !self.is_installed() {
            ServiceState::NotInstalled
        } else if self.is_active() {
            ServiceState::Running
        } else {
            ServiceState::Stopped
        }
    }

    pub fn tail_logs(&self, lines: usize) -> Result<String, SystemError> {
        self.manager.logs(&self.name, lines)
    }

    pub fn status_text(&self) -> Result<String, SystemError> {
        self.manager.status(&self.name)
    }
}

impl fmt::Debug for ManagedService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedService")
            .field("name", &self.name)
            .finish()
    }
}
