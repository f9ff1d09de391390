//! Configuration file storage
//!
//! Reads and writes the single JSON configuration file (default
//! `/etc/dnstm/config.json`). Writes go to a sibling temp file which is then
//! renamed over the original.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::ConfigError;
use crate::model::Config;

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/dnstm/config.json";

/// Configuration file manager
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding certificates, keys and the routing table
    pub fn state_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Load, normalize and validate the configuration
    ///
    /// A missing file yields the default configuration.
    pub fn load(&self) -> Result<Config, ConfigError> {
        if !self.path.exists() {
            debug!("No config at {:?}, using defaults", self.path);
            return Ok(Config::default());
        }

        let json = fs::read_to_string(&self.path).map_err(|source| ConfigError::Read {
            path: self.path.clone(),
            source,
        })?;

        let mut config: Config =
            serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
                path: self.path.clone(),
                source,
            })?;

        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Save the configuration atomically
    pub fn save(&self, config: &Config) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(write_err)?;
            }
        }

        let mut json = serde_json::to_string_pretty(config)?;
        json.push('\n');

        let tmp_path = self.tmp_path();
        fs::write(&tmp_path, json).map_err(write_err)?;
        if let Err(e) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(write_err(e));
        }

        debug!("Saved config to {:?}", self.path);
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "config.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIG_PATH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Enablement, Topology, TransportKind, TunnelConfig};
    use tempfile::TempDir;

    fn create_test_store() -> (ConfigStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = ConfigStore::new(temp_dir.path().join("dnstm").join("config.json"));
        (store, temp_dir)
    }

    fn sample_config() -> Config {
        let mut config = Config::default();
        config.tunnels.push(TunnelConfig {
            tag: "swift-otter".to_string(),
            transport: TransportKind::Dnstt,
            backend: "socks".to_string(),
            domain: "t.example.com".to_string(),
            port: 5310,
            enabled: Enablement::Enabled,
            mtu: Some(1000),
        });
        config.route.active = "swift-otter".to_string();
        config
    }

    #[test]
    fn test_load_missing_returns_default() {
        let (store, _temp) = create_test_store();
        let config = store.load().unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.topology(), Topology::Single);
    }

    #[test]
    fn test_save_and_load() {
        let (store, _temp) = create_test_store();
        let config = sample_config();

        store.save(&config).unwrap();
        let loaded = store.load().unwrap();

        assert_eq!(loaded, config);
        assert!(!store.tmp_path().exists());
    }

    #[test]
    fn test_load_normalizes_unset_enabled() {
        let (store, _temp) = create_test_store();
        let mut config = sample_config();
        config.tunnels[0].enabled = Enablement::Unset;
        store.save(&config).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.tunnels[0].enabled, Enablement::Enabled);
    }

    #[test]
    fn test_load_rejects_invalid_config() {
        let (store, _temp) = create_test_store();
        let mut config = sample_config();
        config.route.active = "nobody".to_string();
        store.save(&config).unwrap();

        assert!(matches!(store.load(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_reports_parse_errors() {
        let (store, _temp) = create_test_store();
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "{ not json").unwrap();

        assert!(matches!(store.load(), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_state_dir_is_config_parent() {
        let store = ConfigStore::default();
        assert_eq!(store.state_dir(), PathBuf::from("/etc/dnstm"));
        assert_eq!(ConfigStore::new("config.json").state_dir(), PathBuf::from("."));
    }
}
