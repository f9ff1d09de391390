use std::path::PathBuf;
use thiserror::Error;

/// Failures reported by host collaborators
#[derive(Debug, Error)]
pub enum SystemError {
    #[error("Failed to execute {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Service '{0}' is not installed")]
    NotInstalled(String),

    #[error("Failed to access {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Key material error: {0}")]
    KeyMaterial(String),

    #[error("Address detection failed: {0}")]
    AddressDetection(String),

    #[error("{0}")]
    Other(String),
}

impl SystemError {
    /// True when the failure only means the thing is already gone
    pub fn is_not_installed(&self) -> bool {
        match self {
            SystemError::NotInstalled(_) => true,
            SystemError::CommandFailed { stderr, .. } => {
                stderr.contains("not loaded") || stderr.contains("does not exist")
            }
            _ => false,
        }
    }
}
