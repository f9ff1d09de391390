use std::path::PathBuf;
use thiserror::Error;

use dnstm_system::SystemError;

/// Router errors
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Failed to access routing table {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid routing table {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Failed to serialize routing table: {0}")]
    Serialize(#[from] serde_yaml::Error),

    #[error("Invalid address '{address}' for {what}")]
    InvalidAddress { what: String, address: String },

    #[error("Malformed DNS query: {0}")]
    MalformedQuery(&'static str),

    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Router socket error: {0}")]
    Socket(#[source] std::io::Error),

    #[error("Router service error: {0}")]
    Service(#[from] SystemError),
}
