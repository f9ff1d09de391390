use thiserror::Error;

use dnstm_config::ConfigError;
use dnstm_router::RouterError;
use dnstm_system::SystemError;

pub type Result<T> = std::result::Result<T, Error>;

/// Terminal error of an orchestrator operation
#[derive(Debug, Error)]
pub enum Error {
    /// Rejected before anything was changed
    #[error("{0}")]
    Validation(String),

    #[error("{kind} '{key}' not found")]
    NotFound { kind: &'static str, key: String },

    #[error("{kind} '{key}' already exists")]
    Exists { kind: &'static str, key: String },

    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("Service error: {0}")]
    Service(#[from] SystemError),

    #[error("Router error: {0}")]
    Router(#[from] RouterError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A topology switch failed part way and was rolled back
    #[error("{reason} (rollback attempted)")]
    ModeSwitch { reason: Box<Error> },
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    pub fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            key: key.into(),
        }
    }

    pub fn exists(kind: &'static str, key: impl Into<String>) -> Self {
        Error::Exists {
            kind,
            key: key.into(),
        }
    }

    /// The error that caused a rolled back switch, or the error itself
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::ModeSwitch { reason } => reason.root_cause(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_switch_names_reason() {
        let err = Error::ModeSwitch {
            reason: Box::new(Error::ResourceUnavailable("port 53 is still in use".to_string())),
        };
        assert_eq!(
            err.to_string(),
            "Resource unavailable: port 53 is still in use (rollback attempted)"
        );
        assert!(matches!(err.root_cause(), Error::ResourceUnavailable(_)));
    }

    #[test]
    fn test_not_found_display() {
        assert_eq!(
            Error::not_found("tunnel", "swift-otter").to_string(),
            "tunnel 'swift-otter' not found"
        );
    }
}
