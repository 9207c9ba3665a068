//! Unified error handling for the grid protection services
//!
//! All crates in the workspace report failures through [`GridError`]. The
//! supervisor in `protsrv` relies on [`GridError::is_recoverable`] to decide
//! between a reconnect-and-replay cycle and aborting startup.

use thiserror::Error;

// ============================================================================
// GridError - Main error type
// ============================================================================

/// Main error type for all grid protection crates
#[derive(Debug, Error)]
pub enum GridError {
    // ======================================
    // Configuration Errors
    // ======================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // ======================================
    // Topology & Data Errors
    // ======================================
    #[error("Parse error: {file}: {error}")]
    ParseError { file: String, error: String },

    #[error("Unknown tag: {0}")]
    UnknownTag(String),

    #[error("Data type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("Invalid parameter: {param}: {reason}")]
    InvalidParameter { param: String, reason: String },

    // ======================================
    // Gateway & Communication Errors
    // ======================================
    #[error("Connection failed: {endpoint}: {reason}")]
    Connection { endpoint: String, reason: String },

    #[error("Not connected: {0}")]
    NotConnected(String),

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(u64),

    // ======================================
    // Evaluator & Runtime Errors
    // ======================================
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    // ======================================
    // File & I/O Errors
    // ======================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using GridError
pub type GridResult<T> = Result<T, GridError>;

/// Error category enum - used for classification in logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Data,
    Connection,
    Runtime,
    Io,
    Unknown,
}

impl GridError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn parse(file: impl Into<String>, error: impl Into<String>) -> Self {
        Self::ParseError {
            file: file.into(),
            error: error.into(),
        }
    }

    pub fn connection(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Connection {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) | Self::InvalidConfig { .. } => ErrorCategory::Configuration,
            Self::ParseError { .. }
            | Self::UnknownTag(_)
            | Self::TypeMismatch { .. }
            | Self::InvalidParameter { .. } => ErrorCategory::Data,
            Self::Connection { .. } | Self::NotConnected(_) | Self::SubscriptionNotFound(_) => {
                ErrorCategory::Connection
            },
            Self::InvalidTransition { .. } => ErrorCategory::Runtime,
            Self::Io(_) | Self::FileNotFound(_) => ErrorCategory::Io,
            Self::Other(_) => ErrorCategory::Unknown,
        }
    }

    /// Whether the supervisor should reconnect and replay startup
    ///
    /// Only connectivity failures surfaced by the gateway qualify; topology
    /// and configuration errors abort startup.
    pub fn is_recoverable(&self) -> bool {
        self.category() == ErrorCategory::Connection
    }
}

impl From<figment::Error> for GridError {
    fn from(err: figment::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_connection_errors_are_recoverable() {
        assert!(GridError::connection("opc.tcp://localhost:4840", "refused").is_recoverable());
        assert!(GridError::NotConnected("memory".into()).is_recoverable());
        assert!(GridError::SubscriptionNotFound(7).is_recoverable());
    }

    #[test]
    fn test_parse_errors_are_fatal() {
        let err = GridError::parse("topology.json", "missing field `Grid-ID`");
        assert!(!err.is_recoverable());
        assert_eq!(err.category(), ErrorCategory::Data);
        assert_eq!(
            err.to_string(),
            "Parse error: topology.json: missing field `Grid-ID`"
        );
    }

    #[test]
    fn test_from_figment_error() {
        let err: GridError = figment::Error::from("bad value".to_string()).into();
        assert!(matches!(err, GridError::Configuration(ref m) if m.contains("bad value")));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_from_anyhow_error() {
        let err: GridError = anyhow::anyhow!("boom").into();
        assert!(matches!(err, GridError::Other(_)));
        assert!(err.to_string().contains("boom"));
    }
}
