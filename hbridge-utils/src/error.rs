//! Error types for hbridge
//!
//! Provides a unified error type used across all hbridge crates.

use std::path::PathBuf;

/// Main error type for hbridge operations
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    // === IO Errors ===

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    // === Listener Errors ===

    #[error("No port available on {host} (tried {})", format_ports(.tried))]
    PortsExhausted { host: String, tried: Vec<u16> },

    #[error("Transport error: {0}")]
    Transport(String),

    // === Configuration Errors ===

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration at {path}: {message}")]
    ConfigInvalid { path: PathBuf, message: String },

    #[error("Configuration file not found: {0}")]
    ConfigNotFound(PathBuf),

    // === Runtime Errors ===

    #[error("Runtime error: {0}")]
    Runtime(String),

    // === Internal Errors ===

    #[error("Internal error: {0}")]
    Internal(String),
}

fn format_ports(ports: &[u16]) -> String {
    ports
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl BridgeError {
    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a runtime error
    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type alias using BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Display Tests ====================

    #[test]
    fn test_error_display_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = BridgeError::Io(io_err);
        assert!(err.to_string().contains("IO error"));
    }

    #[test]
    fn test_error_display_file_read() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "permission denied");
        let err = BridgeError::FileRead {
            path: PathBuf::from("/etc/hbridge.toml"),
            source: io_err,
        };
        let msg = err.to_string();
        assert!(msg.contains("Failed to read file"));
        assert!(msg.contains("/etc/hbridge.toml"));
    }

    #[test]
    fn test_error_display_ports_exhausted_lists_ports() {
        let err = BridgeError::PortsExhausted {
            host: "localhost".into(),
            tried: vec![9876, 9877, 9878],
        };
        assert_eq!(
            err.to_string(),
            "No port available on localhost (tried 9876, 9877, 9878)"
        );
    }

    #[test]
    fn test_error_display_transport() {
        let err = BridgeError::transport("connection reset");
        assert_eq!(err.to_string(), "Transport error: connection reset");
    }

    #[test]
    fn test_error_display_config() {
        let err = BridgeError::config("missing key");
        assert_eq!(err.to_string(), "Configuration error: missing key");
    }

    #[test]
    fn test_error_display_config_invalid() {
        let err = BridgeError::ConfigInvalid {
            path: PathBuf::from("/home/user/.config/hbridge/config.toml"),
            message: "syntax error".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Invalid configuration"));
        assert!(msg.contains("syntax error"));
    }

    #[test]
    fn test_error_display_runtime() {
        let err = BridgeError::runtime("no reactor");
        assert_eq!(err.to_string(), "Runtime error: no reactor");
    }

    // ==================== Conversion Tests ====================

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err: BridgeError = io_err.into();
        assert!(matches!(err, BridgeError::Io(_)));
    }

    #[test]
    fn test_question_mark_propagation() {
        fn inner() -> Result<()> {
            std::fs::read("/definitely/not/a/real/path/hbridge")?;
            Ok(())
        }
        assert!(matches!(inner(), Err(BridgeError::Io(_))));
    }
}
