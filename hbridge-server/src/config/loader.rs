//! Configuration loader

use std::path::Path;

use hbridge_utils::{config_file, BridgeError, Result};

use super::AppConfig;

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from default location
    pub fn load() -> Result<AppConfig> {
        let path = config_file();
        if path.exists() {
            Self::load_from_path(&path)
        } else {
            Ok(AppConfig::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<AppConfig> {
        if !path.exists() {
            return Err(BridgeError::ConfigNotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path).map_err(|e| BridgeError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        Self::parse(&content, path)
    }

    /// Parse configuration from string
    pub fn parse(content: &str, path: &Path) -> Result<AppConfig> {
        toml::from_str(content).map_err(|e| BridgeError::ConfigInvalid {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Validate configuration
    pub fn validate(config: &AppConfig) -> Result<()> {
        let server = &config.server;

        if server.max_message_size == 0 {
            return Err(BridgeError::config("max_message_size must be greater than 0"));
        }

        if server.stop_timeout_ms < 100 {
            return Err(BridgeError::config("stop_timeout_ms must be at least 100"));
        }

        if server.worker_threads == 0 || server.worker_threads > 64 {
            return Err(BridgeError::config(
                "worker_threads must be between 1 and 64",
            ));
        }

        if server.fallback_ports.contains(&server.port) {
            return Err(BridgeError::config(format!(
                "fallback_ports must not repeat the primary port {}",
                server.port
            )));
        }

        Ok(())
    }

    /// Load and validate
    pub fn load_and_validate() -> Result<AppConfig> {
        let config = Self::load()?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Load and validate from an explicit path
    pub fn load_and_validate_from(path: &Path) -> Result<AppConfig> {
        let config = Self::load_from_path(path)?;
        Self::validate(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeadlessPolicy;
    use hbridge_protocol::ApprovalMode;
    use tempfile::tempdir;

    #[test]
    fn test_load_missing_default_file() {
        let config = ConfigLoader::load();
        assert!(config.is_ok());
    }

    #[test]
    fn test_load_from_missing_path() {
        let dir = tempdir().unwrap();
        let result = ConfigLoader::load_from_path(&dir.path().join("absent.toml"));
        assert!(matches!(result, Err(BridgeError::ConfigNotFound(_))));
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "localhost");
        assert_eq!(config.server.port, 9876);
        assert_eq!(config.server.candidate_ports(), vec![9876, 9877, 9878, 9879]);
        assert_eq!(config.server.max_message_size, 10 * 1024 * 1024);
        assert_eq!(config.approval.default_mode, ApprovalMode::Auto);
        assert_eq!(config.approval.headless_policy, HeadlessPolicy::Deny);
        assert!(config.scripting.enabled);
        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn test_load_from_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        std::fs::write(
            &path,
            r#"
            [server]
            port = 10000
            fallback_ports = [10001]

            [approval]
            default_mode = "preview"
            headless_policy = "approve"

            [scripting]
            enabled = false
            "#,
        )
        .unwrap();

        let config = ConfigLoader::load_and_validate_from(&path).unwrap();
        assert_eq!(config.server.port, 10000);
        assert_eq!(config.server.fallback_ports, vec![10001]);
        // Unspecified fields keep their defaults
        assert_eq!(config.server.host, "localhost");
        assert_eq!(config.approval.default_mode, ApprovalMode::Preview);
        assert_eq!(config.approval.headless_policy, HeadlessPolicy::Approve);
        assert!(!config.scripting.enabled);
    }

    #[test]
    fn test_parse_invalid_mode() {
        let result = ConfigLoader::parse(
            "[approval]\ndefault_mode = \"yolo\"\n",
            Path::new("test.toml"),
        );
        assert!(matches!(result, Err(BridgeError::ConfigInvalid { .. })));
    }

    #[test]
    fn test_parse_invalid_toml() {
        let result = ConfigLoader::parse("invalid { toml", Path::new("test.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_zero_message_size() {
        let mut config = AppConfig::default();
        config.server.max_message_size = 0;
        assert!(ConfigLoader::validate(&config).is_err());
    }

    #[test]
    fn test_validate_stop_timeout() {
        let mut config = AppConfig::default();
        config.server.stop_timeout_ms = 50;
        assert!(ConfigLoader::validate(&config).is_err());
    }

    #[test]
    fn test_validate_worker_threads() {
        let mut config = AppConfig::default();
        config.server.worker_threads = 0;
        assert!(ConfigLoader::validate(&config).is_err());

        config.server.worker_threads = 65;
        assert!(ConfigLoader::validate(&config).is_err());
    }

    #[test]
    fn test_validate_fallback_repeats_primary() {
        let mut config = AppConfig::default();
        config.server.fallback_ports = vec![9877, 9876];

        let err = ConfigLoader::validate(&config).unwrap_err();
        assert!(err.to_string().contains("9876"));
    }
}
