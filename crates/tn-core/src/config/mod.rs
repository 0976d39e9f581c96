//! Configuration management for Tenantry

mod settings;
pub mod serde_utils;

pub use settings::{
    AppConfig, BackoffConfig, ConfigFile, HealthConfig, HostsConfig, ImageConfig,
    OrchestratorConfig, RuntimeConfig,
};

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tenantry")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Get the default directory holding one sub-directory per tenant
pub fn default_tenants_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tenantry")
        .join("tenants")
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to a file
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, content)
        .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))?;

    Ok(())
}

/// Load the orchestrator section from `path`, or the default config file
///
/// A missing default file yields the built-in defaults; an explicitly given
/// path must exist.
pub fn load_orchestrator_config(path: Option<&Path>) -> Result<OrchestratorConfig, ConfigError> {
    let config = match path {
        Some(path) => load_config::<ConfigFile>(path)?.orchestrator,
        None => {
            let default_path = default_config_path();
            if default_path.exists() {
                load_config::<ConfigFile>(&default_path)?.orchestrator
            } else {
                tracing::debug!("No config file at {:?}, using defaults", default_path);
                OrchestratorConfig::default()
            }
        }
    };
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_then_load_orchestrator_section() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut file = ConfigFile::default();
        file.orchestrator.alias_domain = "tenants.test".to_string();
        file.orchestrator.port_range.start = 31000;
        file.orchestrator.port_range.end = 31099;
        save_config(&path, &file).unwrap();

        let loaded = load_orchestrator_config(Some(&path)).unwrap();
        assert_eq!(loaded.alias_domain, "tenants.test");
        assert_eq!(loaded.port_range.start, 31000);
    }

    #[test]
    fn test_missing_explicit_path_is_an_error() {
        let dir = TempDir::new().unwrap();
        let result = load_orchestrator_config(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[orchestrator]\nsecret_length = 32\n").unwrap();

        let loaded = load_orchestrator_config(Some(&path)).unwrap();
        assert_eq!(loaded.secret_length, 32);
        assert_eq!(loaded.app.api_prefix, "/v1/api");
    }

    #[test]
    fn test_invalid_range_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[orchestrator.port_range]\nstart = 500\nend = 100\n").unwrap();
        assert!(matches!(
            load_orchestrator_config(Some(&path)),
            Err(ConfigError::Invalid(_))
        ));
    }
}
