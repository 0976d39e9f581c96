//! Orchestrator configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::{duration_millis, duration_secs};
use crate::error::ConfigError;
use crate::ports::PortRange;
use crate::secrets::{DEFAULT_SECRET_LENGTH, MIN_SECRET_LENGTH};

/// On-disk configuration file (`[orchestrator]` section)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub orchestrator: OrchestratorConfig,
}

/// Configuration for the tenant orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Directory holding one sub-directory per tenant
    pub tenants_root: PathBuf,

    /// Host ports handed out to tenants
    pub port_range: PortRange,

    /// Domain appended to the tenant id to form its network alias
    pub alias_domain: String,

    /// Length of generated database and cache passwords
    pub secret_length: usize,

    /// Runtime mode exported to the applications (`NODE_ENV`)
    pub runtime_mode: String,

    /// Upper bound for one lifecycle operation, in seconds
    #[serde(with = "duration_secs")]
    pub operation_timeout: Duration,

    /// Dependency health waiting
    pub health: HealthConfig,

    /// External tool invocation
    pub runtime: RuntimeConfig,

    /// Images for the infrastructure services
    pub images: ImageConfig,

    /// Application conventions
    pub app: AppConfig,

    /// Base URL of the source-hosting API used by `list-github-repos`
    pub github_api_url: String,

    /// Hosts-file entries for tenant aliases
    pub hosts: HostsConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            tenants_root: super::default_tenants_root(),
            port_range: PortRange::default(),
            alias_domain: "local".to_string(),
            secret_length: DEFAULT_SECRET_LENGTH,
            runtime_mode: "development".to_string(),
            operation_timeout: Duration::from_secs(15 * 60),
            health: HealthConfig::default(),
            runtime: RuntimeConfig::default(),
            images: ImageConfig::default(),
            app: AppConfig::default(),
            github_api_url: "https://api.github.com".to_string(),
            hosts: HostsConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Check values that serde cannot
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.port_range.validate().map_err(ConfigError::Invalid)?;
        if self.secret_length < MIN_SECRET_LENGTH {
            return Err(ConfigError::Invalid(format!(
                "secret_length must be at least {}",
                MIN_SECRET_LENGTH
            )));
        }
        if self.alias_domain.is_empty() || self.alias_domain.starts_with('.') {
            return Err(ConfigError::Invalid(format!(
                "alias_domain '{}' is not a domain",
                self.alias_domain
            )));
        }
        if !self.app.api_prefix.starts_with('/') || self.app.api_prefix.len() < 2 {
            return Err(ConfigError::Invalid(format!(
                "api_prefix '{}' must be an absolute path below /",
                self.app.api_prefix
            )));
        }
        if self.hosts.enabled && self.hosts.address.parse::<std::net::IpAddr>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "hosts.address '{}' is not an IP address",
                self.hosts.address
            )));
        }
        if self.runtime.compose_command.is_empty() {
            return Err(ConfigError::Invalid(
                "runtime.compose_command must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Network alias for a tenant id
    pub fn network_alias(&self, tenant_id: &str) -> String {
        format!("{}.{}", tenant_id, self.alias_domain)
    }
}

/// Health-wait policy for dependencies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Give up waiting after this long, in seconds
    #[serde(with = "duration_secs")]
    pub timeout: Duration,

    /// Give up after this many checks
    pub max_attempts: u32,

    /// Delay between checks
    pub backoff: BackoffConfig,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            max_attempts: 30,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Exponential backoff configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Initial delay, in milliseconds
    #[serde(with = "duration_millis")]
    pub initial: Duration,

    /// Maximum delay, in milliseconds
    #[serde(with = "duration_millis")]
    pub max: Duration,

    /// Multiplier for each retry
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

/// Registration of tenant aliases in a hosts file
///
/// Off by default: writing the system hosts file needs privileges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostsConfig {
    pub enabled: bool,
    pub file: PathBuf,
    /// Address the aliases resolve to
    pub address: String,
}

impl Default for HostsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            file: PathBuf::from("/etc/hosts"),
            address: "127.0.0.1".to_string(),
        }
    }
}

/// How external tools are invoked
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Container CLI used for inspect, logs and exec
    pub docker_binary: String,

    /// Compose entry point, e.g. `["docker", "compose"]`
    pub compose_command: Vec<String>,

    /// Git binary used to fetch application sources
    pub git_binary: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            docker_binary: "docker".to_string(),
            compose_command: vec!["docker".to_string(), "compose".to_string()],
            git_binary: "git".to_string(),
        }
    }
}

/// Images for the infrastructure services
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub database: String,
    pub cache: String,
    pub proxy: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            database: "postgres:15".to_string(),
            cache: "redis:7".to_string(),
            proxy: "nginx:1.25".to_string(),
        }
    }
}

/// Conventions the application images follow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Port the backend listens on inside its container
    pub backend_port: u16,

    /// Port the frontend listens on inside its container
    pub frontend_port: u16,

    /// Path prefix routed to the backend
    pub api_prefix: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend_port: 5004,
            frontend_port: 3001,
            api_prefix: "/v1/api".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        OrchestratorConfig::default().validate().unwrap();
    }

    #[test]
    fn test_network_alias() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.network_alias("acme"), "acme.local");
    }

    #[test]
    fn test_hosts_address_checked_only_when_enabled() {
        let mut config = OrchestratorConfig::default();
        config.hosts.address = "localhost".to_string();
        assert!(config.validate().is_ok());
        config.hosts.enabled = true;
        assert!(config.validate().is_err());
        config.hosts.address = "::1".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_relative_api_prefix() {
        let mut config = OrchestratorConfig::default();
        config.app.api_prefix = "api".to_string();
        assert!(config.validate().is_err());
    }
}
