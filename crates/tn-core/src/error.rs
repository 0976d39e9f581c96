//! Core error types for Tenantry

use std::path::PathBuf;
use thiserror::Error;

use crate::types::{ServiceKind, TenantId, TenantState};

/// Process exit code for failures outside the dedicated codes below.
pub const EXIT_GENERIC_FAILURE: u8 = 1;
/// Exit code for [`TenantError::TenantNotFound`].
pub const EXIT_TENANT_NOT_FOUND: u8 = 3;
/// Exit code for [`TenantError::TenantAlreadyExists`].
pub const EXIT_TENANT_ALREADY_EXISTS: u8 = 4;
/// Exit code for [`TenantError::PortExhaustion`].
pub const EXIT_PORT_EXHAUSTION: u8 = 5;
/// Exit code for [`TenantError::DeploymentTimeout`].
pub const EXIT_DEPLOYMENT_TIMEOUT: u8 = 6;

/// Top-level error type for every tenant operation
#[derive(Error, Debug)]
pub enum TenantError {
    /// No tenant with this id is registered
    #[error("tenant not found: {0}")]
    TenantNotFound(TenantId),

    /// A tenant with this id is already registered
    #[error("tenant already exists: {0}")]
    TenantAlreadyExists(TenantId),

    /// The configured port range cannot satisfy the request
    #[error("port range {start}-{end} exhausted: {requested} port(s) requested for {tenant}, {available} free")]
    PortExhaustion {
        tenant: TenantId,
        requested: usize,
        available: usize,
        start: u16,
        end: u16,
    },

    /// The random source could not produce a usable secret
    #[error("secret generation failed: {0}")]
    SecretGenerationFailure(String),

    /// The tenant record cannot be rendered into stack artifacts
    #[error("cannot render stack for {tenant}: {reason}")]
    RenderFailure { tenant: TenantId, reason: String },

    /// A dependency never reported healthy within the health-wait bound
    #[error("{service} of {tenant} did not become healthy after {attempts} check(s) in {waited_secs}s")]
    DependencyHealthTimeout {
        tenant: TenantId,
        service: ServiceKind,
        attempts: u32,
        waited_secs: u64,
    },

    /// The whole operation exceeded the configured operation timeout
    #[error("{operation} on {tenant} exceeded the {timeout_secs}s operation timeout")]
    DeploymentTimeout {
        tenant: TenantId,
        operation: String,
        timeout_secs: u64,
    },

    /// The container runtime or proxy returned an error result
    #[error("runtime step '{step}' failed for {tenant}: {reason}")]
    RuntimeInvocationFailure {
        tenant: TenantId,
        step: String,
        reason: String,
    },

    /// Fetching application source failed
    #[error("fetching {url} (branch {branch}) for {tenant} failed: {reason}")]
    SourceFetchFailure {
        tenant: TenantId,
        url: String,
        branch: String,
        reason: String,
    },

    /// The requested service was never provisioned for this tenant
    #[error("service {service} is not provisioned for {tenant}")]
    ServiceNotFound { tenant: TenantId, service: String },

    /// The tenant id does not satisfy the id grammar
    #[error("invalid tenant id '{id}': {reason}")]
    InvalidTenantId { id: String, reason: String },

    /// The operation is not allowed from the tenant's current state
    #[error("cannot {operation} tenant {tenant} while it is {state}")]
    InvalidTransition {
        tenant: TenantId,
        operation: String,
        state: TenantState,
    },

    /// Filesystem failure inside the tenant registry
    #[error("registry error at {path:?}: {source}")]
    Registry {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A persisted tenant record could not be decoded or encoded
    #[error("corrupt tenant record at {path:?}: {reason}")]
    CorruptRecord { path: PathBuf, reason: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl TenantError {
    /// Process exit code reported by the CLI for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            TenantError::TenantNotFound(_) => EXIT_TENANT_NOT_FOUND,
            TenantError::TenantAlreadyExists(_) => EXIT_TENANT_ALREADY_EXISTS,
            TenantError::PortExhaustion { .. } => EXIT_PORT_EXHAUSTION,
            TenantError::DeploymentTimeout { .. } => EXIT_DEPLOYMENT_TIMEOUT,
            _ => EXIT_GENERIC_FAILURE,
        }
    }

    /// Short machine-friendly name of the error class
    pub fn kind(&self) -> &'static str {
        match self {
            TenantError::TenantNotFound(_) => "TenantNotFound",
            TenantError::TenantAlreadyExists(_) => "TenantAlreadyExists",
            TenantError::PortExhaustion { .. } => "PortExhaustion",
            TenantError::SecretGenerationFailure(_) => "SecretGenerationFailure",
            TenantError::RenderFailure { .. } => "RenderFailure",
            TenantError::DependencyHealthTimeout { .. } => "DependencyHealthTimeout",
            TenantError::DeploymentTimeout { .. } => "DeploymentTimeout",
            TenantError::RuntimeInvocationFailure { .. } => "RuntimeInvocationFailure",
            TenantError::SourceFetchFailure { .. } => "SourceFetchFailure",
            TenantError::ServiceNotFound { .. } => "ServiceNotFound",
            TenantError::InvalidTenantId { .. } => "InvalidTenantId",
            TenantError::InvalidTransition { .. } => "InvalidTransition",
            TenantError::Registry { .. } => "Registry",
            TenantError::CorruptRecord { .. } => "CorruptRecord",
            TenantError::Config(_) => "Config",
        }
    }

    pub(crate) fn registry(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TenantError::Registry {
            path: path.into(),
            source,
        }
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
