//! Container runtime abstraction
//!
//! The controller never shells out directly. Everything it asks of the
//! container engine goes through [`Runtime`], which the docker compose
//! adapter implements and tests replace with a fake.

mod compose;

pub use compose::ComposeRuntime;

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use tn_core::render::COMPOSE_FILE_NAME;
use tn_core::{ServiceKind, Tenant, TenantId};

/// Errors reported by a runtime adapter
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The external tool could not be started at all
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The external tool ran and reported failure
    #[error("`{command}` exited with {}: {stderr}", exit_label(.code))]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// The tool's output could not be understood
    #[error("unexpected runtime output: {0}")]
    Parse(String),

    /// I/O error while talking to the tool
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "a signal".to_string(),
    }
}

/// Everything a runtime needs to address one tenant's stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackHandle {
    pub tenant: TenantId,
    /// Compose project name
    pub project: String,
    /// Tenant directory; relative paths in the definition resolve here
    pub dir: PathBuf,
    pub compose_file: PathBuf,
}

impl StackHandle {
    pub fn for_tenant(tenant: &Tenant, dir: &Path) -> Self {
        Self {
            tenant: tenant.id.clone(),
            project: tenant.project_name(),
            dir: dir.to_path_buf(),
            compose_file: dir.join(COMPOSE_FILE_NAME),
        }
    }

    /// Container name of a service in this stack
    pub fn container(&self, service: ServiceKind) -> String {
        format!("{}_{}", self.tenant, service.name())
    }
}

/// Operation verbs applied to a rendered stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeOp {
    /// Build images of application services
    Build { services: Vec<ServiceKind> },
    /// Create and start services in the background
    Up {
        services: Vec<ServiceKind>,
        no_deps: bool,
        /// Recreate containers even if their definition is unchanged
        force_recreate: bool,
    },
    /// Stop services, keeping containers and volumes
    Stop { services: Vec<ServiceKind> },
    /// Remove containers and the network; volumes too when asked
    Down { volumes: bool },
}

impl fmt::Display for RuntimeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = |services: &[ServiceKind]| {
            services
                .iter()
                .map(|s| s.name())
                .collect::<Vec<_>>()
                .join(",")
        };
        match self {
            RuntimeOp::Build { services } => write!(f, "build {}", names(services)),
            RuntimeOp::Up {
                services,
                force_recreate: true,
                ..
            } => write!(f, "recreate {}", names(services)),
            RuntimeOp::Up { services, .. } => write!(f, "up {}", names(services)),
            RuntimeOp::Stop { services } => write!(f, "stop {}", names(services)),
            RuntimeOp::Down { volumes: true } => write!(f, "down --volumes"),
            RuntimeOp::Down { volumes: false } => write!(f, "down"),
        }
    }
}

/// Observed state of one service container
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceStatus {
    /// No container exists
    Missing,
    /// Created but never started
    Created,
    /// Running, health check still in its start period or failing once
    Starting,
    /// Running without a health check
    Running,
    /// Running and passing its health check
    Healthy,
    /// Running and failing its health check
    Unhealthy,
    /// Exited with this code
    Exited(i32),
    /// Could not be determined
    Unknown(String),
}

impl ServiceStatus {
    /// Whether the container process is up
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            ServiceStatus::Starting
                | ServiceStatus::Running
                | ServiceStatus::Healthy
                | ServiceStatus::Unhealthy
        )
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceStatus::Missing => write!(f, "missing"),
            ServiceStatus::Created => write!(f, "created"),
            ServiceStatus::Starting => write!(f, "starting"),
            ServiceStatus::Running => write!(f, "running"),
            ServiceStatus::Healthy => write!(f, "healthy"),
            ServiceStatus::Unhealthy => write!(f, "unhealthy"),
            ServiceStatus::Exited(code) => write!(f, "exited ({})", code),
            ServiceStatus::Unknown(reason) => write!(f, "unknown ({})", reason),
        }
    }
}

/// How to read a service's output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogOptions {
    /// Keep streaming new output until the stream is dropped
    pub follow: bool,
    /// Only the last N lines of existing output
    pub tail: Option<usize>,
}

/// Lazy stream of output lines
pub type LogStream = BoxStream<'static, Result<String, RuntimeError>>;

/// Capability interface of the container engine
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Apply an operation verb to a rendered stack
    async fn apply(&self, stack: &StackHandle, op: &RuntimeOp) -> Result<(), RuntimeError>;

    /// Observe one service
    async fn status(
        &self,
        stack: &StackHandle,
        service: ServiceKind,
    ) -> Result<ServiceStatus, RuntimeError>;

    /// Stream one service's output
    ///
    /// Dropping the stream stops the reader, never the service.
    async fn logs(
        &self,
        stack: &StackHandle,
        service: ServiceKind,
        options: LogOptions,
    ) -> Result<LogStream, RuntimeError>;

    /// Run a command inside a running service container, returning stdout
    async fn exec(
        &self,
        stack: &StackHandle,
        service: ServiceKind,
        argv: &[String],
    ) -> Result<String, RuntimeError>;
}
