//! Core domain types

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::TenantError;

/// Maximum length of a tenant id
pub const MAX_TENANT_ID_LEN: usize = 40;

/// Unique, immutable identifier of a tenant
///
/// Lowercase ASCII letters, digits and `-` only. `_` is reserved as the
/// separator in derived names (`<id>_db`, `<id>_db_data`), which keeps every
/// derived container, volume and network name unique across tenants.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    /// Parse and validate a tenant id
    pub fn parse(id: impl Into<String>) -> Result<Self, TenantError> {
        let id = id.into();
        let invalid = |reason: &str| TenantError::InvalidTenantId {
            id: id.clone(),
            reason: reason.to_string(),
        };

        if id.is_empty() {
            return Err(invalid("must not be empty"));
        }
        if id.len() > MAX_TENANT_ID_LEN {
            return Err(invalid(&format!(
                "must be at most {} characters",
                MAX_TENANT_ID_LEN
            )));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(invalid("only lowercase letters, digits and '-' are allowed"));
        }
        if id.starts_with('-') || id.ends_with('-') {
            return Err(invalid("must start and end with a letter or digit"));
        }
        Ok(Self(id))
    }

    /// Get the raw ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TenantId {
    type Err = TenantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TenantId {
    type Error = TenantError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

/// A service in a tenant stack
///
/// Variants are declared in dependency order; the derived `Ord` is relied on
/// for deterministic iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ServiceKind {
    #[serde(rename = "db")]
    Database,
    #[serde(rename = "redis")]
    Cache,
    #[serde(rename = "backend")]
    Backend,
    #[serde(rename = "frontend")]
    Frontend,
    #[serde(rename = "nginx")]
    Proxy,
}

impl ServiceKind {
    /// Every service kind, in dependency order
    pub const ALL: [ServiceKind; 5] = [
        ServiceKind::Database,
        ServiceKind::Cache,
        ServiceKind::Backend,
        ServiceKind::Frontend,
        ServiceKind::Proxy,
    ];

    /// Service name inside the orchestration definition
    pub fn name(&self) -> &'static str {
        match self {
            ServiceKind::Database => "db",
            ServiceKind::Cache => "redis",
            ServiceKind::Backend => "backend",
            ServiceKind::Frontend => "frontend",
            ServiceKind::Proxy => "nginx",
        }
    }

    /// Services this one must wait for before starting
    pub fn dependencies(&self) -> &'static [ServiceKind] {
        match self {
            ServiceKind::Database | ServiceKind::Cache => &[],
            ServiceKind::Backend => &[ServiceKind::Database, ServiceKind::Cache],
            ServiceKind::Frontend => &[ServiceKind::Backend],
            ServiceKind::Proxy => &[ServiceKind::Backend, ServiceKind::Frontend],
        }
    }

    /// Whether the service is built from fetched application source
    pub fn is_application(&self) -> bool {
        matches!(self, ServiceKind::Backend | ServiceKind::Frontend)
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ServiceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "db" | "database" | "postgres" => Ok(ServiceKind::Database),
            "redis" | "cache" => Ok(ServiceKind::Cache),
            "backend" => Ok(ServiceKind::Backend),
            "frontend" => Ok(ServiceKind::Frontend),
            "nginx" | "proxy" => Ok(ServiceKind::Proxy),
            other => Err(format!("unknown service '{}'", other)),
        }
    }
}

/// Lifecycle state of a tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantState {
    /// Ports, secrets and directory allocated; nothing rendered yet
    Registered,
    /// Artifacts rendered and at least one application built
    Provisioned,
    /// Stack started
    Running,
    /// Stack stopped, volumes kept
    Stopped,
    /// Containers, volumes and registry entry torn down
    Removed,
}

impl fmt::Display for TenantState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TenantState::Registered => write!(f, "registered"),
            TenantState::Provisioned => write!(f, "provisioned"),
            TenantState::Running => write!(f, "running"),
            TenantState::Stopped => write!(f, "stopped"),
            TenantState::Removed => write!(f, "removed"),
        }
    }
}

/// Host-facing ports of a tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantPorts {
    pub backend_host_port: u16,
    pub frontend_host_port: u16,
    pub proxy_host_port: u16,
}

impl TenantPorts {
    /// Number of host ports every tenant holds
    pub const COUNT: usize = 3;

    /// Build from an allocation of exactly [`Self::COUNT`] ports
    pub fn from_allocation(ports: &[u16]) -> Option<Self> {
        match ports {
            [backend, frontend, proxy] => Some(Self {
                backend_host_port: *backend,
                frontend_host_port: *frontend,
                proxy_host_port: *proxy,
            }),
            _ => None,
        }
    }

    /// All ports held by the tenant
    pub fn all(&self) -> [u16; 3] {
        [
            self.backend_host_port,
            self.frontend_host_port,
            self.proxy_host_port,
        ]
    }
}

/// Credentials generated for a tenant
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantSecrets {
    pub db_password: String,
    pub cache_password: String,
    pub session_secret: String,
}

impl TenantSecrets {
    /// All secret values
    pub fn values(&self) -> [&str; 3] {
        [&self.db_password, &self.cache_password, &self.session_secret]
    }
}

impl fmt::Debug for TenantSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantSecrets")
            .field("db_password", &"[REDACTED]")
            .field("cache_password", &"[REDACTED]")
            .field("session_secret", &"[REDACTED]")
            .finish()
    }
}

/// Which secret to rotate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretKind {
    Database,
    Cache,
    Session,
}

impl FromStr for SecretKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "database" | "db" => Ok(SecretKind::Database),
            "cache" | "redis" => Ok(SecretKind::Cache),
            "session" => Ok(SecretKind::Session),
            other => Err(format!("unknown secret '{}'", other)),
        }
    }
}

impl fmt::Display for SecretKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretKind::Database => write!(f, "database"),
            SecretKind::Cache => write!(f, "cache"),
            SecretKind::Session => write!(f, "session"),
        }
    }
}

/// Where an application's code comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSource {
    pub repo_url: String,
    pub branch: String,
}

impl AppSource {
    pub fn new(repo_url: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            repo_url: repo_url.into(),
            branch: branch.into(),
        }
    }
}

/// Declared application sources of a tenant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantSources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<AppSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frontend: Option<AppSource>,
}

impl TenantSources {
    /// Source declared for an application service
    pub fn get(&self, service: ServiceKind) -> Option<&AppSource> {
        match service {
            ServiceKind::Backend => self.backend.as_ref(),
            ServiceKind::Frontend => self.frontend.as_ref(),
            _ => None,
        }
    }

    /// Replace the source of an application service
    pub fn set(&mut self, service: ServiceKind, source: AppSource) {
        match service {
            ServiceKind::Backend => self.backend = Some(source),
            ServiceKind::Frontend => self.frontend = Some(source),
            _ => {}
        }
    }
}

/// Last failed operation on a tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub operation: String,
    pub step: String,
    pub reason: String,
    /// Unix seconds
    pub at: u64,
}

/// Recent deployments kept on a tenant record
pub const DEPLOYMENT_HISTORY_LEN: usize = 20;

/// Outcome of one deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentStatus {
    InProgress,
    Succeeded,
    Failed,
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentStatus::InProgress => write!(f, "in-progress"),
            DeploymentStatus::Succeeded => write!(f, "succeeded"),
            DeploymentStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One deploy operation on a tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// `CD` followed by the tenant's deployment counter, e.g. `CD00007`
    pub id: String,
    pub operation: String,
    pub status: DeploymentStatus,
    /// Unix seconds
    pub started_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// The unit of isolation: one tenant record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub state: TenantState,
    pub network_alias: String,
    /// Unix seconds; never rendered into artifacts
    pub created_at: u64,
    /// Deployments started so far, including those trimmed from history
    #[serde(default)]
    pub deployment_count: u64,
    pub ports: TenantPorts,
    pub secrets: TenantSecrets,
    #[serde(default)]
    pub sources: TenantSources,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<FailureRecord>,
    /// Most recent deployments, oldest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deployments: Vec<DeploymentRecord>,
}

impl Tenant {
    /// Open a new in-progress deployment and return its id
    ///
    /// Deployments still open from an interrupted process are closed as
    /// failed first. History is trimmed to the newest entries.
    pub fn begin_deployment(&mut self, operation: &str, now: u64) -> String {
        self.finish_open_deployments(DeploymentStatus::Failed, "interrupted", now);
        self.deployment_count += 1;
        let id = format!("CD{:05}", self.deployment_count);
        self.deployments.push(DeploymentRecord {
            id: id.clone(),
            operation: operation.to_string(),
            status: DeploymentStatus::InProgress,
            started_at: now,
            finished_at: None,
            message: None,
        });
        if self.deployments.len() > DEPLOYMENT_HISTORY_LEN {
            let excess = self.deployments.len() - DEPLOYMENT_HISTORY_LEN;
            self.deployments.drain(..excess);
        }
        id
    }

    /// Close every in-progress deployment; returns how many were closed
    pub fn finish_open_deployments(
        &mut self,
        status: DeploymentStatus,
        message: &str,
        now: u64,
    ) -> usize {
        let mut closed = 0;
        for deployment in self
            .deployments
            .iter_mut()
            .filter(|d| d.status == DeploymentStatus::InProgress)
        {
            deployment.status = status;
            deployment.finished_at = Some(now);
            deployment.message = Some(message.to_string());
            closed += 1;
        }
        closed
    }

    /// Most recent deployment
    pub fn last_deployment(&self) -> Option<&DeploymentRecord> {
        self.deployments.last()
    }

    /// Container name of a service (`<id>_<service>`)
    pub fn container_name(&self, service: ServiceKind) -> String {
        format!("{}_{}", self.id, service.name())
    }

    /// Compose project name
    pub fn project_name(&self) -> String {
        format!("tenantry-{}", self.id)
    }

    /// Name of the tenant's private network
    pub fn network_name(&self) -> String {
        format!("{}_net", self.id)
    }

    /// Named volume holding database data
    pub fn db_volume(&self) -> String {
        format!("{}_db_data", self.id)
    }

    /// Named volume holding cache data
    pub fn cache_volume(&self) -> String {
        format!("{}_redis_data", self.id)
    }

    /// Primary database name
    pub fn db_name(&self) -> String {
        format!("{}_master", self.id.as_str().replace('-', "_"))
    }

    /// Secondary (transactional) database name
    pub fn db_transactional_name(&self) -> String {
        format!("{}_transactional", self.id.as_str().replace('-', "_"))
    }

    /// Database role owning both databases
    pub fn db_user(&self) -> String {
        format!("{}_user", self.id.as_str().replace('-', "_"))
    }

    /// Services present in the rendered stack, in dependency order
    ///
    /// Database and cache are always rendered; each application appears once
    /// its source is declared; the proxy needs both applications.
    pub fn services(&self) -> Vec<ServiceKind> {
        let has_backend = self.sources.backend.is_some();
        let has_frontend = self.sources.frontend.is_some();
        ServiceKind::ALL
            .into_iter()
            .filter(|s| match s {
                ServiceKind::Database | ServiceKind::Cache => true,
                ServiceKind::Backend => has_backend,
                ServiceKind::Frontend => has_frontend,
                ServiceKind::Proxy => has_backend && has_frontend,
            })
            .collect()
    }

    /// Whether a service is part of the rendered stack
    pub fn has_service(&self, service: ServiceKind) -> bool {
        self.services().contains(&service)
    }

    /// Check the record is internally consistent before rendering
    pub fn validate(&self) -> Result<(), String> {
        let ports = self.ports.all();
        if ports.iter().any(|p| *p == 0) {
            return Err("host ports must be non-zero".to_string());
        }
        let unique: BTreeSet<u16> = ports.iter().copied().collect();
        if unique.len() != ports.len() {
            return Err(format!("host ports are not distinct: {:?}", ports));
        }
        for secret in self.secrets.values() {
            if secret.is_empty() || !secret.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err("secrets must be non-empty and alphanumeric".to_string());
            }
        }
        if self.network_alias.is_empty()
            || !self.network_alias.starts_with(self.id.as_str())
        {
            return Err(format!(
                "network alias '{}' is not derived from the tenant id",
                self.network_alias
            ));
        }
        for (service, source) in [
            (ServiceKind::Backend, &self.sources.backend),
            (ServiceKind::Frontend, &self.sources.frontend),
        ] {
            if let Some(source) = source {
                if source.repo_url.trim().is_empty() || source.branch.trim().is_empty() {
                    return Err(format!("{} source needs a repository URL and branch", service));
                }
            }
        }
        Ok(())
    }
}

/// Fixture shared by unit tests across the crate
#[cfg(test)]
pub(crate) fn sample_tenant(id: &str) -> Tenant {
    Tenant {
        id: TenantId::parse(id).unwrap(),
        state: TenantState::Registered,
        network_alias: format!("{}.local", id),
        created_at: 1_700_000_000,
        ports: TenantPorts {
            backend_host_port: 20000,
            frontend_host_port: 20001,
            proxy_host_port: 20002,
        },
        secrets: TenantSecrets {
            db_password: "dbpass0123456789".into(),
            cache_password: "cachepass0123456".into(),
            session_secret: "sessionsecret0123456789".into(),
        },
        sources: TenantSources::default(),
        last_failure: None,
        deployment_count: 0,
        deployments: Vec::new(),
    }
}
