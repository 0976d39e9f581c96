//! Tenant lifecycle controller
//!
//! Sequences every lifecycle operation: reads and updates the registry,
//! re-renders artifacts and drives the runtime in dependency order. Each
//! mutating operation holds the tenant's lock for its whole duration and is
//! bounded by the configured operation timeout.
//!
//! A failed step leaves the tenant in the last state it fully reached and
//! records the failure on the tenant; nothing is rolled back.

use dashmap::DashMap;
use std::future::Future;
use std::io;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use tn_core::config::OrchestratorConfig;
use tn_core::hosts::HostsFile;
use tn_core::lock::TenantLock;
use tn_core::registry::{Provisioning, TenantRegistry};
use tn_core::render::{self, DriftReport, RenderSettings, WriteReport, ROUTING_FILE_NAME};
use tn_core::time::current_time_secs;
use tn_core::types::TenantSources;
use tn_core::{
    AppSource, DeploymentStatus, FailureRecord, SecretKind, ServiceKind, Tenant, TenantError,
    TenantId, TenantState,
};

use crate::health::{HealthWaiter, Readiness};
use crate::logs::{self, TenantLogStream};
use crate::plugins::PluginRegistry;
use crate::runtime::{LogOptions, Runtime, RuntimeOp, ServiceStatus, StackHandle};
use crate::source::{self as checkout, SourceFetcher};

type Result<T> = std::result::Result<T, TenantError>;

/// Exclusive hold on one tenant for the duration of an operation
struct OperationGuard {
    _local: OwnedMutexGuard<()>,
    lock: TenantLock,
}

/// Record plus what the runtime reports for each rendered service
#[derive(Debug, Clone)]
pub struct TenantStatus {
    pub tenant: Tenant,
    pub services: Vec<(ServiceKind, ServiceStatus)>,
    /// `None` when the artifacts could not be compared
    pub drift: Option<DriftReport>,
}

/// Drives tenants through their lifecycle
pub struct LifecycleController {
    registry: TenantRegistry,
    config: OrchestratorConfig,
    render: RenderSettings,
    runtime: Arc<dyn Runtime>,
    fetcher: Arc<dyn SourceFetcher>,
    plugins: PluginRegistry,
    health: HealthWaiter,
    /// Serializes operations within this process before the file lock
    local_locks: DashMap<TenantId, Arc<Mutex<()>>>,
}

impl LifecycleController {
    pub fn new(
        config: OrchestratorConfig,
        runtime: Arc<dyn Runtime>,
        fetcher: Arc<dyn SourceFetcher>,
    ) -> Result<Self> {
        let registry = TenantRegistry::open(&config.tenants_root)?;
        Ok(Self {
            registry,
            render: RenderSettings::from(&config),
            health: HealthWaiter::new(&config.health),
            plugins: PluginRegistry::builtin(),
            config,
            runtime,
            fetcher,
            local_locks: DashMap::new(),
        })
    }

    pub fn registry(&self) -> &TenantRegistry {
        &self.registry
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    // ----- public operations -------------------------------------------------

    /// Register a new tenant: allocate ports and secrets, create its
    /// directory and render its infrastructure artifacts
    pub async fn add(&self, id: &TenantId, sources: TenantSources) -> Result<Tenant> {
        self.bounded(id, "add", async {
            let guard = self.acquire(id).await?;
            let registry = self.registry.clone();
            let provisioning = Provisioning::from(&self.config);
            let new_id = id.clone();
            let tenant = tokio::task::spawn_blocking(move || {
                registry.create(&new_id, sources, &provisioning)
            })
            .await
            .map_err(|e| self.join_error(e))??;

            let result = self.write_artifacts(&tenant).map(|_| tenant);
            if let Ok(tenant) = &result {
                self.register_alias(tenant);
            }
            self.settle(&guard, id, "add", result)
        })
        .await
    }

    /// Fetch, render, build and (unless stopped) start one application
    pub async fn deploy_app(
        &self,
        id: &TenantId,
        service: ServiceKind,
        source: AppSource,
    ) -> Result<Tenant> {
        let operation = match service {
            ServiceKind::Backend => "deploy-backend",
            ServiceKind::Frontend => "deploy-frontend",
            other => {
                return Err(TenantError::ServiceNotFound {
                    tenant: id.clone(),
                    service: format!("{} (not an application)", other),
                })
            }
        };
        self.bounded(id, operation, async {
            let guard = self.acquire(id).await?;
            let result = self
                .tracked(&guard, id, operation, async {
                    let tenant = self.registry.read(id)?;
                    self.deploy_locked(&guard, tenant, service, source, operation)
                        .await
                })
                .await;
            self.settle(&guard, id, operation, result)
        })
        .await
    }

    pub async fn deploy_backend(&self, id: &TenantId, source: AppSource) -> Result<Tenant> {
        self.deploy_app(id, ServiceKind::Backend, source).await
    }

    pub async fn deploy_frontend(&self, id: &TenantId, source: AppSource) -> Result<Tenant> {
        self.deploy_app(id, ServiceKind::Frontend, source).await
    }

    /// Deploy the backend, then the frontend
    ///
    /// Each application uses the given source or, failing that, the one
    /// already recorded. Applications with neither are skipped.
    pub async fn deploy(
        &self,
        id: &TenantId,
        backend: Option<AppSource>,
        frontend: Option<AppSource>,
    ) -> Result<Tenant> {
        self.bounded(id, "deploy", async {
            let guard = self.acquire(id).await?;
            let result = self
                .tracked(&guard, id, "deploy", async {
                    let mut tenant = self.registry.read(id)?;
                    let mut deployed = false;
                    for (service, given) in [
                        (ServiceKind::Backend, backend),
                        (ServiceKind::Frontend, frontend),
                    ] {
                        let Some(source) = given.or_else(|| tenant.sources.get(service).cloned())
                        else {
                            continue;
                        };
                        tenant = self
                            .deploy_locked(&guard, tenant, service, source, "deploy")
                            .await?;
                        deployed = true;
                    }
                    if !deployed {
                        tracing::warn!(
                            "Tenant {} declares no application source; nothing to deploy",
                            id
                        );
                    }
                    Ok(tenant)
                })
                .await;
            self.settle(&guard, id, "deploy", result)
        })
        .await
    }

    /// Start the whole stack in dependency order
    pub async fn start(&self, id: &TenantId) -> Result<Tenant> {
        self.bounded(id, "start", async {
            let guard = self.acquire(id).await?;
            let result = self.start_locked(&guard, id).await;
            self.settle(&guard, id, "start", result)
        })
        .await
    }

    /// Stop the stack in reverse dependency order, keeping volumes
    pub async fn stop(&self, id: &TenantId) -> Result<Tenant> {
        self.bounded(id, "stop", async {
            let guard = self.acquire(id).await?;
            let result = self.stop_locked(&guard, id).await;
            self.settle(&guard, id, "stop", result)
        })
        .await
    }

    /// Tear down containers and volumes, then delete the tenant
    ///
    /// Ports become available to new tenants only once teardown succeeded.
    pub async fn remove(&self, id: &TenantId) -> Result<Tenant> {
        let removed = self
            .bounded(id, "remove", async {
                let guard = self.acquire(id).await?;
                let result = self.remove_locked(&guard, id).await;
                self.settle(&guard, id, "remove", result)
            })
            .await?;
        self.local_locks.remove(id);
        Ok(removed)
    }

    /// Replace one secret, apply it and restart what uses it
    pub async fn rotate_secrets(&self, id: &TenantId, kind: SecretKind) -> Result<Tenant> {
        self.bounded(id, "rotate-secrets", async {
            let guard = self.acquire(id).await?;
            let result = self.rotate_locked(&guard, id, kind).await;
            self.settle(&guard, id, "rotate-secrets", result)
        })
        .await
    }

    /// Stream output of one service, or of the tenant's applications
    pub async fn logs(
        &self,
        id: &TenantId,
        service: Option<ServiceKind>,
        options: LogOptions,
    ) -> Result<TenantLogStream> {
        let tenant = self.registry.read(id)?;
        let services = logs::select_services(&tenant, service)?;
        let stack = self.stack(&tenant);
        logs::open(self.runtime.as_ref(), &stack, &services, options).await
    }

    /// Record, observed service status and artifact drift
    pub async fn status(&self, id: &TenantId) -> Result<TenantStatus> {
        let tenant = self.registry.read(id)?;
        let stack = self.stack(&tenant);

        let mut services = Vec::new();
        for service in tenant.services() {
            let status = match self.runtime.status(&stack, service).await {
                Ok(status) => status,
                Err(e) => ServiceStatus::Unknown(e.to_string()),
            };
            services.push((service, status));
        }

        let dir = self.registry.tenant_dir(id);
        let drift = match render::detect_drift(&tenant, &self.render, &dir) {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::warn!("Cannot compare artifacts of {}: {}", id, e);
                None
            }
        };

        Ok(TenantStatus {
            tenant,
            services,
            drift,
        })
    }

    /// Every registered tenant, sorted by id
    pub fn list(&self) -> Result<Vec<Tenant>> {
        self.registry.list()
    }

    // ----- operation bodies --------------------------------------------------

    async fn deploy_locked(
        &self,
        guard: &OperationGuard,
        mut tenant: Tenant,
        service: ServiceKind,
        source: AppSource,
        operation: &str,
    ) -> Result<Tenant> {
        if tenant.state == TenantState::Removed {
            return Err(self.invalid(&tenant, operation));
        }

        // Validate before touching anything on disk
        tenant.sources.set(service, source.clone());
        let artifacts = render::render(&tenant, &self.render)?;

        let dir = self.registry.tenant_dir(&tenant.id);
        match checkout::sweep_stale_checkouts(&dir) {
            Ok(0) => {}
            Ok(n) => tracing::info!("Removed {} leftover checkouts of {}", n, tenant.id),
            Err(e) => tracing::warn!("Cannot sweep leftover checkouts of {}: {}", tenant.id, e),
        }
        let dest = dir.join(service.name());
        let staging = checkout::staging_path(&dest);
        if let Err(e) = self.fetcher.fetch(&source, &staging).await {
            if staging.exists() {
                let _ = std::fs::remove_dir_all(&staging);
            }
            return Err(TenantError::SourceFetchFailure {
                tenant: tenant.id.clone(),
                url: source.repo_url.clone(),
                branch: source.branch.clone(),
                reason: e.to_string(),
            });
        }

        match self.plugins.detect(&staging) {
            Some(plugin) if plugin.ready_to_build() => {
                tracing::debug!("{} checkout of {} builds as is", service, tenant.id)
            }
            Some(plugin) => tracing::warn!(
                "{} checkout of {} is a {} app without a Dockerfile; the build may fail",
                service,
                tenant.id,
                plugin.name()
            ),
            None => tracing::warn!(
                "{} checkout of {} matches no known application kind",
                service,
                tenant.id
            ),
        }

        checkout::install_checkout(&staging, &dest).map_err(|e| {
            TenantError::RuntimeInvocationFailure {
                tenant: tenant.id.clone(),
                step: format!("install {} checkout", service),
                reason: e.to_string(),
            }
        })?;

        let report = render::write_artifacts(&dir, &artifacts)?;
        // Sources are recorded as soon as the artifacts reflect them
        self.registry.update(&guard.lock, &tenant)?;

        let stack = self.stack(&tenant);
        self.apply(&stack, RuntimeOp::Build {
            services: vec![service],
        })
        .await?;

        let next = match tenant.state {
            TenantState::Stopped => {
                tracing::info!(
                    "Built {} of stopped tenant {}; it starts with the stack",
                    service,
                    tenant.id
                );
                TenantState::Stopped
            }
            state => {
                self.start_dependencies(&tenant, &stack).await?;
                self.apply(&stack, up(service, false)).await?;
                if tenant.has_service(ServiceKind::Proxy) {
                    self.refresh_proxy(&stack, &report).await?;
                }
                if state == TenantState::Running {
                    TenantState::Running
                } else {
                    TenantState::Provisioned
                }
            }
        };

        self.commit(guard, &mut tenant, next)?;
        tracing::info!(
            "Deployed {} of {} from {} ({})",
            service,
            tenant.id,
            source.repo_url,
            source.branch
        );
        Ok(tenant)
    }

    async fn start_locked(&self, guard: &OperationGuard, id: &TenantId) -> Result<Tenant> {
        let mut tenant = self.registry.read(id)?;
        match tenant.state {
            TenantState::Running => {
                tracing::info!("Tenant {} is already running", id);
                return Ok(tenant);
            }
            TenantState::Provisioned | TenantState::Stopped => {}
            _ => return Err(self.invalid(&tenant, "start")),
        }

        let report = self.write_artifacts(&tenant)?;
        let stack = self.stack(&tenant);

        self.start_dependencies(&tenant, &stack).await?;
        if tenant.has_service(ServiceKind::Backend) {
            self.apply(&stack, up(ServiceKind::Backend, false)).await?;
            self.health
                .wait_for(
                    self.runtime.as_ref(),
                    &stack,
                    ServiceKind::Backend,
                    Readiness::Running,
                )
                .await?;
        }
        if tenant.has_service(ServiceKind::Frontend) {
            self.apply(&stack, up(ServiceKind::Frontend, false)).await?;
        }
        if tenant.has_service(ServiceKind::Proxy) {
            self.refresh_proxy(&stack, &report).await?;
        }

        self.commit(guard, &mut tenant, TenantState::Running)?;
        Ok(tenant)
    }

    async fn stop_locked(&self, guard: &OperationGuard, id: &TenantId) -> Result<Tenant> {
        let mut tenant = self.registry.read(id)?;
        match tenant.state {
            TenantState::Stopped => {
                tracing::info!("Tenant {} is already stopped", id);
                return Ok(tenant);
            }
            TenantState::Running => {}
            _ => return Err(self.invalid(&tenant, "stop")),
        }

        let stack = self.stack(&tenant);
        self.stop_services(&tenant, &stack).await?;
        self.commit(guard, &mut tenant, TenantState::Stopped)?;
        Ok(tenant)
    }

    async fn remove_locked(&self, guard: &OperationGuard, id: &TenantId) -> Result<Tenant> {
        let mut tenant = self.registry.read(id)?;
        let stack = self.stack(&tenant);

        if tenant.state == TenantState::Running {
            self.stop_services(&tenant, &stack).await?;
        }
        if stack.compose_file.is_file() {
            self.apply(&stack, RuntimeOp::Down { volumes: true }).await?;
        }

        self.registry.delete(&guard.lock, id)?;
        self.unregister_alias(&tenant);
        tenant.state = TenantState::Removed;
        tracing::info!("Tenant {} removed", id);
        Ok(tenant)
    }

    async fn rotate_locked(
        &self,
        guard: &OperationGuard,
        id: &TenantId,
        kind: SecretKind,
    ) -> Result<Tenant> {
        let mut tenant = self.registry.read(id)?;
        if tenant.state == TenantState::Removed
            || (kind == SecretKind::Database && tenant.state != TenantState::Running)
        {
            return Err(self.invalid(&tenant, &format!("rotate the {} secret of", kind)));
        }

        let registry = self.registry.clone();
        let current = tenant.clone();
        let length = self.config.secret_length;
        let secrets = tokio::task::spawn_blocking(move || {
            registry.rotated_secrets(&current, kind, length)
        })
        .await
        .map_err(|e| self.join_error(e))??;

        let stack = self.stack(&tenant);
        if kind == SecretKind::Database {
            // The role must accept the new password before anything uses it
            let sql = format!(
                "ALTER USER \"{}\" WITH PASSWORD '{}'",
                tenant.db_user(),
                secrets.db_password
            );
            self.runtime
                .exec(&stack, ServiceKind::Database, &psql(&tenant, &sql))
                .await
                .map_err(|e| TenantError::RuntimeInvocationFailure {
                    tenant: tenant.id.clone(),
                    step: "apply database password".to_string(),
                    reason: e.to_string(),
                })?;
        }

        tenant.secrets = secrets;
        self.registry.update(&guard.lock, &tenant)?;
        self.write_artifacts(&tenant)?;

        if tenant.state == TenantState::Running {
            let affected: &[ServiceKind] = match kind {
                SecretKind::Cache => &[ServiceKind::Cache, ServiceKind::Backend],
                SecretKind::Database | SecretKind::Session => &[ServiceKind::Backend],
            };
            for &service in affected.iter().filter(|s| tenant.has_service(**s)) {
                self.apply(&stack, up(service, true)).await?;
            }
        }

        let state = tenant.state;
        self.commit(guard, &mut tenant, state)?;
        tracing::info!("Rotated {} secret of {}", kind, id);
        Ok(tenant)
    }

    // ----- steps -------------------------------------------------------------

    /// Database and cache up, database healthy, secondary database present
    async fn start_dependencies(&self, tenant: &Tenant, stack: &StackHandle) -> Result<()> {
        self.apply(
            stack,
            RuntimeOp::Up {
                services: vec![ServiceKind::Database, ServiceKind::Cache],
                no_deps: true,
                force_recreate: false,
            },
        )
        .await?;
        self.health
            .wait_for(
                self.runtime.as_ref(),
                stack,
                ServiceKind::Database,
                Readiness::Healthy,
            )
            .await?;
        self.ensure_transactional_database(tenant, stack).await;
        Ok(())
    }

    /// Create the secondary database on first start
    ///
    /// Failure only warns: the backend reports a missing database itself.
    async fn ensure_transactional_database(&self, tenant: &Tenant, stack: &StackHandle) {
        let name = tenant.db_transactional_name();
        let query = format!("SELECT 1 FROM pg_database WHERE datname = '{}'", name);
        match self
            .runtime
            .exec(stack, ServiceKind::Database, &psql(tenant, &query))
            .await
        {
            Ok(out) if out.trim() == "1" => {}
            Ok(_) => {
                let create = format!(
                    "CREATE DATABASE \"{}\" OWNER \"{}\"",
                    name,
                    tenant.db_user()
                );
                match self
                    .runtime
                    .exec(stack, ServiceKind::Database, &psql(tenant, &create))
                    .await
                {
                    Ok(_) => tracing::info!("Created database {} for {}", name, tenant.id),
                    Err(e) => tracing::warn!("Failed to create database {}: {}", name, e),
                }
            }
            Err(e) => tracing::warn!("Failed to look up database {}: {}", name, e),
        }
    }

    /// Bring the proxy up with current routing
    ///
    /// A changed routing file needs a fresh container: the config is a
    /// single-file bind mount and atomic writes replace the inode. An
    /// unchanged file only needs a reload so upstream names are re-resolved.
    async fn refresh_proxy(&self, stack: &StackHandle, report: &WriteReport) -> Result<()> {
        let running = matches!(
            self.runtime.status(stack, ServiceKind::Proxy).await,
            Ok(status) if status.is_running()
        );
        let routing_changed = report.written.iter().any(|p| p == ROUTING_FILE_NAME);

        match (running, routing_changed) {
            (false, _) => self.apply(stack, up(ServiceKind::Proxy, false)).await,
            (true, true) => self.apply(stack, up(ServiceKind::Proxy, true)).await,
            (true, false) => self
                .runtime
                .exec(
                    stack,
                    ServiceKind::Proxy,
                    &["nginx".to_string(), "-s".to_string(), "reload".to_string()],
                )
                .await
                .map(|_| ())
                .map_err(|e| TenantError::RuntimeInvocationFailure {
                    tenant: stack.tenant.clone(),
                    step: "reload proxy".to_string(),
                    reason: e.to_string(),
                }),
        }
    }

    async fn stop_services(&self, tenant: &Tenant, stack: &StackHandle) -> Result<()> {
        for service in tenant.services().into_iter().rev() {
            self.apply(
                stack,
                RuntimeOp::Stop {
                    services: vec![service],
                },
            )
            .await?;
        }
        Ok(())
    }

    async fn apply(&self, stack: &StackHandle, op: RuntimeOp) -> Result<()> {
        self.runtime
            .apply(stack, &op)
            .await
            .map_err(|e| TenantError::RuntimeInvocationFailure {
                tenant: stack.tenant.clone(),
                step: op.to_string(),
                reason: e.to_string(),
            })
    }

    // ----- plumbing ----------------------------------------------------------

    fn stack(&self, tenant: &Tenant) -> StackHandle {
        StackHandle::for_tenant(tenant, &self.registry.tenant_dir(&tenant.id))
    }

    fn write_artifacts(&self, tenant: &Tenant) -> Result<WriteReport> {
        let dir = self.registry.tenant_dir(&tenant.id);
        let (artifacts, report) = render::render_to_dir(tenant, &self.render, &dir)?;
        tracing::debug!(
            "Artifacts of {} at {}: {} file(s) written",
            tenant.id,
            &artifacts.fingerprint()[..12],
            report.written.len()
        );
        Ok(report)
    }

    /// Run a deploy operation under a deployment record
    ///
    /// The record is opened before `fut` runs and closed with its outcome.
    /// A deployment cut short by the timeout is closed by the failure record.
    async fn tracked<T, F>(
        &self,
        guard: &OperationGuard,
        id: &TenantId,
        operation: &str,
        fut: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let mut tenant = self.registry.read(id)?;
        let deployment = tenant.begin_deployment(operation, current_time_secs());
        self.registry.update(&guard.lock, &tenant)?;
        tracing::info!("Deployment {} of {} started ({})", deployment, id, operation);

        let result = fut.await;

        let (status, message) = match &result {
            Ok(_) => (DeploymentStatus::Succeeded, "deployed".to_string()),
            Err(e) => (DeploymentStatus::Failed, e.to_string()),
        };
        match self.registry.read(id) {
            Ok(mut tenant) => {
                tenant.finish_open_deployments(status, &message, current_time_secs());
                if let Err(e) = self.registry.update(&guard.lock, &tenant) {
                    tracing::warn!("Failed to close deployment {} of {}: {}", deployment, id, e);
                }
            }
            Err(e) => tracing::warn!("Failed to close deployment {} of {}: {}", deployment, id, e),
        }
        tracing::info!("Deployment {} of {} {}", deployment, id, status);
        result
    }

    fn hosts_file(&self) -> Option<HostsFile> {
        let hosts = &self.config.hosts;
        hosts
            .enabled
            .then(|| HostsFile::new(&hosts.file, &hosts.address, self.registry.root()))
    }

    /// Make the tenant alias resolve on this host; failure only warns
    fn register_alias(&self, tenant: &Tenant) {
        let Some(hosts) = self.hosts_file() else {
            return;
        };
        match hosts.register(&tenant.network_alias) {
            Ok(true) => tracing::info!("Added {} to {:?}", tenant.network_alias, hosts.path()),
            Ok(false) => tracing::debug!("{} already listed in {:?}", tenant.network_alias, hosts.path()),
            Err(e) => tracing::warn!(
                "Cannot add {} to {:?}: {}; reach the tenant through localhost",
                tenant.network_alias,
                hosts.path(),
                e
            ),
        }
    }

    fn unregister_alias(&self, tenant: &Tenant) {
        let Some(hosts) = self.hosts_file() else {
            return;
        };
        match hosts.unregister(&tenant.network_alias) {
            Ok(true) => tracing::info!("Removed {} from {:?}", tenant.network_alias, hosts.path()),
            Ok(false) => {}
            Err(e) => tracing::warn!(
                "Cannot remove {} from {:?}: {}",
                tenant.network_alias,
                hosts.path(),
                e
            ),
        }
    }

    fn invalid(&self, tenant: &Tenant, operation: &str) -> TenantError {
        TenantError::InvalidTransition {
            tenant: tenant.id.clone(),
            operation: operation.to_string(),
            state: tenant.state,
        }
    }

    fn join_error(&self, e: tokio::task::JoinError) -> TenantError {
        TenantError::Registry {
            path: self.registry.root().to_path_buf(),
            source: io::Error::new(io::ErrorKind::Other, e.to_string()),
        }
    }

    /// Take the in-process lock, then the file lock of tenant `id`
    async fn acquire(&self, id: &TenantId) -> Result<OperationGuard> {
        let local = self.local_locks.entry(id.clone()).or_default().clone();
        let local = local.lock_owned().await;

        let registry = self.registry.clone();
        let lock_id = id.clone();
        let lock = tokio::task::spawn_blocking(move || registry.lock_tenant(&lock_id))
            .await
            .map_err(|e| self.join_error(e))??;

        Ok(OperationGuard {
            _local: local,
            lock,
        })
    }

    /// Run an operation under the operation timeout
    async fn bounded<T, F>(&self, id: &TenantId, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let timeout = self.config.operation_timeout;
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                let error = TenantError::DeploymentTimeout {
                    tenant: id.clone(),
                    operation: operation.to_string(),
                    timeout_secs: timeout.as_secs(),
                };
                tracing::error!("{}", error);
                self.try_record_failure(id, operation, &error);
                Err(error)
            }
        }
    }

    /// Record the failure of a finished operation on the tenant
    fn settle<T>(
        &self,
        guard: &OperationGuard,
        id: &TenantId,
        operation: &str,
        result: Result<T>,
    ) -> Result<T> {
        if let Err(e) = &result {
            if !is_precondition(e) {
                tracing::error!("{} of {} failed: {}", operation, id, e);
                self.record_failure(&guard.lock, id, operation, e);
            }
        }
        result
    }

    /// Record a timeout once the abandoned operation released the tenant
    fn try_record_failure(&self, id: &TenantId, operation: &str, error: &TenantError) {
        let Some(local) = self.local_locks.get(id).map(|entry| entry.value().clone()) else {
            return;
        };
        let Ok(_local) = local.try_lock_owned() else {
            return;
        };
        match TenantLock::try_acquire(self.registry.root(), id) {
            Ok(Some(lock)) => self.record_failure(&lock, id, operation, error),
            _ => tracing::debug!("Tenant {} is busy; timeout not recorded", id),
        }
    }

    fn record_failure(&self, lock: &TenantLock, id: &TenantId, operation: &str, error: &TenantError) {
        let mut tenant = match self.registry.read(id) {
            Ok(tenant) => tenant,
            Err(_) => return,
        };
        let now = current_time_secs();
        tenant.last_failure = Some(FailureRecord {
            operation: operation.to_string(),
            step: failure_step(error),
            reason: error.to_string(),
            at: now,
        });
        tenant.finish_open_deployments(DeploymentStatus::Failed, &error.to_string(), now);
        if let Err(e) = self.registry.update(lock, &tenant) {
            tracing::warn!("Failed to record failure of {}: {}", id, e);
        }
    }

    /// Persist a completed transition
    fn commit(&self, guard: &OperationGuard, tenant: &mut Tenant, state: TenantState) -> Result<()> {
        let previous = tenant.state;
        tenant.state = state;
        tenant.last_failure = None;
        self.registry.update(&guard.lock, tenant)?;
        if previous != state {
            tracing::info!("Tenant {}: {} -> {}", tenant.id, previous, state);
        }
        Ok(())
    }
}

fn up(service: ServiceKind, force_recreate: bool) -> RuntimeOp {
    RuntimeOp::Up {
        services: vec![service],
        no_deps: true,
        force_recreate,
    }
}

fn psql(tenant: &Tenant, sql: &str) -> Vec<String> {
    vec![
        "psql".to_string(),
        "-U".to_string(),
        tenant.db_user(),
        "-d".to_string(),
        tenant.db_name(),
        "-v".to_string(),
        "ON_ERROR_STOP=1".to_string(),
        "-tAc".to_string(),
        sql.to_string(),
    ]
}

/// Errors raised before an operation had any side effect
fn is_precondition(error: &TenantError) -> bool {
    matches!(
        error,
        TenantError::TenantNotFound(_)
            | TenantError::TenantAlreadyExists(_)
            | TenantError::InvalidTransition { .. }
            | TenantError::InvalidTenantId { .. }
            | TenantError::PortExhaustion { .. }
    )
}

fn failure_step(error: &TenantError) -> String {
    match error {
        TenantError::RuntimeInvocationFailure { step, .. } => step.clone(),
        TenantError::DependencyHealthTimeout { service, .. } => format!("wait for {}", service),
        TenantError::SourceFetchFailure { .. } => "fetch source".to_string(),
        TenantError::RenderFailure { .. } => "render".to_string(),
        TenantError::DeploymentTimeout { .. } => "timeout".to_string(),
        other => other.kind().to_string(),
    }
}
