//! Lifecycle integration tests
//!
//! Drives the controller against an in-memory runtime and fetcher over a
//! temporary tenants root.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tempfile::TempDir;

use tn_core::config::{BackoffConfig, HealthConfig, OrchestratorConfig, RuntimeConfig};
use tn_core::ports::PortRange;
use tn_core::types::TenantSources;
use tn_core::{
    AppSource, DeploymentStatus, SecretKind, ServiceKind, TenantError, TenantId, TenantState,
};
use tn_orchestrator::runtime::LogStream;
use tn_orchestrator::{
    ComposeRuntime, FetchError, LifecycleController, LogOptions, Runtime, RuntimeError,
    RuntimeOp, ServiceStatus, SourceFetcher, StackHandle,
};

/// Runtime that records operations and tracks which containers are up
#[derive(Default)]
struct FakeRuntime {
    ops: Mutex<Vec<String>>,
    execs: Mutex<Vec<Vec<String>>>,
    running: Mutex<HashSet<(String, ServiceKind)>>,
    db_unhealthy: AtomicBool,
    hang: AtomicBool,
}

impl FakeRuntime {
    fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    fn clear(&self) {
        self.ops.lock().unwrap().clear();
        self.execs.lock().unwrap().clear();
    }

    fn exec_containing(&self, needle: &str) -> bool {
        self.execs
            .lock()
            .unwrap()
            .iter()
            .any(|argv| argv.iter().any(|a| a.contains(needle)))
    }
}

#[async_trait]
impl Runtime for FakeRuntime {
    async fn apply(&self, stack: &StackHandle, op: &RuntimeOp) -> Result<(), RuntimeError> {
        if self.hang.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        self.ops.lock().unwrap().push(op.to_string());

        let mut running = self.running.lock().unwrap();
        match op {
            RuntimeOp::Build { .. } => {}
            RuntimeOp::Up { services, .. } => {
                for service in services {
                    running.insert((stack.project.clone(), *service));
                }
            }
            RuntimeOp::Stop { services } => {
                for service in services {
                    running.remove(&(stack.project.clone(), *service));
                }
            }
            RuntimeOp::Down { .. } => running.retain(|(project, _)| project != &stack.project),
        }
        Ok(())
    }

    async fn status(
        &self,
        stack: &StackHandle,
        service: ServiceKind,
    ) -> Result<ServiceStatus, RuntimeError> {
        let up = self
            .running
            .lock()
            .unwrap()
            .contains(&(stack.project.clone(), service));
        Ok(match (up, service) {
            (false, _) => ServiceStatus::Missing,
            (true, ServiceKind::Database) if self.db_unhealthy.load(Ordering::SeqCst) => {
                ServiceStatus::Starting
            }
            (true, ServiceKind::Database) => ServiceStatus::Healthy,
            (true, _) => ServiceStatus::Running,
        })
    }

    async fn logs(
        &self,
        _stack: &StackHandle,
        service: ServiceKind,
        _options: LogOptions,
    ) -> Result<LogStream, RuntimeError> {
        let lines = (1..=2).map(move |i| Ok(format!("{} line {}", service, i)));
        Ok(futures::stream::iter(lines).boxed())
    }

    async fn exec(
        &self,
        _stack: &StackHandle,
        _service: ServiceKind,
        argv: &[String],
    ) -> Result<String, RuntimeError> {
        self.execs.lock().unwrap().push(argv.to_vec());
        Ok(String::new())
    }
}

/// Fetcher that fabricates a checkout, failing for unreachable hosts
struct FakeFetcher;

#[async_trait]
impl SourceFetcher for FakeFetcher {
    async fn fetch(&self, source: &AppSource, dest: &Path) -> Result<(), FetchError> {
        if source.repo_url.contains("unreachable") {
            return Err(FetchError::Failed("repository not found".to_string()));
        }
        std::fs::create_dir_all(dest)?;
        std::fs::write(dest.join("Dockerfile"), "FROM scratch\n")?;
        std::fs::write(
            dest.join("SOURCE"),
            format!("{}#{}", source.repo_url, source.branch),
        )?;
        Ok(())
    }
}

struct Harness {
    _dir: TempDir,
    runtime: Arc<FakeRuntime>,
    controller: LifecycleController,
}

fn config(root: &Path) -> OrchestratorConfig {
    OrchestratorConfig {
        tenants_root: root.to_path_buf(),
        port_range: PortRange {
            start: 21000,
            end: 21099,
            reserved: Vec::new(),
        },
        health: HealthConfig {
            timeout: Duration::from_secs(2),
            max_attempts: 3,
            backoff: BackoffConfig {
                initial: Duration::from_millis(10),
                max: Duration::from_millis(50),
                multiplier: 2.0,
                jitter: 0.0,
            },
        },
        ..OrchestratorConfig::default()
    }
}

fn harness_with(adjust: impl FnOnce(&mut OrchestratorConfig)) -> Harness {
    let dir = TempDir::new().unwrap();
    let mut config = config(dir.path());
    adjust(&mut config);
    let runtime = Arc::new(FakeRuntime::default());
    let controller =
        LifecycleController::new(config, runtime.clone(), Arc::new(FakeFetcher)).unwrap();
    Harness {
        _dir: dir,
        runtime,
        controller,
    }
}

fn harness() -> Harness {
    harness_with(|_| {})
}

fn id(s: &str) -> TenantId {
    TenantId::parse(s).unwrap()
}

fn backend_source() -> AppSource {
    AppSource::new("https://git.example.com/acme/api.git", "main")
}

fn frontend_source() -> AppSource {
    AppSource::new("https://git.example.com/acme/web.git", "main")
}

#[tokio::test]
async fn test_full_lifecycle() {
    let h = harness();
    let acme = id("acme");

    let tenant = h.controller.add(&acme, TenantSources::default()).await.unwrap();
    assert_eq!(tenant.state, TenantState::Registered);
    let dir = h.controller.registry().tenant_dir(&acme);
    assert!(dir.join("docker-compose.yml").is_file());
    assert!(dir.join("env/db.env").is_file());
    assert!(!dir.join("nginx.conf").exists());

    let tenant = h
        .controller
        .deploy_backend(&acme, backend_source())
        .await
        .unwrap();
    assert_eq!(tenant.state, TenantState::Provisioned);
    assert_eq!(
        h.runtime.ops(),
        vec!["build backend", "up db,redis", "up backend"]
    );
    assert!(h.runtime.exec_containing("CREATE DATABASE"));
    let env = std::fs::read_to_string(dir.join("env/backend.env")).unwrap();
    assert!(env.contains(&format!("DB_PASSWORD={}", tenant.secrets.db_password)));

    let tenant = h
        .controller
        .deploy_frontend(&acme, frontend_source())
        .await
        .unwrap();
    assert_eq!(tenant.state, TenantState::Provisioned);
    assert!(dir.join("nginx.conf").is_file());
    assert!(h.runtime.ops().contains(&"up nginx".to_string()));

    h.runtime.clear();
    let tenant = h.controller.start(&acme).await.unwrap();
    assert_eq!(tenant.state, TenantState::Running);
    assert_eq!(
        h.runtime.ops(),
        vec!["up db,redis", "up backend", "up frontend"]
    );
    // Proxy was already up with unchanged routing
    assert!(h.runtime.exec_containing("reload"));

    h.runtime.clear();
    let tenant = h.controller.stop(&acme).await.unwrap();
    assert_eq!(tenant.state, TenantState::Stopped);
    assert_eq!(
        h.runtime.ops(),
        vec![
            "stop nginx",
            "stop frontend",
            "stop backend",
            "stop redis",
            "stop db"
        ]
    );

    h.runtime.clear();
    let removed = h.controller.remove(&acme).await.unwrap();
    assert_eq!(removed.state, TenantState::Removed);
    assert_eq!(h.runtime.ops(), vec!["down --volumes"]);
    assert!(!dir.exists());
    assert!(h.controller.list().unwrap().is_empty());
}

#[tokio::test]
async fn test_start_and_stop_are_idempotent() {
    let h = harness();
    let acme = id("acme");
    h.controller.add(&acme, TenantSources::default()).await.unwrap();
    h.controller
        .deploy_app(&acme, ServiceKind::Backend, backend_source())
        .await
        .unwrap();

    h.controller.start(&acme).await.unwrap();
    h.runtime.clear();
    let tenant = h.controller.start(&acme).await.unwrap();
    assert_eq!(tenant.state, TenantState::Running);
    assert!(h.runtime.ops().is_empty());

    h.controller.stop(&acme).await.unwrap();
    h.runtime.clear();
    let tenant = h.controller.stop(&acme).await.unwrap();
    assert_eq!(tenant.state, TenantState::Stopped);
    assert!(h.runtime.ops().is_empty());
}

#[tokio::test]
async fn test_start_registered_tenant_is_rejected() {
    let h = harness();
    let acme = id("acme");
    h.controller.add(&acme, TenantSources::default()).await.unwrap();

    let err = h.controller.start(&acme).await.unwrap_err();
    assert!(matches!(err, TenantError::InvalidTransition { .. }));
    // Precondition failures are not recorded
    let tenant = h.controller.registry().read(&acme).unwrap();
    assert!(tenant.last_failure.is_none());
}

#[tokio::test]
async fn test_unhealthy_database_stops_start() {
    let h = harness();
    let acme = id("acme");
    h.controller.add(&acme, TenantSources::default()).await.unwrap();
    h.controller
        .deploy_app(&acme, ServiceKind::Backend, backend_source())
        .await
        .unwrap();

    h.runtime.db_unhealthy.store(true, Ordering::SeqCst);
    h.runtime.clear();
    let err = h.controller.start(&acme).await.unwrap_err();
    match err {
        TenantError::DependencyHealthTimeout {
            service, attempts, ..
        } => {
            assert_eq!(service, ServiceKind::Database);
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected error: {other}"),
    }
    // Dependents were never started
    assert!(!h.runtime.ops().contains(&"up backend".to_string()));

    let tenant = h.controller.registry().read(&acme).unwrap();
    assert_eq!(tenant.state, TenantState::Provisioned);
    let failure = tenant.last_failure.unwrap();
    assert_eq!(failure.operation, "start");
    assert_eq!(failure.step, "wait for db");
}

#[tokio::test]
async fn test_unreachable_source_leaves_artifacts_untouched() {
    let h = harness();
    let acme = id("acme");
    h.controller.add(&acme, TenantSources::default()).await.unwrap();
    h.controller
        .deploy_app(&acme, ServiceKind::Backend, backend_source())
        .await
        .unwrap();

    let dir = h.controller.registry().tenant_dir(&acme);
    let compose_before = std::fs::read_to_string(dir.join("docker-compose.yml")).unwrap();
    let env_before = std::fs::read_to_string(dir.join("env/backend.env")).unwrap();

    h.runtime.clear();
    let err = h
        .controller
        .deploy_app(
            &acme,
            ServiceKind::Backend,
            AppSource::new("https://unreachable.example.com/api.git", "dev"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TenantError::SourceFetchFailure { .. }));
    assert!(h.runtime.ops().is_empty());

    assert_eq!(
        std::fs::read_to_string(dir.join("docker-compose.yml")).unwrap(),
        compose_before
    );
    assert_eq!(
        std::fs::read_to_string(dir.join("env/backend.env")).unwrap(),
        env_before
    );
    assert_eq!(
        std::fs::read_to_string(dir.join("backend/SOURCE")).unwrap(),
        "https://git.example.com/acme/api.git#main"
    );
    // No staging leftovers next to the checkout
    let leftovers: Vec<_> = std::fs::read_dir(&dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with(".fetch-"))
        .collect();
    assert!(leftovers.is_empty());

    let tenant = h.controller.registry().read(&acme).unwrap();
    assert_eq!(tenant.sources.backend, Some(backend_source()));
    assert_eq!(tenant.last_failure.unwrap().step, "fetch source");
}

#[tokio::test]
async fn test_deploy_to_stopped_tenant_only_builds() {
    let h = harness();
    let acme = id("acme");
    h.controller.add(&acme, TenantSources::default()).await.unwrap();
    h.controller
        .deploy_app(&acme, ServiceKind::Backend, backend_source())
        .await
        .unwrap();
    h.controller.start(&acme).await.unwrap();
    h.controller.stop(&acme).await.unwrap();

    h.runtime.clear();
    let tenant = h
        .controller
        .deploy_app(
            &acme,
            ServiceKind::Backend,
            AppSource::new("https://git.example.com/acme/api.git", "release"),
        )
        .await
        .unwrap();
    assert_eq!(tenant.state, TenantState::Stopped);
    assert_eq!(h.runtime.ops(), vec!["build backend"]);
    assert_eq!(tenant.sources.backend.unwrap().branch, "release");
}

#[tokio::test]
async fn test_redeploy_running_tenant_stays_running() {
    let h = harness();
    let acme = id("acme");
    h.controller.add(&acme, TenantSources::default()).await.unwrap();
    h.controller
        .deploy_app(&acme, ServiceKind::Backend, backend_source())
        .await
        .unwrap();
    h.controller.start(&acme).await.unwrap();

    let tenant = h
        .controller
        .deploy_app(&acme, ServiceKind::Backend, backend_source())
        .await
        .unwrap();
    assert_eq!(tenant.state, TenantState::Running);
}

#[tokio::test]
async fn test_deploy_uses_recorded_sources() {
    let h = harness();
    let acme = id("acme");
    let sources = TenantSources {
        backend: Some(backend_source()),
        frontend: Some(frontend_source()),
    };
    h.controller.add(&acme, sources).await.unwrap();

    let tenant = h.controller.deploy(&acme, None, None).await.unwrap();
    assert_eq!(tenant.state, TenantState::Provisioned);
    let ops = h.runtime.ops();
    assert!(ops.contains(&"build backend".to_string()));
    assert!(ops.contains(&"build frontend".to_string()));
    assert!(ops.contains(&"up nginx".to_string()));
}

#[tokio::test]
async fn test_removed_tenant_ports_are_reused_with_new_secrets() {
    let h = harness();
    let acme = id("acme");
    let first = h.controller.add(&acme, TenantSources::default()).await.unwrap();
    h.controller.remove(&acme).await.unwrap();

    let second = h.controller.add(&acme, TenantSources::default()).await.unwrap();
    assert_eq!(first.ports, second.ports);
    assert_ne!(first.secrets.db_password, second.secrets.db_password);
    assert_ne!(first.secrets.session_secret, second.secrets.session_secret);
}

#[tokio::test]
async fn test_duplicate_add_is_rejected() {
    let h = harness();
    let acme = id("acme");
    h.controller.add(&acme, TenantSources::default()).await.unwrap();
    let err = h
        .controller
        .add(&acme, TenantSources::default())
        .await
        .unwrap_err();
    assert!(matches!(err, TenantError::TenantAlreadyExists(_)));
    assert_eq!(err.exit_code(), 4);
}

#[tokio::test]
async fn test_concurrent_adds_get_disjoint_ports() {
    let h = harness();
    let (a, b, c) = (id("alpha"), id("beta"), id("gamma"));
    let (ra, rb, rc) = tokio::join!(
        h.controller.add(&a, TenantSources::default()),
        h.controller.add(&b, TenantSources::default()),
        h.controller.add(&c, TenantSources::default()),
    );

    let mut seen = HashSet::new();
    for tenant in [ra.unwrap(), rb.unwrap(), rc.unwrap()] {
        for port in tenant.ports.all() {
            assert!(seen.insert(port), "port {} allocated twice", port);
        }
    }
    assert_eq!(h.controller.list().unwrap().len(), 3);
}

#[tokio::test]
async fn test_port_exhaustion() {
    let h = harness_with(|config| {
        config.port_range = PortRange {
            start: 21000,
            end: 21001,
            reserved: Vec::new(),
        }
    });
    let err = h
        .controller
        .add(&id("acme"), TenantSources::default())
        .await
        .unwrap_err();
    assert!(matches!(err, TenantError::PortExhaustion { .. }));
    assert!(!h.controller.registry().exists(&id("acme")));
}

#[tokio::test]
async fn test_operation_timeout_leaves_state_unchanged() {
    let h = harness_with(|config| config.operation_timeout = Duration::from_millis(200));
    let acme = id("acme");
    h.controller.add(&acme, TenantSources::default()).await.unwrap();

    h.runtime.hang.store(true, Ordering::SeqCst);
    let err = h
        .controller
        .deploy_app(&acme, ServiceKind::Backend, backend_source())
        .await
        .unwrap_err();
    assert!(matches!(err, TenantError::DeploymentTimeout { .. }));
    assert_eq!(err.exit_code(), 6);

    let tenant = h.controller.registry().read(&acme).unwrap();
    assert_eq!(tenant.state, TenantState::Registered);
    let failure = tenant.last_failure.unwrap();
    assert_eq!(failure.operation, "deploy-backend");
    assert_eq!(failure.step, "timeout");
}

#[tokio::test]
async fn test_database_rotation_requires_running_stack() {
    let h = harness();
    let acme = id("acme");
    h.controller.add(&acme, TenantSources::default()).await.unwrap();
    h.controller
        .deploy_app(&acme, ServiceKind::Backend, backend_source())
        .await
        .unwrap();

    let err = h
        .controller
        .rotate_secrets(&acme, SecretKind::Database)
        .await
        .unwrap_err();
    assert!(matches!(err, TenantError::InvalidTransition { .. }));

    h.controller.start(&acme).await.unwrap();
    let before = h.controller.registry().read(&acme).unwrap();
    h.runtime.clear();
    let after = h
        .controller
        .rotate_secrets(&acme, SecretKind::Database)
        .await
        .unwrap();

    assert_ne!(before.secrets.db_password, after.secrets.db_password);
    assert_eq!(before.secrets.cache_password, after.secrets.cache_password);
    assert!(h.runtime.exec_containing(&after.secrets.db_password));
    assert_eq!(h.runtime.ops(), vec!["recreate backend"]);

    let dir = h.controller.registry().tenant_dir(&acme);
    let env = std::fs::read_to_string(dir.join("env/backend.env")).unwrap();
    assert!(env.contains(&after.secrets.db_password));
}

#[tokio::test]
async fn test_session_rotation_on_provisioned_tenant() {
    let h = harness();
    let acme = id("acme");
    h.controller.add(&acme, TenantSources::default()).await.unwrap();
    h.controller
        .deploy_app(&acme, ServiceKind::Backend, backend_source())
        .await
        .unwrap();

    h.runtime.clear();
    let before = h.controller.registry().read(&acme).unwrap();
    let after = h
        .controller
        .rotate_secrets(&acme, SecretKind::Session)
        .await
        .unwrap();
    assert_ne!(before.secrets.session_secret, after.secrets.session_secret);
    assert_eq!(after.state, TenantState::Provisioned);
    assert!(h.runtime.ops().is_empty());
}

#[tokio::test]
async fn test_logs_of_undeployed_service() {
    let h = harness();
    let acme = id("acme");
    h.controller.add(&acme, TenantSources::default()).await.unwrap();
    h.controller
        .deploy_app(&acme, ServiceKind::Backend, backend_source())
        .await
        .unwrap();

    let result = h
        .controller
        .logs(&acme, Some(ServiceKind::Frontend), LogOptions::default())
        .await;
    assert!(matches!(result, Err(TenantError::ServiceNotFound { .. })));

    let lines: Vec<String> = h
        .controller
        .logs(&acme, None, LogOptions::default())
        .await
        .unwrap()
        .map(|line| line.unwrap())
        .collect()
        .await;
    assert_eq!(lines, vec!["backend line 1", "backend line 2"]);
}

#[tokio::test]
async fn test_status_reports_services_and_drift() {
    let h = harness();
    let acme = id("acme");
    h.controller.add(&acme, TenantSources::default()).await.unwrap();
    h.controller
        .deploy_app(&acme, ServiceKind::Backend, backend_source())
        .await
        .unwrap();

    let status = h.controller.status(&acme).await.unwrap();
    assert_eq!(status.services.len(), 3);
    assert!(status.drift.as_ref().unwrap().is_clean());

    let dir = h.controller.registry().tenant_dir(&acme);
    std::fs::write(dir.join("env/redis.env"), "REDIS_PASSWORD=edited\n").unwrap();
    let status = h.controller.status(&acme).await.unwrap();
    assert_eq!(status.drift.unwrap().modified.len(), 1);
}

#[tokio::test]
async fn test_unknown_tenant() {
    let h = harness();
    let err = h.controller.start(&id("ghost")).await.unwrap_err();
    assert!(matches!(err, TenantError::TenantNotFound(_)));
    assert_eq!(err.exit_code(), 3);
}

#[tokio::test]
async fn test_frontend_deployed_before_backend() {
    let h = harness();
    let acme = id("acme");
    h.controller.add(&acme, TenantSources::default()).await.unwrap();

    let tenant = h
        .controller
        .deploy_frontend(&acme, frontend_source())
        .await
        .unwrap();
    assert_eq!(tenant.state, TenantState::Provisioned);
    assert_eq!(
        h.runtime.ops(),
        vec!["build frontend", "up db,redis", "up frontend"]
    );
    let dir = h.controller.registry().tenant_dir(&acme);
    let compose = std::fs::read_to_string(dir.join("docker-compose.yml")).unwrap();
    assert!(!compose.contains("backend"));
    assert!(!dir.join("nginx.conf").exists());

    h.controller
        .deploy_backend(&acme, backend_source())
        .await
        .unwrap();
    let compose = std::fs::read_to_string(dir.join("docker-compose.yml")).unwrap();
    assert!(compose.contains("nginx"));
    assert!(dir.join("nginx.conf").is_file());

    let tenant = h.controller.start(&acme).await.unwrap();
    assert_eq!(tenant.state, TenantState::Running);
}

#[tokio::test]
async fn test_deploy_sweeps_interrupted_checkouts() {
    let h = harness();
    let acme = id("acme");
    h.controller.add(&acme, TenantSources::default()).await.unwrap();
    let dir = h.controller.registry().tenant_dir(&acme);
    std::fs::create_dir(dir.join(".fetch-backend-stale1")).unwrap();
    std::fs::create_dir(dir.join(".old-backend-stale2")).unwrap();

    h.controller
        .deploy_backend(&acme, backend_source())
        .await
        .unwrap();
    assert!(!dir.join(".fetch-backend-stale1").exists());
    assert!(!dir.join(".old-backend-stale2").exists());
    assert!(dir.join("backend/SOURCE").is_file());
}

/// Controller over the docker adapter with scripted commands
#[cfg(unix)]
fn compose_harness(
    dir: &Path,
    runtime: RuntimeConfig,
    timeout: Duration,
) -> LifecycleController {
    let mut config = config(&dir.join("tenants"));
    config.runtime = runtime.clone();
    config.operation_timeout = timeout;
    LifecycleController::new(
        config,
        Arc::new(ComposeRuntime::new(runtime)),
        Arc::new(FakeFetcher),
    )
    .unwrap()
}

#[cfg(unix)]
fn script(dir: &Path, name: &str, body: &str) -> String {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}

#[cfg(unix)]
#[tokio::test]
async fn test_timed_out_build_stops_acting() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("built");
    let controller = compose_harness(
        dir.path(),
        RuntimeConfig {
            compose_command: vec![
                "sh".to_string(),
                "-c".to_string(),
                format!("sleep 1; touch {}", marker.display()),
            ],
            ..RuntimeConfig::default()
        },
        Duration::from_millis(300),
    );
    let acme = id("acme");
    controller.add(&acme, TenantSources::default()).await.unwrap();

    let err = controller
        .deploy_backend(&acme, backend_source())
        .await
        .unwrap_err();
    assert!(matches!(err, TenantError::DeploymentTimeout { .. }));

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!marker.exists());
    let tenant = controller.registry().read(&acme).unwrap();
    assert_eq!(tenant.state, TenantState::Registered);
}

#[cfg(unix)]
#[tokio::test]
async fn test_logs_of_missing_container_fail() {
    let dir = TempDir::new().unwrap();
    let docker = script(
        dir.path(),
        "docker",
        "echo 'Error response from daemon: No such container: acme_db' >&2\nexit 1",
    );
    let controller = compose_harness(
        dir.path(),
        RuntimeConfig {
            docker_binary: docker,
            ..RuntimeConfig::default()
        },
        Duration::from_secs(30),
    );
    let acme = id("acme");
    controller.add(&acme, TenantSources::default()).await.unwrap();

    let items: Vec<Result<String, TenantError>> = controller
        .logs(&acme, Some(ServiceKind::Database), LogOptions::default())
        .await
        .unwrap()
        .collect()
        .await;
    let err = items
        .into_iter()
        .find_map(|item| item.err())
        .expect("log reader failure is reported");
    assert!(matches!(err, TenantError::RuntimeInvocationFailure { .. }));
    assert!(err.to_string().contains("No such container"));
}

#[tokio::test]
async fn test_deployments_are_recorded() {
    let h = harness();
    let acme = id("acme");
    h.controller.add(&acme, TenantSources::default()).await.unwrap();

    let tenant = h
        .controller
        .deploy_backend(&acme, backend_source())
        .await
        .unwrap();
    let first = tenant.last_deployment().unwrap();
    assert_eq!(first.id, "CD00001");
    assert_eq!(first.operation, "deploy-backend");
    // The returned record was committed before the deployment closed
    let stored = h.controller.registry().read(&acme).unwrap();
    let first = stored.last_deployment().unwrap();
    assert_eq!(first.status, DeploymentStatus::Succeeded);
    assert!(first.finished_at.is_some());

    h.controller
        .deploy_frontend(&acme, AppSource::new("https://unreachable.example/web.git", "main"))
        .await
        .unwrap_err();
    let stored = h.controller.registry().read(&acme).unwrap();
    assert_eq!(stored.deployments.len(), 2);
    let failed = stored.last_deployment().unwrap();
    assert_eq!(failed.id, "CD00002");
    assert_eq!(failed.status, DeploymentStatus::Failed);
    assert!(failed.message.as_deref().unwrap().contains("unreachable"));

    // Other operations leave the history alone
    h.controller.start(&acme).await.unwrap();
    assert_eq!(h.controller.registry().read(&acme).unwrap().deployments.len(), 2);
}

#[tokio::test]
async fn test_timed_out_deployment_is_closed_as_failed() {
    let h = harness_with(|config| config.operation_timeout = Duration::from_millis(200));
    let acme = id("acme");
    h.controller.add(&acme, TenantSources::default()).await.unwrap();

    h.runtime.hang.store(true, Ordering::SeqCst);
    h.controller
        .deploy(&acme, Some(backend_source()), None)
        .await
        .unwrap_err();

    let tenant = h.controller.registry().read(&acme).unwrap();
    let deployment = tenant.last_deployment().unwrap();
    assert_eq!(deployment.operation, "deploy");
    assert_eq!(deployment.status, DeploymentStatus::Failed);
    assert!(deployment.message.as_deref().unwrap().contains("operation timeout"));
}

#[tokio::test]
async fn test_alias_registered_in_hosts_file() {
    let hosts_dir = TempDir::new().unwrap();
    let hosts_path = hosts_dir.path().join("hosts");
    std::fs::write(&hosts_path, "127.0.0.1 localhost\n").unwrap();
    let path = hosts_path.clone();
    let h = harness_with(move |config| {
        config.hosts.enabled = true;
        config.hosts.file = path;
    });

    let acme = id("acme");
    let tenant = h.controller.add(&acme, TenantSources::default()).await.unwrap();
    let content = std::fs::read_to_string(&hosts_path).unwrap();
    assert!(content.contains(&format!("127.0.0.1 {} # tenantry", tenant.network_alias)));

    h.controller.remove(&acme).await.unwrap();
    assert_eq!(
        std::fs::read_to_string(&hosts_path).unwrap(),
        "127.0.0.1 localhost\n"
    );
}

#[tokio::test]
async fn test_hosts_file_untouched_when_disabled() {
    let hosts_dir = TempDir::new().unwrap();
    let hosts_path = hosts_dir.path().join("hosts");
    let path = hosts_path.clone();
    let h = harness_with(move |config| config.hosts.file = path);

    h.controller.add(&id("acme"), TenantSources::default()).await.unwrap();
    assert!(!hosts_path.exists());
}
