//! Durable tenant registry
//!
//! One directory per tenant under the tenants root:
//!
//! ```text
//! <root>/
//!   .locks/registry.lock
//!   .locks/hosts.lock
//!   .locks/tenants/<id>.lock
//!   <id>/tenant.toml
//!   <id>/docker-compose.yml, nginx.conf, env/, backend/, frontend/
//! ```
//!
//! Directory renames are the commit points. A tenant becomes visible when its
//! staged directory is renamed into place and disappears when its directory
//! is renamed into a hidden trash name, so concurrent readers never observe a
//! half-created or half-deleted tenant.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::OrchestratorConfig;
use crate::error::TenantError;
use crate::fsutil::{self, is_hidden, random_suffix};
use crate::lock::{tenant_lock_dir, LockFile, RegistryLock, TenantLock};
use crate::ports::{PortAllocator, PortRange};
use crate::secrets;
use crate::time::current_time_secs;
use crate::types::{
    SecretKind, Tenant, TenantId, TenantPorts, TenantSecrets, TenantSources, TenantState,
};

/// File name of a tenant record inside its directory
pub const RECORD_FILE_NAME: &str = "tenant.toml";

const STAGING_PREFIX: &str = ".staging-";
const TRASH_PREFIX: &str = ".trash-";

type Result<T> = std::result::Result<T, TenantError>;

/// Parameters that shape a newly created tenant
#[derive(Debug, Clone)]
pub struct Provisioning {
    pub port_range: PortRange,
    pub alias_domain: String,
    pub secret_length: usize,
}

impl From<&OrchestratorConfig> for Provisioning {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            port_range: config.port_range.clone(),
            alias_domain: config.alias_domain.clone(),
            secret_length: config.secret_length,
        }
    }
}

/// Ports and secrets currently held by registered tenants
#[derive(Debug, Default)]
struct Holdings {
    ports: BTreeSet<u16>,
    secrets: HashSet<String>,
}

/// Transactional store of tenant records keyed by tenant id
#[derive(Debug, Clone)]
pub struct TenantRegistry {
    root: PathBuf,
}

impl TenantRegistry {
    /// Open (and create if needed) a registry rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let locks = tenant_lock_dir(&root);
        fs::create_dir_all(&locks).map_err(|e| TenantError::registry(&locks, e))?;
        Ok(Self { root })
    }

    /// Tenants root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of one tenant
    pub fn tenant_dir(&self, id: &TenantId) -> PathBuf {
        self.root.join(id.as_str())
    }

    fn record_path(&self, id: &TenantId) -> PathBuf {
        self.tenant_dir(id).join(RECORD_FILE_NAME)
    }

    /// Whether a tenant with this id is registered
    pub fn exists(&self, id: &TenantId) -> bool {
        self.record_path(id).is_file()
    }

    /// Block until the lock of tenant `id` is held
    pub fn lock_tenant(&self, id: &TenantId) -> Result<TenantLock> {
        TenantLock::acquire(&self.root, id)
            .map_err(|e| TenantError::registry(crate::lock::tenant_lock_path(&self.root, id), e))
    }

    fn lock_registry(&self) -> Result<RegistryLock> {
        RegistryLock::acquire(&self.root)
            .map_err(|e| TenantError::registry(crate::lock::registry_lock_path(&self.root), e))
    }

    /// Register a new tenant
    ///
    /// Ports and secrets are allocated and the record is persisted under the
    /// registry-wide lock, so concurrent creations never share either.
    pub fn create(
        &self,
        id: &TenantId,
        sources: TenantSources,
        provisioning: &Provisioning,
    ) -> Result<Tenant> {
        let _guard = self.lock_registry()?;
        self.sweep_leftovers();

        let target = self.tenant_dir(id);
        if target.exists() {
            return Err(TenantError::TenantAlreadyExists(id.clone()));
        }

        let holdings = self.holdings()?;
        let allocator = PortAllocator::new(provisioning.port_range.clone());
        let allocated = allocator.allocate(id, TenantPorts::COUNT, &holdings.ports)?;
        let ports = TenantPorts::from_allocation(&allocated).ok_or_else(|| {
            TenantError::RenderFailure {
                tenant: id.clone(),
                reason: format!("allocator returned {} ports", allocated.len()),
            }
        })?;
        let secrets =
            secrets::generate_tenant_secrets(provisioning.secret_length, &holdings.secrets)?;

        let tenant = Tenant {
            id: id.clone(),
            state: TenantState::Registered,
            network_alias: format!("{}.{}", id, provisioning.alias_domain),
            created_at: current_time_secs(),
            ports,
            secrets,
            sources,
            last_failure: None,
            deployment_count: 0,
            deployments: Vec::new(),
        };

        let staging = self
            .root
            .join(format!("{}{}-{}", STAGING_PREFIX, id, random_suffix()));
        if let Err(e) = self.stage(&staging, &tenant) {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }
        if let Err(e) = fs::rename(&staging, &target) {
            let _ = fs::remove_dir_all(&staging);
            return Err(TenantError::registry(&target, e));
        }

        tracing::info!(
            "Registered tenant {} with ports {:?}",
            tenant.id,
            tenant.ports.all()
        );
        Ok(tenant)
    }

    fn stage(&self, staging: &Path, tenant: &Tenant) -> Result<()> {
        fs::create_dir(staging).map_err(|e| TenantError::registry(staging, e))?;
        let path = staging.join(RECORD_FILE_NAME);
        let content = encode(&path, tenant)?;
        fsutil::write_atomic(&path, content.as_bytes()).map_err(|e| TenantError::registry(&path, e))
    }

    /// Read one tenant record
    pub fn read(&self, id: &TenantId) -> Result<Tenant> {
        let path = self.record_path(id);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(TenantError::TenantNotFound(id.clone()))
            }
            Err(e) => return Err(TenantError::registry(&path, e)),
        };
        let tenant: Tenant = toml::from_str(&content).map_err(|e| TenantError::CorruptRecord {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        if &tenant.id != id {
            return Err(TenantError::CorruptRecord {
                path,
                reason: format!("record holds id '{}'", tenant.id),
            });
        }
        Ok(tenant)
    }

    /// Persist a changed record
    pub fn update(&self, lock: &TenantLock, tenant: &Tenant) -> Result<()> {
        check_lock(lock, &tenant.id)?;
        let path = self.record_path(&tenant.id);
        if !path.is_file() {
            return Err(TenantError::TenantNotFound(tenant.id.clone()));
        }
        let content = encode(&path, tenant)?;
        fsutil::write_atomic(&path, content.as_bytes())
            .map_err(|e| TenantError::registry(&path, e))?;
        tracing::debug!("Updated record of {} (state {})", tenant.id, tenant.state);
        Ok(())
    }

    /// Draw a replacement for one secret of `tenant`
    ///
    /// Runs under the registry-wide lock so the new value is distinct from
    /// every secret held by any tenant. Nothing is persisted; the caller
    /// applies the new value where needed and then calls [`Self::update`].
    pub fn rotated_secrets(
        &self,
        tenant: &Tenant,
        kind: SecretKind,
        length: usize,
    ) -> Result<TenantSecrets> {
        let _guard = self.lock_registry()?;
        let holdings = self.holdings()?;
        secrets::rotate_secrets(&tenant.secrets, kind, length, &holdings.secrets)
    }

    /// Remove a tenant and everything in its directory
    ///
    /// The rename into the trash is the commit point: once it succeeds the
    /// tenant is gone and its ports are free, even if the final cleanup
    /// fails.
    pub fn delete(&self, lock: &TenantLock, id: &TenantId) -> Result<()> {
        check_lock(lock, id)?;
        let dir = self.tenant_dir(id);
        if !self.exists(id) {
            return Err(TenantError::TenantNotFound(id.clone()));
        }
        let trash = self
            .root
            .join(format!("{}{}-{}", TRASH_PREFIX, id, random_suffix()));
        fs::rename(&dir, &trash).map_err(|e| TenantError::registry(&dir, e))?;

        if let Err(e) = fs::remove_dir_all(&trash) {
            tracing::warn!("Failed to clean up {:?}: {}", trash, e);
        }
        tracing::info!("Deleted tenant {}", id);
        Ok(())
    }

    /// All registered tenants, sorted by id
    pub fn list(&self) -> Result<Vec<Tenant>> {
        let mut tenants = Vec::new();
        for id in self.ids()? {
            match self.read(&id) {
                Ok(tenant) => tenants.push(tenant),
                // Deleted between the directory scan and the read
                Err(TenantError::TenantNotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(tenants)
    }

    fn ids(&self) -> Result<Vec<TenantId>> {
        let entries = fs::read_dir(&self.root).map_err(|e| TenantError::registry(&self.root, e))?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| TenantError::registry(&self.root, e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if is_hidden(name) || !entry.path().is_dir() {
                continue;
            }
            match TenantId::parse(name) {
                Ok(id) => ids.push(id),
                Err(_) => tracing::debug!("Ignoring foreign directory {:?}", entry.path()),
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn holdings(&self) -> Result<Holdings> {
        let mut holdings = Holdings::default();
        for tenant in self.list()? {
            holdings.ports.extend(tenant.ports.all());
            holdings
                .secrets
                .extend(tenant.secrets.values().iter().map(|s| s.to_string()));
        }
        Ok(holdings)
    }

    /// Best-effort removal of staging and trash directories left by crashes
    ///
    /// Called with the registry lock held, so no creation is in flight.
    fn sweep_leftovers(&self) {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with(STAGING_PREFIX) || name.starts_with(TRASH_PREFIX) {
                tracing::debug!("Removing leftover {:?}", entry.path());
                let _ = fs::remove_dir_all(entry.path());
            }
        }
        self.sweep_lock_files();
    }

    /// Unlink lock files of tenants that no longer exist
    ///
    /// A lock currently held is skipped; its holder fails to find the tenant.
    fn sweep_lock_files(&self) {
        let Ok(entries) = fs::read_dir(tenant_lock_dir(&self.root)) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".lock")) else {
                continue;
            };
            let Ok(id) = TenantId::parse(stem) else { continue };
            if self.tenant_dir(&id).exists() {
                continue;
            }
            match LockFile::try_acquire(entry.path()) {
                Ok(Some(lock)) => {
                    if let Err(e) = lock.remove() {
                        tracing::debug!("Cannot remove lock of {}: {}", id, e);
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::debug!("Cannot inspect lock of {}: {}", id, e),
            }
        }
    }
}

fn check_lock(lock: &TenantLock, id: &TenantId) -> Result<()> {
    if lock.tenant() != id {
        return Err(TenantError::registry(
            id.as_str(),
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("lock held for {} not {}", lock.tenant(), id),
            ),
        ));
    }
    Ok(())
}

fn encode(path: &Path, tenant: &Tenant) -> Result<String> {
    toml::to_string_pretty(tenant).map_err(|e| TenantError::CorruptRecord {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}
