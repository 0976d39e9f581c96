//! Stack rendering
//!
//! A tenant record is turned into the files the runtime and the proxy
//! consume. Rendering is a pure function of the record and the render
//! settings; the only side effect lives in [`write_artifacts`].

pub mod compose;
pub mod env;
pub mod routing;

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{AppConfig, ImageConfig, OrchestratorConfig};
use crate::error::TenantError;
use crate::fsutil;
use crate::types::{ServiceKind, Tenant};

/// Orchestration definition file name
pub const COMPOSE_FILE_NAME: &str = "docker-compose.yml";
/// Routing definition file name
pub const ROUTING_FILE_NAME: &str = "nginx.conf";
/// Directory of per-service env files
pub const ENV_DIR_NAME: &str = "env";

/// Relative path of a service's env file, if it has one
pub fn env_file_path(kind: ServiceKind) -> Option<String> {
    match kind {
        ServiceKind::Proxy => None,
        other => Some(format!("{}/{}.env", ENV_DIR_NAME, other.name())),
    }
}

/// Configuration inputs to rendering
#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub images: ImageConfig,
    pub app: AppConfig,
    pub runtime_mode: String,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self::from(&OrchestratorConfig::default())
    }
}

impl From<&OrchestratorConfig> for RenderSettings {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            images: config.images.clone(),
            app: config.app.clone(),
            runtime_mode: config.runtime_mode.clone(),
        }
    }
}

/// Rendered files, keyed by path relative to the tenant directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifacts {
    files: BTreeMap<String, String>,
}

impl Artifacts {
    /// Content of one artifact
    pub fn get(&self, relative: &str) -> Option<&str> {
        self.files.get(relative).map(|s| s.as_str())
    }

    /// All artifacts in path order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Relative paths of all artifacts
    pub fn paths(&self) -> Vec<&str> {
        self.files.keys().map(|k| k.as_str()).collect()
    }

    /// SHA-256 over every path and content, hex encoded
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for (path, content) in &self.files {
            hasher.update(path.as_bytes());
            hasher.update([0u8]);
            hasher.update((content.len() as u64).to_be_bytes());
            hasher.update(content.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

/// Render every artifact of a tenant
pub fn render(tenant: &Tenant, settings: &RenderSettings) -> Result<Artifacts, TenantError> {
    let failure = |reason: String| TenantError::RenderFailure {
        tenant: tenant.id.clone(),
        reason,
    };
    tenant.validate().map_err(failure)?;
    if settings.app.backend_port == 0 || settings.app.frontend_port == 0 {
        return Err(failure("application ports must be non-zero".to_string()));
    }

    let mut files = BTreeMap::new();

    let compose = compose::compose_file(tenant, settings);
    let yaml = serde_yaml::to_string(&compose).map_err(|e| failure(e.to_string()))?;
    files.insert(COMPOSE_FILE_NAME.to_string(), yaml);

    if tenant.has_service(ServiceKind::Proxy) {
        files.insert(
            ROUTING_FILE_NAME.to_string(),
            routing::routing_config(tenant, settings),
        );
    }

    for kind in tenant.services() {
        if let (Some(path), Some(env)) = (env_file_path(kind), env::env_for(tenant, kind, settings))
        {
            files.insert(path, env.render());
        }
    }

    Ok(Artifacts { files })
}

/// Outcome of writing artifacts to disk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub written: Vec<String>,
    pub unchanged: Vec<String>,
}

/// Write artifacts into `dir`, skipping files whose content is unchanged
pub fn write_artifacts(dir: &Path, artifacts: &Artifacts) -> Result<WriteReport, TenantError> {
    let env_dir = dir.join(ENV_DIR_NAME);
    fs::create_dir_all(&env_dir).map_err(|e| TenantError::registry(&env_dir, e))?;

    let mut report = WriteReport::default();
    for (relative, content) in artifacts.iter() {
        let path = dir.join(relative);
        if fsutil::write_if_changed(&path, content.as_bytes())
            .map_err(|e| TenantError::registry(&path, e))?
        {
            report.written.push(relative.to_string());
        } else {
            report.unchanged.push(relative.to_string());
        }
    }
    tracing::debug!(
        "Rendered into {:?}: {} written, {} unchanged",
        dir,
        report.written.len(),
        report.unchanged.len()
    );
    Ok(report)
}

/// Render a tenant and write the result into its directory
pub fn render_to_dir(
    tenant: &Tenant,
    settings: &RenderSettings,
    dir: &Path,
) -> Result<(Artifacts, WriteReport), TenantError> {
    let artifacts = render(tenant, settings)?;
    let report = write_artifacts(dir, &artifacts)?;
    Ok((artifacts, report))
}

/// Differences between the files on disk and a fresh render
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriftReport {
    /// Artifacts that should exist but don't
    pub missing: Vec<PathBuf>,
    /// Artifacts whose content differs from the fresh render
    pub modified: Vec<PathBuf>,
    /// Fingerprint of the fresh render
    pub expected_fingerprint: String,
}

impl DriftReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.modified.is_empty()
    }
}

/// Compare the artifacts in `dir` with what the record renders to
pub fn detect_drift(
    tenant: &Tenant,
    settings: &RenderSettings,
    dir: &Path,
) -> Result<DriftReport, TenantError> {
    let artifacts = render(tenant, settings)?;
    let mut report = DriftReport {
        expected_fingerprint: artifacts.fingerprint(),
        ..DriftReport::default()
    };
    for (relative, content) in artifacts.iter() {
        let path = dir.join(relative);
        match fs::read(&path) {
            Ok(existing) if existing == content.as_bytes() => {}
            Ok(_) => report.modified.push(path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => report.missing.push(path),
            Err(e) => return Err(TenantError::registry(&path, e)),
        }
    }
    Ok(report)
}
