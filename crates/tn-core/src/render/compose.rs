//! Orchestration definition (`docker-compose.yml`)
//!
//! Every map is a `BTreeMap` and every optional field is skipped when empty,
//! so serializing the same record always yields the same bytes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{env_file_path, RenderSettings, ROUTING_FILE_NAME};
use crate::types::{ServiceKind, Tenant};

/// Port the database listens on inside the tenant network
pub const DB_CONTAINER_PORT: u16 = 5432;
/// Port the cache listens on inside the tenant network
pub const CACHE_CONTAINER_PORT: u16 = 6379;
/// Port the proxy listens on inside its container
pub const PROXY_CONTAINER_PORT: u16 = 80;

/// Database health-check policy
pub const DB_HEALTH_INTERVAL: &str = "10s";
pub const DB_HEALTH_TIMEOUT: &str = "5s";
pub const DB_HEALTH_RETRIES: u32 = 5;
pub const DB_HEALTH_START_PERIOD: &str = "10s";

/// Root of a compose file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeFile {
    /// Compose project name
    pub name: String,

    pub services: BTreeMap<String, ComposeService>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub networks: BTreeMap<String, NetworkDefinition>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, VolumeDefinition>,
}

/// One service of the stack
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComposeService {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildDefinition>,

    pub container_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_file: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub depends_on: BTreeMap<String, DependsOn>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<HealthCheck>,

    pub networks: BTreeMap<String, ServiceNetwork>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart: Option<String>,
}

/// Build context of an application service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildDefinition {
    pub context: String,
}

/// Startup condition on another service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependsOn {
    pub condition: String,
}

impl DependsOn {
    fn healthy() -> Self {
        Self {
            condition: "service_healthy".to_string(),
        }
    }

    fn started() -> Self {
        Self {
            condition: "service_started".to_string(),
        }
    }
}

/// Container health check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub test: Vec<String>,
    pub interval: String,
    pub timeout: String,
    pub retries: u32,
    pub start_period: String,
}

/// Attachment of a service to a network
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceNetwork {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
}

/// Top-level network with an explicit runtime name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkDefinition {
    pub name: String,
    pub driver: String,
}

/// Top-level volume with an explicit runtime name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeDefinition {
    pub name: String,
}

/// Build the compose definition of a tenant
pub fn compose_file(tenant: &Tenant, settings: &RenderSettings) -> ComposeFile {
    let network = tenant.network_name();
    let present = tenant.services();
    let mut services = BTreeMap::new();

    for &kind in &present {
        let mut service = base_service(tenant, kind, &network);
        match kind {
            ServiceKind::Database => {
                service.image = Some(settings.images.database.clone());
                service.volumes = vec![format!("{}:/var/lib/postgresql/data", tenant.db_volume())];
                service.healthcheck = Some(HealthCheck {
                    test: vec![
                        "CMD-SHELL".to_string(),
                        format!("pg_isready -U {} -d {}", tenant.db_user(), tenant.db_name()),
                    ],
                    interval: DB_HEALTH_INTERVAL.to_string(),
                    timeout: DB_HEALTH_TIMEOUT.to_string(),
                    retries: DB_HEALTH_RETRIES,
                    start_period: DB_HEALTH_START_PERIOD.to_string(),
                });
            }
            ServiceKind::Cache => {
                service.image = Some(settings.images.cache.clone());
                // `$$` keeps compose from interpolating; the shell expands it
                // from the env file so the password never lands in the YAML.
                service.command = Some(vec![
                    "sh".to_string(),
                    "-c".to_string(),
                    "exec redis-server --appendonly yes --requirepass \"$$REDIS_PASSWORD\""
                        .to_string(),
                ]);
                service.volumes = vec![format!("{}:/data", tenant.cache_volume())];
            }
            ServiceKind::Backend => {
                service.build = Some(BuildDefinition {
                    context: "./backend".to_string(),
                });
                service.ports = vec![format!(
                    "{}:{}",
                    tenant.ports.backend_host_port, settings.app.backend_port
                )];
            }
            ServiceKind::Frontend => {
                service.build = Some(BuildDefinition {
                    context: "./frontend".to_string(),
                });
                service.ports = vec![format!(
                    "{}:{}",
                    tenant.ports.frontend_host_port, settings.app.frontend_port
                )];
            }
            ServiceKind::Proxy => {
                service.image = Some(settings.images.proxy.clone());
                service.ports = vec![format!(
                    "{}:{}",
                    tenant.ports.proxy_host_port, PROXY_CONTAINER_PORT
                )];
                service.volumes = vec![format!(
                    "./{}:/etc/nginx/conf.d/default.conf:ro",
                    ROUTING_FILE_NAME
                )];
                service.networks.insert(
                    network.clone(),
                    ServiceNetwork {
                        aliases: vec![tenant.network_alias.clone()],
                    },
                );
            }
        }
        // Edges only to services that are rendered; compose rejects the rest
        for dep in kind.dependencies().iter().filter(|d| present.contains(d)) {
            let condition = match dep {
                ServiceKind::Database => DependsOn::healthy(),
                _ => DependsOn::started(),
            };
            service.depends_on.insert(dep.name().to_string(), condition);
        }
        services.insert(kind.name().to_string(), service);
    }

    let mut networks = BTreeMap::new();
    networks.insert(
        network.clone(),
        NetworkDefinition {
            name: network,
            driver: "bridge".to_string(),
        },
    );

    let mut volumes = BTreeMap::new();
    for volume in [tenant.db_volume(), tenant.cache_volume()] {
        volumes.insert(volume.clone(), VolumeDefinition { name: volume });
    }

    ComposeFile {
        name: tenant.project_name(),
        services,
        networks,
        volumes,
    }
}

fn base_service(tenant: &Tenant, kind: ServiceKind, network: &str) -> ComposeService {
    let mut networks = BTreeMap::new();
    networks.insert(network.to_string(), ServiceNetwork::default());
    ComposeService {
        container_name: tenant.container_name(kind),
        env_file: env_file_path(kind)
            .map(|p| vec![format!("./{}", p)])
            .unwrap_or_default(),
        networks,
        restart: Some("unless-stopped".to_string()),
        ..ComposeService::default()
    }
}
