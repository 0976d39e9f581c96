//! Per-service environment files

use std::collections::BTreeMap;

use super::compose::{CACHE_CONTAINER_PORT, DB_CONTAINER_PORT, PROXY_CONTAINER_PORT};
use super::RenderSettings;
use crate::types::{ServiceKind, Tenant};

/// Backend database pool bounds
const DB_POOL_MIN: u32 = 0;
const DB_POOL_MAX: u32 = 100;

/// Session lifetime handed to the backend, in milliseconds (one day)
const SESSION_MAX_AGE_MS: u64 = 86_400_000;

/// Sorted `KEY=value` entries of one env file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvFile {
    entries: BTreeMap<String, String>,
}

impl EnvFile {
    fn set(&mut self, key: &str, value: impl ToString) -> &mut Self {
        self.entries.insert(key.to_string(), value.to_string());
        self
    }

    /// Value of one variable
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|v| v.as_str())
    }

    /// Serialize as one `KEY=value` line per variable
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.entries {
            out.push_str(key);
            out.push('=');
            out.push_str(value);
            out.push('\n');
        }
        out
    }
}

/// Public base URL of the backend API, as seen through the proxy
pub fn public_api_url(tenant: &Tenant, settings: &RenderSettings) -> String {
    format!(
        "http://{}:{}{}",
        tenant.network_alias, tenant.ports.proxy_host_port, settings.app.api_prefix
    )
}

/// Environment of one service, or `None` for services without one
pub fn env_for(tenant: &Tenant, kind: ServiceKind, settings: &RenderSettings) -> Option<EnvFile> {
    let mut env = EnvFile::default();
    match kind {
        ServiceKind::Database => {
            env.set("POSTGRES_DB", tenant.db_name())
                .set("POSTGRES_USER", tenant.db_user())
                .set("POSTGRES_PASSWORD", &tenant.secrets.db_password);
        }
        ServiceKind::Cache => {
            env.set("REDIS_PASSWORD", &tenant.secrets.cache_password);
        }
        ServiceKind::Backend => {
            env.set("PORT", settings.app.backend_port)
                .set("NODE_ENV", &settings.runtime_mode)
                .set("DB_SERVER", tenant.container_name(ServiceKind::Database))
                .set("DB_PORT", DB_CONTAINER_PORT)
                .set("DB_USERNAME", tenant.db_user())
                .set("DB_PASSWORD", &tenant.secrets.db_password)
                .set("DB_DATABASE_MASTER", tenant.db_name())
                .set("DB_DATABASE_TRANSACTIONAL", tenant.db_transactional_name())
                .set("DB_POOL_MIN", DB_POOL_MIN)
                .set("DB_POOL_MAX", DB_POOL_MAX)
                .set(
                    "REDIS_URL",
                    format!(
                        "redis://:{}@{}:{}",
                        tenant.secrets.cache_password,
                        tenant.container_name(ServiceKind::Cache),
                        CACHE_CONTAINER_PORT
                    ),
                )
                .set("SESSION_SECRET", &tenant.secrets.session_secret)
                .set("SESSION_COOKIE_NAME", format!("{}_session", tenant.id))
                .set("SESSION_MAX_AGE", SESSION_MAX_AGE_MS);
        }
        ServiceKind::Frontend => {
            let api = public_api_url(tenant, settings);
            env.set("PORT", settings.app.frontend_port)
                .set("NODE_ENV", &settings.runtime_mode)
                .set("BASE_URL", &api)
                .set("REACT_APP_BASE_URL", &api)
                .set(
                    "INTERNAL_PROXY_URL",
                    format!(
                        "http://{}:{}",
                        tenant.container_name(ServiceKind::Proxy),
                        PROXY_CONTAINER_PORT
                    ),
                );
        }
        ServiceKind::Proxy => return None,
    }
    Some(env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::sample_tenant;

    #[test]
    fn test_backend_env_carries_connection_details() {
        let tenant = sample_tenant("acme");
        let env = env_for(&tenant, ServiceKind::Backend, &RenderSettings::default()).unwrap();
        assert_eq!(env.get("DB_PASSWORD"), Some("dbpass0123456789"));
        assert_eq!(env.get("DB_SERVER"), Some("acme_db"));
        assert_eq!(env.get("PORT"), Some("5004"));
        assert_eq!(
            env.get("REDIS_URL"),
            Some("redis://:cachepass0123456@acme_redis:6379")
        );
    }

    #[test]
    fn test_frontend_reaches_api_through_proxy() {
        let tenant = sample_tenant("acme");
        let env = env_for(&tenant, ServiceKind::Frontend, &RenderSettings::default()).unwrap();
        assert_eq!(
            env.get("REACT_APP_BASE_URL"),
            Some("http://acme.local:20002/v1/api")
        );
    }

    #[test]
    fn test_render_is_sorted() {
        let tenant = sample_tenant("acme");
        let rendered = env_for(&tenant, ServiceKind::Database, &RenderSettings::default())
            .unwrap()
            .render();
        assert_eq!(
            rendered,
            "POSTGRES_DB=acme_master\nPOSTGRES_PASSWORD=dbpass0123456789\nPOSTGRES_USER=acme_user\n"
        );
    }

    #[test]
    fn test_proxy_has_no_env() {
        let tenant = sample_tenant("acme");
        assert!(env_for(&tenant, ServiceKind::Proxy, &RenderSettings::default()).is_none());
    }
}
