//! CLI command implementations

mod config;
mod deploy;
mod lifecycle;
mod list;
mod logs;
mod plugins;
mod repos;
mod status;

use std::sync::Arc;

use anyhow::{Context, Result};

use tn_core::config::OrchestratorConfig;
use tn_orchestrator::{ComposeRuntime, GitFetcher, LifecycleController};

pub use config::{config_init, config_path, config_show};
pub use deploy::{deploy_app_command, deploy_command};
pub use lifecycle::{
    add_tenant_command, remove_tenant_command, rotate_secrets_command, start_command,
    stop_command,
};
pub use list::list_command;
pub use logs::{logs_command, parse_app};
pub use plugins::list_plugins_command;
pub use repos::list_github_repos_command;
pub use status::status_command;

/// Controller wired to the docker compose CLI and git
pub fn build_controller(config: OrchestratorConfig) -> Result<LifecycleController> {
    let root = config.tenants_root.clone();
    tracing::debug!("Using tenants root {:?}", root);
    let runtime = Arc::new(ComposeRuntime::new(config.runtime.clone()));
    let fetcher = Arc::new(GitFetcher::new(config.runtime.git_binary.clone()));
    LifecycleController::new(config, runtime, fetcher)
        .with_context(|| format!("Failed to open tenant registry at {:?}", root))
}
