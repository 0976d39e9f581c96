//! Repository listing command

use anyhow::{Context, Result};

use tn_core::config::OrchestratorConfig;
use tn_orchestrator::GithubClient;

use crate::output::format_repos;

/// List the public repositories of a user
pub async fn list_github_repos_command(config: &OrchestratorConfig, user: &str) -> Result<()> {
    let client = GithubClient::new(&config.github_api_url)?;
    let repos = client
        .list_user_repos(user)
        .await
        .with_context(|| format!("Failed to list repositories of {}", user))?;
    println!("{}", format_repos(&repos));
    Ok(())
}
