//! Deploy command implementations

use anyhow::Result;

use tn_core::{AppSource, ServiceKind, Tenant, TenantId, TenantState};
use tn_orchestrator::LifecycleController;

use crate::output::{print_info, print_success};

/// Deploy one application from a repository branch
pub async fn deploy_app_command(
    controller: &LifecycleController,
    id: &str,
    service: ServiceKind,
    source: AppSource,
) -> Result<()> {
    let id = TenantId::parse(id)?;
    print_info(&format!(
        "Deploying {} of {} from {} ({})",
        service, id, source.repo_url, source.branch
    ));
    let tenant = controller.deploy_app(&id, service, source).await?;
    print_success(&format!(
        "Deployed {} of {}{}",
        service,
        tenant.id,
        deployment_suffix(&tenant)
    ));
    if tenant.state == TenantState::Stopped {
        print_info(&format!(
            "Tenant is stopped; run 'tenantry start --tenant {}' to serve the new build",
            tenant.id
        ));
    }
    Ok(())
}

/// Deploy both applications, falling back to the recorded sources
pub async fn deploy_command(
    controller: &LifecycleController,
    id: &str,
    backend: Option<AppSource>,
    frontend: Option<AppSource>,
) -> Result<()> {
    let id = TenantId::parse(id)?;
    let tenant = controller.deploy(&id, backend, frontend).await?;
    let deployed: Vec<String> = tenant
        .services()
        .into_iter()
        .filter(|s| s.is_application())
        .map(|s| s.to_string())
        .collect();
    if deployed.is_empty() {
        print_info(&format!(
            "Tenant {} has no application source; pass --backend-repo-url or --frontend-repo-url",
            tenant.id
        ));
    } else {
        print_success(&format!(
            "Deployed {} of {} ({}){}",
            deployed.join(" and "),
            tenant.id,
            tenant.state,
            deployment_suffix(&tenant)
        ));
    }
    Ok(())
}

fn deployment_suffix(tenant: &Tenant) -> String {
    tenant
        .last_deployment()
        .map(|d| format!(" as {}", d.id))
        .unwrap_or_default()
}
