//! Tenant lifecycle command implementations

use anyhow::Result;

use tn_core::types::TenantSources;
use tn_core::{SecretKind, TenantId, TenantState};
use tn_orchestrator::LifecycleController;

use crate::output::{format_tenant, print_info, print_success};

/// Register a tenant and render its infrastructure
pub async fn add_tenant_command(
    controller: &LifecycleController,
    id: &str,
    sources: TenantSources,
) -> Result<()> {
    let id = TenantId::parse(id)?;
    let tenant = controller.add(&id, sources).await?;

    print_success(&format!("Registered tenant {}", tenant.id));
    print!("{}", format_tenant(&tenant));
    print_info(&format!(
        "Deploy an application with: tenantry deploy-backend --tenant {} --backend-repo-url <url> --backend-branch <branch>",
        tenant.id
    ));
    Ok(())
}

/// Tear a tenant down and delete it
pub async fn remove_tenant_command(controller: &LifecycleController, id: &str) -> Result<()> {
    let id = TenantId::parse(id)?;
    let tenant = controller.remove(&id).await?;
    print_success(&format!(
        "Removed tenant {}; ports {:?} are free",
        tenant.id,
        tenant.ports.all()
    ));
    Ok(())
}

pub async fn start_command(controller: &LifecycleController, id: &str) -> Result<()> {
    let id = TenantId::parse(id)?;
    let tenant = controller.start(&id).await?;
    print_success(&format!(
        "Tenant {} is {} at http://{}:{}",
        tenant.id, tenant.state, tenant.network_alias, tenant.ports.proxy_host_port
    ));
    Ok(())
}

pub async fn stop_command(controller: &LifecycleController, id: &str) -> Result<()> {
    let id = TenantId::parse(id)?;
    let tenant = controller.stop(&id).await?;
    print_success(&format!("Tenant {} is {}; volumes kept", tenant.id, tenant.state));
    Ok(())
}

/// Replace one secret and restart what uses it
pub async fn rotate_secrets_command(
    controller: &LifecycleController,
    id: &str,
    secret: SecretKind,
) -> Result<()> {
    let id = TenantId::parse(id)?;
    let tenant = controller.rotate_secrets(&id, secret).await?;
    print_success(&format!("Rotated {} secret of {}", secret, tenant.id));
    if tenant.state != TenantState::Running {
        print_info("Services pick the new value up on their next start");
    }
    Ok(())
}
