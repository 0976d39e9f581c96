//! Status command implementation

use anyhow::Result;

use tn_core::TenantId;
use tn_orchestrator::LifecycleController;

use crate::output::{format_status, print_warning};

/// Execute the status command
pub async fn status_command(controller: &LifecycleController, id: &str) -> Result<()> {
    let id = TenantId::parse(id)?;
    let status = controller.status(&id).await?;
    print!("{}", format_status(&status));

    if status.drift.as_ref().is_some_and(|d| !d.is_clean()) {
        print_warning("Artifacts differ from the record; the next start or deploy re-renders them");
    }
    Ok(())
}
