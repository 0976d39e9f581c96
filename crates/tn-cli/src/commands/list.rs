//! List command implementation

use anyhow::Result;

use tn_orchestrator::LifecycleController;

use crate::output::format_tenants;

/// Execute the list command
pub fn list_command(controller: &LifecycleController, long: bool) -> Result<()> {
    let tenants = controller.list()?;
    println!("{}", format_tenants(&tenants, long));
    Ok(())
}
