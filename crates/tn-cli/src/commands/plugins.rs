//! Plugin listing

use anyhow::Result;

use tn_orchestrator::PluginRegistry;

use crate::output::format_plugins;

pub fn list_plugins_command() -> Result<()> {
    let registry = PluginRegistry::builtin();
    println!("{}", format_plugins(registry.plugins()));
    Ok(())
}
