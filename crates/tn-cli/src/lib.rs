//! tn-cli: Command-line interface for Tenantry
//!
//! Provides the `tenantry` CLI for registering tenants and driving their
//! stacks through deploy, start, stop and removal.

pub mod commands;
pub mod output;

use tn_core::TenantError;

/// Exit code for any failure without a dedicated one
pub const EXIT_FAILURE: u8 = 1;

/// Process exit code for an error returned by a command
///
/// Tenant errors keep their own code even when wrapped in context.
pub fn exit_code(error: &anyhow::Error) -> u8 {
    error
        .downcast_ref::<TenantError>()
        .map(TenantError::exit_code)
        .unwrap_or(EXIT_FAILURE)
}
