//! Logs command implementation

use anyhow::Result;
use futures::StreamExt;
use std::io::Write;

use tn_core::{ServiceKind, TenantError, TenantId};
use tn_orchestrator::{LifecycleController, LogOptions};

use crate::output::print_info;

/// Resolve an `--app` name; unknown names are reported as missing services
pub fn parse_app(tenant: &TenantId, app: &str) -> Result<ServiceKind, TenantError> {
    app.parse().map_err(|_| TenantError::ServiceNotFound {
        tenant: tenant.clone(),
        service: app.to_string(),
    })
}

/// Print service output until it ends or, when following, until Ctrl-C
pub async fn logs_command(
    controller: &LifecycleController,
    id: &str,
    app: Option<&str>,
    options: LogOptions,
) -> Result<()> {
    let id = TenantId::parse(id)?;
    let service = app.map(|a| parse_app(&id, a)).transpose()?;
    let mut lines = controller.logs(&id, service, options).await?;

    let mut stdout = std::io::stdout();
    loop {
        tokio::select! {
            line = lines.next() => match line {
                Some(line) => {
                    writeln!(stdout, "{}", line?)?;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                // Dropping the stream ends the reader, not the service
                print_info("Stopped following logs");
                break;
            }
        }
    }
    stdout.flush()?;
    Ok(())
}
