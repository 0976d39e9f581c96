//! Output formatting utilities for the CLI
//!
//! Tables for tenants, services, repositories and plugins, plus the coloured
//! one-line status messages used by every command.

use tabled::{
    settings::{Style, Width},
    Table, Tabled,
};

use tn_core::time::{elapsed_since, format_age};
use tn_core::{DeploymentRecord, Tenant};
use tn_orchestrator::{AppPlugin, RepoSummary, TenantStatus};

/// Format registered tenants as an ASCII table
///
/// The detailed view adds the declared sources and the last failure.
pub fn format_tenants(tenants: &[Tenant], detailed: bool) -> String {
    if tenants.is_empty() {
        return "No tenants registered".to_string();
    }

    #[derive(Tabled)]
    struct TenantRow {
        #[tabled(rename = "TENANT")]
        id: String,
        #[tabled(rename = "STATE")]
        state: String,
        #[tabled(rename = "ALIAS")]
        alias: String,
        #[tabled(rename = "PORTS (api/web/proxy)")]
        ports: String,
        #[tabled(rename = "AGE")]
        age: String,
    }

    #[derive(Tabled)]
    struct TenantRowDetailed {
        #[tabled(rename = "TENANT")]
        id: String,
        #[tabled(rename = "STATE")]
        state: String,
        #[tabled(rename = "ALIAS")]
        alias: String,
        #[tabled(rename = "PORTS (api/web/proxy)")]
        ports: String,
        #[tabled(rename = "BACKEND")]
        backend: String,
        #[tabled(rename = "FRONTEND")]
        frontend: String,
        #[tabled(rename = "LAST FAILURE")]
        failure: String,
    }

    if detailed {
        let rows: Vec<TenantRowDetailed> = tenants
            .iter()
            .map(|t| TenantRowDetailed {
                id: t.id.to_string(),
                state: t.state.to_string(),
                alias: t.network_alias.clone(),
                ports: format_ports(t),
                backend: source_label(t, tn_core::ServiceKind::Backend),
                frontend: source_label(t, tn_core::ServiceKind::Frontend),
                failure: t
                    .last_failure
                    .as_ref()
                    .map(|f| format!("{} ({})", f.operation, f.step))
                    .unwrap_or_else(|| "-".to_string()),
            })
            .collect();

        Table::new(rows)
            .with(Style::rounded())
            .with(Width::wrap(120))
            .to_string()
    } else {
        let rows: Vec<TenantRow> = tenants
            .iter()
            .map(|t| TenantRow {
                id: t.id.to_string(),
                state: t.state.to_string(),
                alias: t.network_alias.clone(),
                ports: format_ports(t),
                age: format_age(elapsed_since(t.created_at)),
            })
            .collect();

        Table::new(rows).with(Style::rounded()).to_string()
    }
}

/// Key facts about a single tenant, one per line
pub fn format_tenant(tenant: &Tenant) -> String {
    let mut output = String::new();
    output.push_str(&format!("Tenant: {}\n", tenant.id));
    output.push_str(&format!("State: {}\n", tenant.state));
    output.push_str(&format!("Alias: {}\n", tenant.network_alias));
    output.push_str(&format!(
        "Ports: backend {}, frontend {}, proxy {}\n",
        tenant.ports.backend_host_port,
        tenant.ports.frontend_host_port,
        tenant.ports.proxy_host_port
    ));
    for service in [tn_core::ServiceKind::Backend, tn_core::ServiceKind::Frontend] {
        output.push_str(&format!("Source ({}): {}\n", service, source_label(tenant, service)));
    }
    output
}

/// Format a tenant status report
pub fn format_status(status: &TenantStatus) -> String {
    #[derive(Tabled)]
    struct ServiceRow {
        #[tabled(rename = "SERVICE")]
        service: String,
        #[tabled(rename = "CONTAINER")]
        container: String,
        #[tabled(rename = "STATUS")]
        status: String,
    }

    let tenant = &status.tenant;
    let mut output = format_tenant(tenant);
    output.push_str(&format!(
        "Age: {}\n",
        format_age(elapsed_since(tenant.created_at))
    ));
    if let Some(failure) = &tenant.last_failure {
        output.push_str(&format!(
            "Last failure: {} at step '{}' ({} ago): {}\n",
            failure.operation,
            failure.step,
            format_age(elapsed_since(failure.at)),
            failure.reason
        ));
    }

    let rows: Vec<ServiceRow> = status
        .services
        .iter()
        .map(|(service, state)| ServiceRow {
            service: service.to_string(),
            container: tenant.container_name(*service),
            status: state.to_string(),
        })
        .collect();
    output.push('\n');
    output.push_str(&Table::new(rows).with(Style::rounded()).to_string());
    output.push('\n');

    match &status.drift {
        Some(drift) if drift.is_clean() => output.push_str("Artifacts: in sync\n"),
        Some(drift) => {
            output.push_str("Artifacts: drifted from the record\n");
            for path in &drift.missing {
                output.push_str(&format!("  missing:  {}\n", path.display()));
            }
            for path in &drift.modified {
                output.push_str(&format!("  modified: {}\n", path.display()));
            }
        }
        None => output.push_str("Artifacts: unknown\n"),
    }

    if !tenant.deployments.is_empty() {
        output.push('\n');
        output.push_str(&format_deployments(&tenant.deployments));
        output.push('\n');
    }

    output
}

/// Format deployment history, newest first
pub fn format_deployments(deployments: &[DeploymentRecord]) -> String {
    #[derive(Tabled)]
    struct DeploymentRow {
        #[tabled(rename = "DEPLOYMENT")]
        id: String,
        #[tabled(rename = "OPERATION")]
        operation: String,
        #[tabled(rename = "STATUS")]
        status: String,
        #[tabled(rename = "STARTED")]
        started: String,
        #[tabled(rename = "MESSAGE")]
        message: String,
    }

    let rows: Vec<DeploymentRow> = deployments
        .iter()
        .rev()
        .map(|d| DeploymentRow {
            id: d.id.clone(),
            operation: d.operation.clone(),
            status: d.status.to_string(),
            started: format!("{} ago", format_age(elapsed_since(d.started_at))),
            message: truncate(d.message.as_deref().unwrap_or("-"), 60),
        })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format repositories returned by the hosting API
pub fn format_repos(repos: &[RepoSummary]) -> String {
    if repos.is_empty() {
        return "No public repositories".to_string();
    }

    #[derive(Tabled)]
    struct RepoRow {
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "BRANCH")]
        branch: String,
        #[tabled(rename = "FORK")]
        fork: String,
        #[tabled(rename = "URL")]
        url: String,
        #[tabled(rename = "DESCRIPTION")]
        description: String,
    }

    let rows: Vec<RepoRow> = repos
        .iter()
        .map(|r| RepoRow {
            name: r.name.clone(),
            branch: r.default_branch.clone().unwrap_or_else(|| "-".to_string()),
            fork: if r.fork { "yes" } else { "no" }.to_string(),
            url: r.html_url.clone(),
            description: truncate(r.description.as_deref().unwrap_or("-"), 48),
        })
        .collect();

    Table::new(rows)
        .with(Style::rounded())
        .with(Width::wrap(140))
        .to_string()
}

/// Format installed application plugins
pub fn format_plugins<'a>(plugins: impl Iterator<Item = &'a dyn AppPlugin>) -> String {
    #[derive(Tabled)]
    struct PluginRow {
        #[tabled(rename = "PLUGIN")]
        name: String,
        #[tabled(rename = "DESCRIPTION")]
        description: String,
        #[tabled(rename = "BUILDS AS IS")]
        ready: String,
    }

    let rows: Vec<PluginRow> = plugins
        .map(|p| PluginRow {
            name: p.name().to_string(),
            description: p.description().to_string(),
            ready: if p.ready_to_build() { "yes" } else { "no" }.to_string(),
        })
        .collect();

    if rows.is_empty() {
        return "No plugins installed".to_string();
    }
    Table::new(rows).with(Style::rounded()).to_string()
}

fn format_ports(tenant: &Tenant) -> String {
    let [backend, frontend, proxy] = tenant.ports.all();
    format!("{}/{}/{}", backend, frontend, proxy)
}

fn source_label(tenant: &Tenant, service: tn_core::ServiceKind) -> String {
    tenant
        .sources
        .get(service)
        .map(|s| format!("{}#{}", s.repo_url, s.branch))
        .unwrap_or_else(|| "-".to_string())
}

/// Truncate a string with ellipsis if too long
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red with an X prefix
///
/// Outputs to stderr.
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message in yellow to stderr
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an informational message in cyan
pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}
