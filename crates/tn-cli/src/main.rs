//! Tenantry CLI
//!
//! Single binary for every tenant operation:
//! - Registration and removal (add-tenant, remove-tenant)
//! - Application deployment (deploy-backend, deploy-frontend, deploy)
//! - Stack control and inspection (start, stop, status, logs, list)
//! - Helpers (rotate-secrets, list-github-repos, list-plugins-cmd, config)

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tenantry::commands;
use tenantry::output::print_error;
use tn_core::config::{self, OrchestratorConfig};
use tn_core::types::TenantSources;
use tn_core::{AppSource, SecretKind, ServiceKind};
use tn_orchestrator::LogOptions;

#[derive(Parser)]
#[command(name = "tenantry")]
#[command(author, version, about = "Multi-tenant application stack orchestrator")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding tenant records (overrides config)
    #[arg(long, global = true, env = "TENANTRY_TENANTS_ROOT")]
    tenants_root: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Selects one tenant
#[derive(Args)]
struct TenantArg {
    /// Tenant identifier
    #[arg(short, long = "tenant")]
    tenant: String,
}

#[derive(Args)]
struct BackendSource {
    /// Backend repository URL
    #[arg(long)]
    backend_repo_url: Option<String>,
    /// Backend branch
    #[arg(long, default_value = "main")]
    backend_branch: String,
}

#[derive(Args)]
struct FrontendSource {
    /// Frontend repository URL
    #[arg(long)]
    frontend_repo_url: Option<String>,
    /// Frontend branch
    #[arg(long, default_value = "main")]
    frontend_branch: String,
}

impl BackendSource {
    fn source(self) -> Option<AppSource> {
        let branch = self.backend_branch;
        self.backend_repo_url.map(|url| AppSource::new(url, branch))
    }
}

impl FrontendSource {
    fn source(self) -> Option<AppSource> {
        let branch = self.frontend_branch;
        self.frontend_repo_url.map(|url| AppSource::new(url, branch))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Register a tenant: allocate ports and secrets, render its stack
    AddTenant {
        /// Tenant identifier (lowercase letters, digits and '-')
        id: String,
        #[command(flatten)]
        backend: BackendSource,
        #[command(flatten)]
        frontend: FrontendSource,
    },

    /// Tear down a tenant's containers and volumes and delete it
    RemoveTenant {
        /// Tenant identifier
        id: String,
    },

    /// Fetch, build and start the backend application
    DeployBackend {
        #[command(flatten)]
        tenant: TenantArg,
        /// Backend repository URL
        #[arg(long)]
        backend_repo_url: String,
        /// Backend branch
        #[arg(long)]
        backend_branch: String,
    },

    /// Fetch, build and start the frontend application
    DeployFrontend {
        #[command(flatten)]
        tenant: TenantArg,
        /// Frontend repository URL
        #[arg(long)]
        frontend_repo_url: String,
        /// Frontend branch
        #[arg(long)]
        frontend_branch: String,
    },

    /// Deploy the backend and the frontend, using recorded sources by default
    Deploy {
        /// Tenant identifier
        id: String,
        #[command(flatten)]
        backend: BackendSource,
        #[command(flatten)]
        frontend: FrontendSource,
    },

    /// Start a tenant's stack in dependency order
    Start {
        #[command(flatten)]
        tenant: TenantArg,
    },

    /// Stop a tenant's stack, keeping its data
    Stop {
        #[command(flatten)]
        tenant: TenantArg,
    },

    /// Show service output
    Logs {
        #[command(flatten)]
        tenant: TenantArg,
        /// Service to read (backend, frontend, nginx, db, redis)
        #[arg(short, long)]
        app: Option<String>,
        /// Keep streaming new output
        #[arg(short, long)]
        follow: bool,
        /// Only show the last N lines
        #[arg(long)]
        tail: Option<usize>,
    },

    /// List registered tenants
    List {
        /// Show sources and last failures
        #[arg(short, long)]
        long: bool,
    },

    /// Show a tenant's services and artifact drift
    Status {
        #[command(flatten)]
        tenant: TenantArg,
    },

    /// Replace one of a tenant's secrets
    RotateSecrets {
        #[command(flatten)]
        tenant: TenantArg,
        /// Secret to replace (database, cache, session)
        #[arg(short, long)]
        secret: SecretKind,
    },

    /// List a user's public repositories
    ListGithubRepos {
        /// Account name on the hosting service
        username: String,
    },

    /// List installed application plugins
    ListPluginsCmd,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Show config file path
    Path,
    /// Write the default configuration
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            print_error(&format!("{:#}", e));
            ExitCode::from(tenantry::exit_code(&e))
        }
    }
}

/// Effective configuration: file values, then command-line overrides
fn load_config(cli: &Cli) -> Result<OrchestratorConfig> {
    let mut config = config::load_orchestrator_config(cli.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(root) = &cli.tenants_root {
        config.tenants_root = root.clone();
    }
    Ok(config)
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone();
    let config_path = config_path.as_deref();

    // Commands that never touch the registry
    match &cli.command {
        Commands::Config { action } => {
            return match action {
                ConfigAction::Show => commands::config_show(config_path),
                ConfigAction::Path => commands::config_path(config_path),
                ConfigAction::Init { force } => commands::config_init(config_path, *force),
            };
        }
        Commands::ListPluginsCmd => return commands::list_plugins_command(),
        Commands::ListGithubRepos { username } => {
            let config = load_config(&cli)?;
            return commands::list_github_repos_command(&config, username).await;
        }
        _ => {}
    }

    let config = load_config(&cli)?;
    let controller = commands::build_controller(config)?;

    match cli.command {
        Commands::AddTenant {
            id,
            backend,
            frontend,
        } => {
            let sources = TenantSources {
                backend: backend.source(),
                frontend: frontend.source(),
            };
            commands::add_tenant_command(&controller, &id, sources).await?;
        }

        Commands::RemoveTenant { id } => {
            commands::remove_tenant_command(&controller, &id).await?;
        }

        Commands::DeployBackend {
            tenant,
            backend_repo_url,
            backend_branch,
        } => {
            let source = AppSource::new(backend_repo_url, backend_branch);
            commands::deploy_app_command(&controller, &tenant.tenant, ServiceKind::Backend, source)
                .await?;
        }

        Commands::DeployFrontend {
            tenant,
            frontend_repo_url,
            frontend_branch,
        } => {
            let source = AppSource::new(frontend_repo_url, frontend_branch);
            commands::deploy_app_command(
                &controller,
                &tenant.tenant,
                ServiceKind::Frontend,
                source,
            )
            .await?;
        }

        Commands::Deploy {
            id,
            backend,
            frontend,
        } => {
            commands::deploy_command(&controller, &id, backend.source(), frontend.source())
                .await?;
        }

        Commands::Start { tenant } => {
            commands::start_command(&controller, &tenant.tenant).await?;
        }

        Commands::Stop { tenant } => {
            commands::stop_command(&controller, &tenant.tenant).await?;
        }

        Commands::Logs {
            tenant,
            app,
            follow,
            tail,
        } => {
            let options = LogOptions { follow, tail };
            commands::logs_command(&controller, &tenant.tenant, app.as_deref(), options).await?;
        }

        Commands::List { long } => {
            commands::list_command(&controller, long)?;
        }

        Commands::Status { tenant } => {
            commands::status_command(&controller, &tenant.tenant).await?;
        }

        Commands::RotateSecrets { tenant, secret } => {
            commands::rotate_secrets_command(&controller, &tenant.tenant, secret).await?;
        }

        Commands::Config { .. } | Commands::ListPluginsCmd | Commands::ListGithubRepos { .. } => {}
    }

    Ok(())
}
