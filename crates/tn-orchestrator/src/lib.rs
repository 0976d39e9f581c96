//! tn-orchestrator: Tenant lifecycle controller for Tenantry
//!
//! The controller sequences every lifecycle operation against two seams:
//! a [`Runtime`] that drives the container engine and a [`SourceFetcher`]
//! that checks application code out. Production uses the docker compose
//! CLI and git; tests substitute in-memory fakes.

pub mod backoff;
pub mod controller;
pub mod github;
pub mod health;
pub mod logs;
pub mod plugins;
pub mod runtime;
pub mod source;

pub use controller::{LifecycleController, TenantStatus};
pub use github::{validate_username, GithubClient, GithubError, RepoSummary};
pub use logs::TenantLogStream;
pub use plugins::{AppPlugin, PluginRegistry};
pub use runtime::{
    ComposeRuntime, LogOptions, Runtime, RuntimeError, RuntimeOp, ServiceStatus, StackHandle,
};
pub use source::{FetchError, GitFetcher, SourceFetcher};
