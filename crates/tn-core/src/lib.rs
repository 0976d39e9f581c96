//! tn-core: Core types, registry and stack rendering for Tenantry
//!
//! This crate holds everything that does not talk to the container runtime:
//! tenant records and their on-disk registry, port and secret allocation,
//! configuration, and the deterministic renderer that turns a tenant record
//! into compose, proxy and env files.

pub mod config;
pub mod error;
pub mod fsutil;
pub mod hosts;
pub mod lock;
pub mod ports;
pub mod registry;
pub mod render;
pub mod secrets;
pub mod time;
pub mod types;

pub use error::{ConfigError, TenantError};
pub use registry::{Provisioning, TenantRegistry};
pub use types::{
    AppSource, DeploymentRecord, DeploymentStatus, FailureRecord, SecretKind, ServiceKind,
    Tenant, TenantId, TenantState,
};
