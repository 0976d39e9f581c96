//! Bounded waiting for service readiness
//!
//! Health polling is the only step the controller ever retries. Each wait is
//! bounded both by wall time and by the number of checks.

use std::time::Duration;
use tokio::time::Instant;

use tn_core::config::{BackoffConfig, HealthConfig};
use tn_core::{ServiceKind, TenantError};

use crate::backoff::ExponentialBackoff;
use crate::runtime::{Runtime, ServiceStatus, StackHandle};

/// What a waiter considers ready
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Passing its health check
    Healthy,
    /// Container process up
    Running,
}

impl Readiness {
    fn satisfied_by(&self, status: &ServiceStatus) -> bool {
        match self {
            Readiness::Healthy => *status == ServiceStatus::Healthy,
            Readiness::Running => status.is_running(),
        }
    }
}

/// Polls a service until it is ready or the bound is reached
#[derive(Debug, Clone)]
pub struct HealthWaiter {
    timeout: Duration,
    max_attempts: u32,
    backoff: BackoffConfig,
}

impl HealthWaiter {
    pub fn new(config: &HealthConfig) -> Self {
        Self {
            timeout: config.timeout,
            max_attempts: config.max_attempts.max(1),
            backoff: config.backoff.clone(),
        }
    }

    /// Wait until `service` reaches `readiness`
    pub async fn wait_for(
        &self,
        runtime: &dyn Runtime,
        stack: &StackHandle,
        service: ServiceKind,
        readiness: Readiness,
    ) -> Result<(), TenantError> {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut backoff = ExponentialBackoff::from_config(&self.backoff);
        let mut attempts = 0;

        loop {
            attempts += 1;
            match runtime.status(stack, service).await {
                Ok(status) if readiness.satisfied_by(&status) => {
                    tracing::debug!(
                        "{} of {} is {} after {} check(s)",
                        service,
                        stack.tenant,
                        status,
                        attempts
                    );
                    return Ok(());
                }
                Ok(status) => {
                    tracing::debug!("{} of {} is {}, waiting", service, stack.tenant, status)
                }
                Err(e) => tracing::warn!("Probing {} of {} failed: {}", service, stack.tenant, e),
            }

            let delay = backoff.next_delay();
            if attempts >= self.max_attempts || Instant::now() + delay > deadline {
                return Err(TenantError::DependencyHealthTimeout {
                    tenant: stack.tenant.clone(),
                    service,
                    attempts,
                    waited_secs: started.elapsed().as_secs(),
                });
            }
            tokio::time::sleep(delay).await;
        }
    }
}
