//! Log reading for tenant services

use futures::stream::BoxStream;
use futures::StreamExt;

use tn_core::{ServiceKind, Tenant, TenantError};

use crate::runtime::{LogOptions, Runtime, StackHandle};

/// Lazy stream of output lines from one or more services
pub type TenantLogStream = BoxStream<'static, Result<String, TenantError>>;

/// Services whose output a `logs` request covers
///
/// Without an explicit service the application services and the proxy are
/// read, falling back to the infrastructure when no application is deployed.
pub fn select_services(
    tenant: &Tenant,
    service: Option<ServiceKind>,
) -> Result<Vec<ServiceKind>, TenantError> {
    match service {
        Some(service) if tenant.has_service(service) => Ok(vec![service]),
        Some(service) => Err(TenantError::ServiceNotFound {
            tenant: tenant.id.clone(),
            service: service.to_string(),
        }),
        None => {
            let all = tenant.services();
            let apps: Vec<ServiceKind> = all
                .iter()
                .copied()
                .filter(|s| s.is_application() || *s == ServiceKind::Proxy)
                .collect();
            Ok(if apps.is_empty() { all } else { apps })
        }
    }
}

/// Open one merged stream over `services`
///
/// Lines are prefixed with the service name when more than one service is
/// read. With `follow` the stream never ends on its own.
pub async fn open(
    runtime: &dyn Runtime,
    stack: &StackHandle,
    services: &[ServiceKind],
    options: LogOptions,
) -> Result<TenantLogStream, TenantError> {
    let prefixed = services.len() > 1;
    let mut streams = Vec::with_capacity(services.len());

    for &service in services {
        let tenant = stack.tenant.clone();
        let lines = runtime
            .logs(stack, service, options)
            .await
            .map_err(|e| TenantError::RuntimeInvocationFailure {
                tenant: tenant.clone(),
                step: format!("read logs of {}", service),
                reason: e.to_string(),
            })?;

        let lines = lines.map(move |line| match line {
            Ok(line) if prefixed => Ok(format!("[{}] {}", service, line)),
            Ok(line) => Ok(line),
            Err(e) => Err(TenantError::RuntimeInvocationFailure {
                tenant: tenant.clone(),
                step: format!("read logs of {}", service),
                reason: e.to_string(),
            }),
        });
        streams.push(lines.boxed());
    }

    Ok(futures::stream::select_all(streams).boxed())
}
