//! Reverse-proxy routing definition (`nginx.conf`)

use std::fmt::Write;

use super::compose::PROXY_CONTAINER_PORT;
use super::RenderSettings;
use crate::types::{ServiceKind, Tenant};

pub const PROXY_CONNECT_TIMEOUT: &str = "75s";
pub const PROXY_READ_TIMEOUT: &str = "300s";

const FORWARDED_HEADERS: [(&str, &str); 4] = [
    ("Host", "$host"),
    ("X-Real-IP", "$remote_addr"),
    ("X-Forwarded-For", "$proxy_add_x_forwarded_for"),
    ("X-Forwarded-Proto", "$scheme"),
];

/// Render the proxy configuration of a tenant
///
/// `api_prefix` goes to the backend, everything else to the frontend.
pub fn routing_config(tenant: &Tenant, settings: &RenderSettings) -> String {
    let backend = format!(
        "http://{}:{}",
        tenant.container_name(ServiceKind::Backend),
        settings.app.backend_port
    );
    let frontend = format!(
        "http://{}:{}/",
        tenant.container_name(ServiceKind::Frontend),
        settings.app.frontend_port
    );

    let mut out = String::new();
    let _ = writeln!(out, "# tenant {}: generated, local edits are overwritten", tenant.id);
    let _ = writeln!(out, "server {{");
    let _ = writeln!(out, "    listen {};", PROXY_CONTAINER_PORT);
    let _ = writeln!(out, "    server_name {} localhost;", tenant.network_alias);
    let _ = writeln!(out);
    location(&mut out, &settings.app.api_prefix, &backend);
    let _ = writeln!(out);
    location(&mut out, "/", &frontend);
    let _ = writeln!(out, "}}");
    out
}

fn location(out: &mut String, path: &str, upstream: &str) {
    let _ = writeln!(out, "    location {} {{", path);
    let _ = writeln!(out, "        proxy_pass {};", upstream);
    for (header, value) in FORWARDED_HEADERS {
        let _ = writeln!(out, "        proxy_set_header {} {};", header, value);
    }
    let _ = writeln!(out, "        proxy_connect_timeout {};", PROXY_CONNECT_TIMEOUT);
    let _ = writeln!(out, "        proxy_read_timeout {};", PROXY_READ_TIMEOUT);
    let _ = writeln!(out, "    }}");
}
