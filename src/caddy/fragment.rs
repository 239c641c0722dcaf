//! # Routing Fragments
//!
//! Caddyfile snippets attached as Service annotations. The proxy's init
//! container aggregates them cluster-wide at pod start; a fragment lives
//! exactly as long as its Service and is never persisted separately.

use crate::container::spec::DeploymentUnitSpec;

/// How a deployment unit wants its traffic routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteKind {
    /// Dedicated virtual host.
    Domain(String),
    /// Path prefix under the catch-all host.
    Prefix {
        /// Path prefix, e.g. `/api`.
        prefix: String,
        /// Keep the prefix on the upstream request instead of stripping it.
        keep_prefix: bool,
    },
}

/// The routing choice of a unit, or `None` when it requested none.
#[must_use]
pub fn route_kind(spec: &DeploymentUnitSpec) -> Option<RouteKind> {
    if let Some(domain) = &spec.domain {
        return Some(RouteKind::Domain(domain.clone()));
    }
    spec.path_prefix.as_ref().map(|prefix| RouteKind::Prefix {
        prefix: prefix.clone(),
        keep_prefix: spec.proxy_keep_prefix,
    })
}

/// Render the Caddyfile entry for one upstream.
///
/// Domain routing produces a complete site block. Prefix routing produces
/// a handler that the synthesizer nests inside the catch-all site;
/// `handle_path` strips the matched prefix, `handle` keeps it.
#[must_use]
pub fn generate_caddyfile_entry(upstream: &str, port: i32, route: &RouteKind) -> String {
    match route {
        RouteKind::Domain(domain) => format!(
            "{domain} {{\n    reverse_proxy {upstream}:{port}\n}}\n"
        ),
        RouteKind::Prefix {
            prefix,
            keep_prefix,
        } => {
            let directive = if *keep_prefix { "handle" } else { "handle_path" };
            let matcher = format!("{}/*", prefix.trim_end_matches('/'));
            format!("{directive} {matcher} {{\n    reverse_proxy {upstream}:{port}\n}}\n")
        }
    }
}

/// Fragment for a unit, when routing was requested and a main port is
/// resolvable on the ingress container.
#[must_use]
pub fn fragment_for_unit(spec: &DeploymentUnitSpec) -> Option<String> {
    let route = route_kind(spec)?;
    let port = spec.ingress_container()?.resolve_main_port()?;
    Some(generate_caddyfile_entry(&spec.service_dns(), port, &route))
}
