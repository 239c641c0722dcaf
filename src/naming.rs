//! # Resource Naming
//!
//! Environment-scoped resource name derivation and Kubernetes identifier
//! sanitization.
//!
//! Every object belonging to one logical deployment unit shares the same
//! base name, so a custom stack (a PR preview or hotfix environment branched
//! off a parent environment) can coexist with its parent and with sibling
//! custom stacks without any name collision. The Kubernetes namespace is
//! always the stack environment itself, never parent-derived.

/// Returns true when the stack is a custom stack: a non-empty parent
/// environment that differs from the stack's own environment.
///
/// A stack whose parent environment equals its own environment is a standard
/// stack. The top-level parent deployment sets `parent_env == stack_env`
/// trivially, so the self-reference case must not be treated as custom.
#[must_use]
pub fn is_custom_stack(stack_env: &str, parent_env: &str) -> bool {
    !parent_env.is_empty() && parent_env != stack_env
}

/// Derive the base resource name for a service in a given environment.
///
/// Standard stacks keep the raw service name; custom stacks append their own
/// environment so that `api` in `staging-pr-123` becomes `api-staging-pr-123`
/// while the parent's `api` in `staging` stays unsuffixed.
#[must_use]
pub fn derive_base_name(service: &str, stack_env: &str, parent_env: &str) -> String {
    if is_custom_stack(stack_env, parent_env) {
        format!("{service}-{stack_env}")
    } else {
        service.to_string()
    }
}

/// Derive a full resource name: the base name plus a resource-kind suffix.
///
/// An empty suffix yields the base name itself (used for the Deployment).
#[must_use]
pub fn derive_resource_name(
    service: &str,
    stack_env: &str,
    parent_env: &str,
    kind_suffix: &str,
) -> String {
    let base = derive_base_name(service, stack_env, parent_env);
    if kind_suffix.is_empty() {
        base
    } else {
        format!("{base}-{kind_suffix}")
    }
}

/// Normalize an arbitrary user-supplied name into a valid Kubernetes
/// identifier (RFC 1123 shape).
///
/// Lowercases, maps `_` to `-`, strips everything outside `[a-z0-9-.]`, and
/// trims leading/trailing `-`/`.`. Idempotent: sanitizing a sanitized string
/// returns it unchanged.
#[must_use]
pub fn sanitize_identifier(name: &str) -> String {
    let cleaned: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c == '_' { '-' } else { c })
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-' || *c == '.')
        .collect();
    cleaned.trim_matches(|c| c == '-' || c == '.').to_string()
}

/// Resource-kind suffixes used across the deployment unit.
///
/// Centralized so every component derives names through the same function
/// with the same vocabulary.
pub mod suffix {
    /// ConfigMap holding plain configuration text volumes.
    pub const CONFIG: &str = "config";
    /// Secret aggregating all secret environment variables.
    pub const SECRETS: &str = "secrets";
    /// HorizontalPodAutoscaler.
    pub const HPA: &str = "hpa";
    /// VerticalPodAutoscaler.
    pub const VPA: &str = "vpa";
    /// ConfigMap-backed volume bundle.
    pub const CFG_VOLUMES: &str = "cfg-volumes";
    /// Secret-backed volume bundle.
    pub const SECRET_VOLUMES: &str = "secret-volumes";
    /// Image-pull dockerconfigjson Secret.
    pub const DOCKER_CONFIG: &str = "docker-config";
    /// PodDisruptionBudget.
    pub const PDB: &str = "pdb";
    /// Ingress.
    pub const INGRESS: &str = "ingress";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_stack_keeps_service_name() {
        assert_eq!(derive_base_name("api", "staging", ""), "api");
        assert_eq!(derive_base_name("api", "staging", "staging"), "api");
    }

    #[test]
    fn test_custom_stack_appends_environment() {
        assert_eq!(
            derive_base_name("api", "staging-pr-123", "staging"),
            "api-staging-pr-123"
        );
    }

    #[test]
    fn test_self_reference_equals_standard() {
        // parent == stack is a standard stack, identical to an empty parent
        for suffix in ["", "config", "hpa"] {
            assert_eq!(
                derive_resource_name("svc", "prod", "prod", suffix),
                derive_resource_name("svc", "prod", "", suffix)
            );
        }
    }

    #[test]
    fn test_resource_name_suffixing() {
        assert_eq!(
            derive_resource_name("myapp", "staging-preview", "staging", "config"),
            "myapp-staging-preview-config"
        );
        assert_eq!(
            derive_resource_name("myapp", "staging", "", "config"),
            "myapp-config"
        );
        assert_eq!(derive_resource_name("myapp", "staging", "", ""), "myapp");
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let a = derive_resource_name("api", "staging-pr-9", "staging", "secrets");
        let b = derive_resource_name("api", "staging-pr-9", "staging", "secrets");
        assert_eq!(a, b);
    }

    #[test]
    fn test_sibling_custom_stacks_do_not_collide() {
        let first = derive_base_name("api", "staging-pr-123", "staging");
        let second = derive_base_name("api", "staging-pr-456", "staging");
        let parent = derive_base_name("api", "staging", "");
        assert_ne!(first, second);
        assert_ne!(first, parent);
        assert_eq!(parent, "api");
    }

    #[test]
    fn test_is_custom_stack() {
        assert!(is_custom_stack("staging-pr-1", "staging"));
        assert!(!is_custom_stack("staging", "staging"));
        assert!(!is_custom_stack("staging", ""));
    }

    #[test]
    fn test_sanitize_lowercases_and_maps_underscores() {
        assert_eq!(sanitize_identifier("My_App"), "my-app");
        assert_eq!(sanitize_identifier("API_V2"), "api-v2");
    }

    #[test]
    fn test_sanitize_strips_invalid_characters() {
        assert_eq!(sanitize_identifier("app!@#name"), "appname");
        assert_eq!(sanitize_identifier("a b c"), "abc");
    }

    #[test]
    fn test_sanitize_trims_edges() {
        assert_eq!(sanitize_identifier("-app-"), "app");
        assert_eq!(sanitize_identifier(".app."), "app");
        assert_eq!(sanitize_identifier("--a.b--"), "a.b");
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        for raw in ["My_App", "-x-", "weird!!name", "ok-name", "A.B_C"] {
            let once = sanitize_identifier(raw);
            assert_eq!(sanitize_identifier(&once), once);
        }
    }
}
