//! # Naming Tests
//!
//! Properties of the naming engine and the identifier sanitizer: pure
//! determinism, custom-stack suffixing, namespace isolation between
//! sibling environment variants, sanitization idempotence.

use stack_deployer::naming::{
    derive_base_name, derive_resource_name, is_custom_stack, sanitize_identifier, suffix,
};

#[test]
fn test_derivation_is_pure() {
    for _ in 0..3 {
        assert_eq!(
            derive_resource_name("api", "staging-pr-1", "staging", "config"),
            "api-staging-pr-1-config"
        );
    }
}

#[test]
fn test_self_reference_equals_standard_stack() {
    for kind in ["", "config", "secrets", "hpa", "vpa"] {
        assert_eq!(
            derive_resource_name("svc", "prod", "prod", kind),
            derive_resource_name("svc", "prod", "", kind)
        );
    }
}

#[test]
fn test_custom_stack_suffixing() {
    assert_eq!(
        derive_resource_name("myapp", "staging-preview", "staging", "config"),
        "myapp-staging-preview-config"
    );
    assert_eq!(
        derive_resource_name("myapp", "staging", "", "config"),
        "myapp-config"
    );
}

#[test]
fn test_all_resource_kinds_share_one_base() {
    let kinds = [
        suffix::CONFIG,
        suffix::SECRETS,
        suffix::HPA,
        suffix::VPA,
        suffix::CFG_VOLUMES,
        suffix::SECRET_VOLUMES,
        suffix::DOCKER_CONFIG,
    ];
    for kind in kinds {
        let name = derive_resource_name("api", "staging-pr-9", "staging", kind);
        assert!(name.starts_with("api-staging-pr-9-"), "{name}");
    }
}

#[test]
fn test_namespace_isolation_between_sibling_previews() {
    // Two PR previews of the same parent must never collide, while the
    // parent keeps unsuffixed names.
    let first = derive_base_name("api", "staging-pr-123", "staging");
    let second = derive_base_name("api", "staging-pr-456", "staging");
    let parent = derive_base_name("api", "staging", "staging");

    assert_eq!(first, "api-staging-pr-123");
    assert_eq!(second, "api-staging-pr-456");
    assert_eq!(parent, "api");
    assert_ne!(first, second);

    assert!(is_custom_stack("staging-pr-123", "staging"));
    assert!(!is_custom_stack("staging", "staging"));
}

#[test]
fn test_sanitize_is_idempotent() {
    let inputs = [
        "My_Service",
        "UPPER_CASE_NAME",
        "-leading-and-trailing-",
        "dots.are.fine.",
        "we!rd ch@rs",
        "already-clean",
        "",
    ];
    for raw in inputs {
        let once = sanitize_identifier(raw);
        assert_eq!(sanitize_identifier(&once), once, "input {raw:?}");
        assert!(!once.contains('_'));
        assert!(!once.chars().any(|c| c.is_ascii_uppercase()));
        assert!(!once.starts_with('-') && !once.ends_with('-'));
        assert!(!once.starts_with('.') && !once.ends_with('.'));
    }
}

#[test]
fn test_sanitize_rfc1123_output() {
    assert_eq!(sanitize_identifier("My_App"), "my-app");
    assert_eq!(sanitize_identifier("Staging PR #42"), "stagingpr42");
}
