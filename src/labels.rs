//! # Labels
//!
//! Standard labels stamped on every object this tool generates.

use std::collections::BTreeMap;

/// Label carrying the logical service name.
pub const NAME: &str = "app.kubernetes.io/name";
/// Label marking objects managed by this tool.
pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";
/// Value of [`MANAGED_BY`].
pub const MANAGER: &str = "stack-deployer";
/// Label carrying the owning stack name.
pub const STACK: &str = "stack-deployer.io/stack";
/// Label carrying the stack environment.
pub const ENVIRONMENT: &str = "stack-deployer.io/environment";
/// Label carrying the parent environment of a custom stack.
pub const PARENT_ENVIRONMENT: &str = "stack-deployer.io/parent-environment";

/// Standard label set for a deployment unit's objects.
#[must_use]
pub fn standard_labels(service: &str, stack_env: &str, parent_env: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(NAME.to_string(), service.to_string());
    labels.insert(MANAGED_BY.to_string(), MANAGER.to_string());
    labels.insert(STACK.to_string(), service.to_string());
    labels.insert(ENVIRONMENT.to_string(), stack_env.to_string());
    if crate::naming::is_custom_stack(stack_env, parent_env) {
        labels.insert(PARENT_ENVIRONMENT.to_string(), parent_env.to_string());
    }
    labels
}

/// Selector labels for a Deployment and its Service: the stable subset that
/// must never change across upgrades.
#[must_use]
pub fn selector_labels(deployment_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (NAME.to_string(), deployment_name.to_string()),
        (MANAGED_BY.to_string(), MANAGER.to_string()),
    ])
}
