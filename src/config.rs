//! # Provisioning Configuration
//!
//! Provisioning parameters and the exported-outputs channel.
//!
//! Exported outputs are the sole cross-stack communication mechanism: a
//! parent stack's run publishes connection coordinates for its shared
//! resources (and the proxy routing state), and dependent stacks read them
//! back by deterministic key on their own runs.

use crate::errors::ProvisionError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Well-known export field names shared between the exporting parent run
/// and consuming child runs.
pub mod export_field {
    pub const ROOT_USER: &str = "root-user";
    pub const ROOT_PASSWORD: &str = "root-password";
    pub const HOST: &str = "host";
    pub const PORT: &str = "port";
    pub const URI: &str = "uri";
    pub const DATABASE: &str = "database";
    /// Aggregated Caddy routing configuration of the cluster slice.
    pub const CADDY_CONFIG: &str = "caddy-config";
    /// Ingress IP of the cluster slice's proxy Service.
    pub const CLUSTER_IP: &str = "cluster-ip";
}

/// Derive the deterministic export key for a field of a shared-resource
/// instance, with an optional dependency suffix so per-dependency values do
/// not collide with the instance's own.
#[must_use]
pub fn export_key(resource: &str, dependency: Option<&str>, field: &str) -> String {
    match dependency {
        Some(dep) => format!("{resource}--{dep}-{field}"),
        None => format!("{resource}-{field}"),
    }
}

/// Key-value export map published by one stack's provisioning run.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(transparent)]
pub struct StackOutputs {
    values: BTreeMap<String, String>,
}

impl StackOutputs {
    /// Empty outputs map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an exported value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Set an exported value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Iterate over all exported key/value pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Load an outputs document. YAML and JSON are both accepted; JSON is a
    /// YAML subset so one parser covers both.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let outputs = serde_yaml::from_str(&raw)?;
        Ok(outputs)
    }

    /// Persist the outputs document as JSON.
    pub fn to_file(&self, path: &Path) -> anyhow::Result<()> {
        let rendered = serde_json::to_string_pretty(&self.values)?;
        std::fs::write(path, rendered)?;
        Ok(())
    }
}

/// Reference to the parent stack and its exported outputs.
#[derive(Debug, Clone)]
pub struct ParentStackRef {
    /// Parent stack name.
    pub name: String,
    /// The parent's exported outputs.
    pub outputs: StackOutputs,
}

impl ParentStackRef {
    /// Read a required export. Missing or empty values are upstream-state
    /// errors: the dependency has not published what this run needs, and
    /// there is no degraded mode.
    pub fn require_output(&self, key: &str) -> Result<String, ProvisionError> {
        match self.outputs.get(key) {
            Some(value) if !value.is_empty() => Ok(value.to_string()),
            Some(_) => Err(ProvisionError::upstream(format!(
                "export '{key}' of parent stack '{}' is empty",
                self.name
            ))),
            None => Err(ProvisionError::upstream(format!(
                "export '{key}' not found in parent stack '{}'",
                self.name
            ))),
        }
    }
}

/// Parameters of one provisioning run, resolved by the CLI layer.
#[derive(Debug, Clone)]
pub struct ProvisionParams {
    /// Name of the stack being provisioned (the consumer, for
    /// shared-resource bindings).
    pub stack_name: String,
    /// Target environment; becomes the Kubernetes namespace.
    pub environment: String,
    /// Parent environment for custom stacks.
    pub parent_environment: Option<String>,
    /// The parent stack and its exports, when this stack has one.
    pub parent_stack: Option<ParentStackRef>,
    /// Which declared shared resources this stack actually consumes.
    pub use_resources: BTreeMap<String, bool>,
}

impl ProvisionParams {
    /// The parent-environment string the naming engine expects: empty for
    /// standard stacks.
    #[must_use]
    pub fn parent_env_or_empty(&self) -> &str {
        self.parent_environment.as_deref().unwrap_or("")
    }

    /// The parent stack, or an upstream-state error when a shared-resource
    /// binding demands one.
    pub fn require_parent_stack(&self) -> Result<&ParentStackRef, ProvisionError> {
        self.parent_stack.as_ref().ok_or_else(|| {
            ProvisionError::upstream(format!(
                "stack '{}' has no parent stack; shared-resource bindings require one",
                self.stack_name
            ))
        })
    }
}
