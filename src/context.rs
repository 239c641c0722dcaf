//! # Compute Context
//!
//! Process-scoped accumulator threaded through one provisioning run.
//!
//! Shared-resource compute processors write environment variables, secrets,
//! template extensions and lifecycle hooks into the context; the deployment
//! composer reads it back while assembling pod specs. Environment variables
//! are insertion-ordered and deduplicated by name with first-writer-wins
//! semantics, which keeps generated manifests deterministic and diff-stable.
//!
//! Registration that happens inside a deferred output (for example after a
//! generated password settles) is only visible once [`ComputeContext::
//! wait_outputs`] has resolved every registered output. The composer treats
//! that as a hard synchronization point before rendering any container env
//! list.

use futures::future::{try_join_all, BoxFuture};
use kube::Client;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// One registered environment variable and its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvVarEntry {
    /// Variable name as it appears in the container.
    pub name: String,
    /// Resolved value.
    pub value: String,
    /// Resource type that declared the variable, e.g. `postgres`.
    pub resource_type: String,
    /// Resource instance that declared the variable.
    pub resource_name: String,
    /// Stack the declaring resource belongs to.
    pub owning_stack: String,
}

/// Context handed to pre/post-processor hooks when they run.
#[derive(Clone)]
pub struct HookContext {
    /// Kubernetes client for creating hook-owned resources (init Jobs,
    /// credential Secrets).
    pub client: Client,
    /// Namespace of the deployment unit being provisioned.
    pub namespace: String,
}

impl std::fmt::Debug for HookContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookContext")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

/// A lifecycle hook. Pre-processors run after namespace creation and
/// strictly before the Deployment is created; post-processors run once the
/// whole unit exists. A hook error aborts the composition.
pub type Hook = Box<dyn FnOnce(HookContext) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// A deferred registration. All registered outputs must settle before the
/// env lists are read.
pub type DeferredOutput = BoxFuture<'static, anyhow::Result<()>>;

#[derive(Debug, Default)]
struct EnvState {
    env_vars: Vec<EnvVarEntry>,
    secret_env_vars: Vec<EnvVarEntry>,
    resource_extensions: BTreeMap<String, BTreeMap<String, String>>,
    dependency_extensions: BTreeMap<(String, String), BTreeMap<String, String>>,
}

impl EnvState {
    fn contains(&self, name: &str) -> bool {
        self.env_vars.iter().any(|e| e.name == name)
            || self.secret_env_vars.iter().any(|e| e.name == name)
    }
}

/// Cloneable writer handle for registering env variables from inside
/// deferred outputs, after the owning future has settled.
#[derive(Clone, Debug)]
pub struct EnvWriter {
    state: Arc<Mutex<EnvState>>,
}

impl EnvWriter {
    /// Register a plain env variable unless the name is already taken.
    pub fn add_env_var_if_not_exist(
        &self,
        name: &str,
        value: &str,
        resource_type: &str,
        resource_name: &str,
        owning_stack: &str,
    ) {
        let mut state = self.state.lock().expect("compute context lock poisoned");
        if state.contains(name) {
            debug!(var = name, "env var already registered, keeping first value");
            return;
        }
        state.env_vars.push(EnvVarEntry {
            name: name.to_string(),
            value: value.to_string(),
            resource_type: resource_type.to_string(),
            resource_name: resource_name.to_string(),
            owning_stack: owning_stack.to_string(),
        });
    }

    /// Register a secret env variable unless the name is already taken.
    /// Secret values are delivered through the unit's aggregated Secret,
    /// never inlined into the pod spec.
    pub fn add_secret_env_var_if_not_exist(
        &self,
        name: &str,
        value: &str,
        resource_type: &str,
        resource_name: &str,
        owning_stack: &str,
    ) {
        let mut state = self.state.lock().expect("compute context lock poisoned");
        if state.contains(name) {
            debug!(var = name, "secret env var already registered, keeping first value");
            return;
        }
        state.secret_env_vars.push(EnvVarEntry {
            name: name.to_string(),
            value: value.to_string(),
            resource_type: resource_type.to_string(),
            resource_name: resource_name.to_string(),
            owning_stack: owning_stack.to_string(),
        });
    }

    /// Expose key/value pairs of a resource for descriptor placeholder
    /// substitution outside the container env.
    pub fn add_resource_tpl_extension(&self, resource_name: &str, values: BTreeMap<String, String>) {
        let mut state = self.state.lock().expect("compute context lock poisoned");
        state
            .resource_extensions
            .entry(resource_name.to_string())
            .or_default()
            .extend(values);
    }

    /// Same as [`Self::add_resource_tpl_extension`] but keyed by a
    /// dependency name as well, so several dependencies on one resource do
    /// not collide.
    pub fn add_dependency_tpl_extension(
        &self,
        dependency_name: &str,
        resource_name: &str,
        values: BTreeMap<String, String>,
    ) {
        let mut state = self.state.lock().expect("compute context lock poisoned");
        state
            .dependency_extensions
            .entry((dependency_name.to_string(), resource_name.to_string()))
            .or_default()
            .extend(values);
    }
}

/// The accumulator itself. One instance per top-level provisioning run,
/// created before any resource is provisioned.
pub struct ComputeContext {
    state: Arc<Mutex<EnvState>>,
    outputs: Vec<DeferredOutput>,
    pre_processors: Vec<(String, Hook)>,
    post_processors: Vec<(String, Hook)>,
}

impl std::fmt::Debug for ComputeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeContext")
            .field("outputs", &self.outputs.len())
            .field("pre_processors", &self.pre_processors.len())
            .field("post_processors", &self.post_processors.len())
            .finish_non_exhaustive()
    }
}

impl Default for ComputeContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeContext {
    /// Create an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(EnvState::default())),
            outputs: Vec::new(),
            pre_processors: Vec::new(),
            post_processors: Vec::new(),
        }
    }

    /// Writer handle that can be moved into deferred outputs.
    #[must_use]
    pub fn env_writer(&self) -> EnvWriter {
        EnvWriter {
            state: Arc::clone(&self.state),
        }
    }

    /// Register a plain env variable unless the name is already taken.
    pub fn add_env_var_if_not_exist(
        &mut self,
        name: &str,
        value: &str,
        resource_type: &str,
        resource_name: &str,
        owning_stack: &str,
    ) {
        self.env_writer()
            .add_env_var_if_not_exist(name, value, resource_type, resource_name, owning_stack);
    }

    /// Register a secret env variable unless the name is already taken.
    pub fn add_secret_env_var_if_not_exist(
        &mut self,
        name: &str,
        value: &str,
        resource_type: &str,
        resource_name: &str,
        owning_stack: &str,
    ) {
        self.env_writer().add_secret_env_var_if_not_exist(
            name,
            value,
            resource_type,
            resource_name,
            owning_stack,
        );
    }

    /// See [`EnvWriter::add_resource_tpl_extension`].
    pub fn add_resource_tpl_extension(
        &mut self,
        resource_name: &str,
        values: BTreeMap<String, String>,
    ) {
        self.env_writer().add_resource_tpl_extension(resource_name, values);
    }

    /// See [`EnvWriter::add_dependency_tpl_extension`].
    pub fn add_dependency_tpl_extension(
        &mut self,
        dependency_name: &str,
        resource_name: &str,
        values: BTreeMap<String, String>,
    ) {
        self.env_writer()
            .add_dependency_tpl_extension(dependency_name, resource_name, values);
    }

    /// Register a deferred output. Env registration performed inside it is
    /// only guaranteed visible after [`Self::wait_outputs`] returns.
    pub fn add_output(&mut self, output: DeferredOutput) {
        self.outputs.push(output);
    }

    /// Resolve every registered output. Hard synchronization point: the
    /// composer calls this before reading env lists, so composition never
    /// observes a partially registered context.
    pub async fn wait_outputs(&mut self) -> anyhow::Result<()> {
        let outputs = std::mem::take(&mut self.outputs);
        if outputs.is_empty() {
            return Ok(());
        }
        try_join_all(outputs).await?;
        Ok(())
    }

    /// Register a pre-processor. The marker deduplicates registrations: a
    /// second hook with an already-seen marker is dropped, which keeps
    /// per-resource init Jobs single-shot across repeated bindings.
    pub fn add_pre_processor(&mut self, marker: &str, hook: Hook) {
        if self.pre_processors.iter().any(|(m, _)| m == marker) {
            debug!(marker, "pre-processor already registered, skipping");
            return;
        }
        self.pre_processors.push((marker.to_string(), hook));
    }

    /// Register a post-processor, deduplicated by marker like
    /// [`Self::add_pre_processor`].
    pub fn add_post_processor(&mut self, marker: &str, hook: Hook) {
        if self.post_processors.iter().any(|(m, _)| m == marker) {
            debug!(marker, "post-processor already registered, skipping");
            return;
        }
        self.post_processors.push((marker.to_string(), hook));
    }

    /// Number of registered pre-processors.
    #[must_use]
    pub fn pre_processor_count(&self) -> usize {
        self.pre_processors.len()
    }

    /// Number of registered post-processors.
    #[must_use]
    pub fn post_processor_count(&self) -> usize {
        self.post_processors.len()
    }

    /// Run all pre-processors in registration order. The first error aborts
    /// the composition; there is no partial-success path.
    pub async fn run_pre_processors(&mut self, ctx: &HookContext) -> anyhow::Result<()> {
        for (marker, hook) in std::mem::take(&mut self.pre_processors) {
            debug!(marker = %marker, "running pre-processor");
            hook(ctx.clone()).await?;
        }
        Ok(())
    }

    /// Run all post-processors in registration order.
    pub async fn run_post_processors(&mut self, ctx: &HookContext) -> anyhow::Result<()> {
        for (marker, hook) in std::mem::take(&mut self.post_processors) {
            debug!(marker = %marker, "running post-processor");
            hook(ctx.clone()).await?;
        }
        Ok(())
    }

    /// Plain env variables in insertion order.
    #[must_use]
    pub fn env_vars(&self) -> Vec<EnvVarEntry> {
        self.state
            .lock()
            .expect("compute context lock poisoned")
            .env_vars
            .clone()
    }

    /// Secret env variables in insertion order.
    #[must_use]
    pub fn secret_env_vars(&self) -> Vec<EnvVarEntry> {
        self.state
            .lock()
            .expect("compute context lock poisoned")
            .secret_env_vars
            .clone()
    }

    /// Template extensions registered for a resource.
    #[must_use]
    pub fn resource_tpl_extension(&self, resource_name: &str) -> Option<BTreeMap<String, String>> {
        self.state
            .lock()
            .expect("compute context lock poisoned")
            .resource_extensions
            .get(resource_name)
            .cloned()
    }

    /// Template extensions registered for a dependency on a resource.
    #[must_use]
    pub fn dependency_tpl_extension(
        &self,
        dependency_name: &str,
        resource_name: &str,
    ) -> Option<BTreeMap<String, String>> {
        self.state
            .lock()
            .expect("compute context lock poisoned")
            .dependency_extensions
            .get(&(dependency_name.to_string(), resource_name.to_string()))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_writer_wins() {
        let mut ctx = ComputeContext::new();
        ctx.add_env_var_if_not_exist("PGHOST", "db-1", "postgres", "main-db", "parent");
        ctx.add_env_var_if_not_exist("PGHOST", "db-2", "postgres", "other-db", "parent");
        let vars = ctx.env_vars();
        assert_eq!(vars.len(), 1);
        assert_eq!(vars[0].value, "db-1");
    }

    #[test]
    fn test_insertion_order_is_preserved() {
        let mut ctx = ComputeContext::new();
        for name in ["B_VAR", "A_VAR", "C_VAR"] {
            ctx.add_env_var_if_not_exist(name, "v", "postgres", "db", "stack");
        }
        let names: Vec<_> = ctx.env_vars().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["B_VAR", "A_VAR", "C_VAR"]);
    }

    #[test]
    fn test_name_is_unique_across_plain_and_secret_sets() {
        let mut ctx = ComputeContext::new();
        ctx.add_env_var_if_not_exist("TOKEN", "plain", "redis", "cache", "stack");
        ctx.add_secret_env_var_if_not_exist("TOKEN", "secret", "redis", "cache", "stack");
        assert_eq!(ctx.env_vars().len(), 1);
        assert!(ctx.secret_env_vars().is_empty());
    }

    #[tokio::test]
    async fn test_deferred_registration_visible_after_wait() {
        let mut ctx = ComputeContext::new();
        let writer = ctx.env_writer();
        ctx.add_output(Box::pin(async move {
            writer.add_secret_env_var_if_not_exist(
                "PGPASSWORD",
                "generated",
                "postgres",
                "main-db",
                "stack",
            );
            Ok(())
        }));
        assert!(ctx.secret_env_vars().is_empty());
        ctx.wait_outputs().await.unwrap();
        assert_eq!(ctx.secret_env_vars().len(), 1);
    }

    #[test]
    fn test_pre_processor_marker_dedup() {
        let mut ctx = ComputeContext::new();
        ctx.add_pre_processor("pg:main-db", Box::new(|_| Box::pin(async { Ok(()) })));
        ctx.add_pre_processor("pg:main-db", Box::new(|_| Box::pin(async { Ok(()) })));
        assert_eq!(ctx.pre_processor_count(), 1);
    }

    #[test]
    fn test_tpl_extensions_keyed_by_resource() {
        let mut ctx = ComputeContext::new();
        let mut a = BTreeMap::new();
        a.insert("host".to_string(), "db-a".to_string());
        let mut b = BTreeMap::new();
        b.insert("host".to_string(), "db-b".to_string());
        ctx.add_resource_tpl_extension("db-a", a);
        ctx.add_resource_tpl_extension("db-b", b);
        assert_eq!(
            ctx.resource_tpl_extension("db-a").unwrap().get("host"),
            Some(&"db-a".to_string())
        );
        assert_eq!(
            ctx.resource_tpl_extension("db-b").unwrap().get("host"),
            Some(&"db-b".to_string())
        );
    }
}
