//! # Orchestration
//!
//! The top-level provisioning pass: resolve images, bind shared resources
//! through the compute processors, compose and deploy the unit, register
//! DNS, trigger the proxy reload, export this stack's outputs.

pub mod dns;
pub mod images;

use crate::caddy::fragment::fragment_for_unit;
use crate::caddy::{patch::patch_deployment, routing_state_hash};
use crate::compute::{ComputeInput, ProcessorRegistry};
use crate::config::{export_field, export_key, ProvisionParams, StackOutputs};
use crate::container::spec::{resolve_unit_spec, DeploymentUnitSpec};
use crate::container::{compose, deploy, DeploymentUnit};
use crate::context::ComputeContext;
use crate::descriptor::{DependencySpec, StackDescriptor};
use crate::errors::{ProvisionError, Result};
use crate::kube::Applier;
use anyhow::Context as _;
use dns::{DnsRecord, DnsRegistrar};
use images::ImageResolver;
use kube::Client;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// The proxy Deployment a run should reload after changing routing state.
#[derive(Debug, Clone)]
pub struct ProxyTarget {
    /// Proxy namespace.
    pub namespace: String,
    /// Proxy Deployment name.
    pub name: String,
}

/// What one run leaves behind for dependent stacks.
#[derive(Debug)]
pub struct RunResult {
    /// The composed unit, for callers that inspect what was applied.
    pub unit: DeploymentUnit,
    /// Exported outputs of this stack.
    pub outputs: StackOutputs,
}

/// One fan-in of a shared-resource instance for this consumer.
#[derive(Debug)]
struct ResourceBinding<'a> {
    resource_name: &'a str,
    resource_type: &'a str,
    declared_use: bool,
    dependencies: Vec<&'a DependencySpec>,
}

/// Collect the bindings a descriptor declares: one entry per shared
/// resource reached through `uses` or `dependsOn`. `dependsOn`-only
/// resources are Postgres by definition, that being the only resource type
/// with a dependency mode.
fn collect_bindings<'a>(
    descriptor: &'a StackDescriptor,
    params: &ProvisionParams,
) -> Vec<ResourceBinding<'a>> {
    let mut bindings: Vec<ResourceBinding<'a>> = descriptor
        .uses
        .iter()
        .map(|used| ResourceBinding {
            resource_name: used.name.as_str(),
            resource_type: used.resource_type.as_str(),
            declared_use: params
                .use_resources
                .get(&used.name)
                .copied()
                .unwrap_or(true),
            dependencies: Vec::new(),
        })
        .collect();

    for dep in &descriptor.depends_on {
        if let Some(binding) = bindings
            .iter_mut()
            .find(|b| b.resource_name == dep.resource)
        {
            binding.dependencies.push(dep);
        } else {
            bindings.push(ResourceBinding {
                resource_name: dep.resource.as_str(),
                resource_type: "postgres",
                declared_use: false,
                dependencies: vec![dep],
            });
        }
    }

    bindings
}

/// Run every applicable compute processor for this descriptor, populating
/// the context. An undeclared resource type is a configuration error.
pub async fn bind_shared_resources(
    registry: &ProcessorRegistry,
    descriptor: &StackDescriptor,
    params: &ProvisionParams,
    ctx: &mut ComputeContext,
) -> Result<()> {
    for binding in collect_bindings(descriptor, params) {
        let processor = registry.get(binding.resource_type).ok_or_else(|| {
            ProvisionError::config(format!(
                "unsupported resource type '{}' for resource '{}'",
                binding.resource_type, binding.resource_name
            ))
        })?;
        let dependencies: Vec<DependencySpec> =
            binding.dependencies.iter().map(|d| (*d).clone()).collect();
        let input = ComputeInput {
            resource_name: binding.resource_name,
            declared_use: binding.declared_use,
            dependencies: &dependencies,
            params,
        };
        info!(
            resource = binding.resource_name,
            resource_type = binding.resource_type,
            "binding shared resource"
        );
        processor.process(&input, ctx).await?;
    }
    Ok(())
}

/// Orchestrates provisioning runs. Built once at startup with its
/// dependency set passed in explicitly.
pub struct Orchestrator {
    registry: ProcessorRegistry,
    image_resolver: Arc<dyn ImageResolver>,
    registrar: Arc<dyn DnsRegistrar>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Orchestrator with the given processor registry, pass-through image
    /// resolution and a logging registrar.
    #[must_use]
    pub fn new(registry: ProcessorRegistry) -> Self {
        Self {
            registry,
            image_resolver: Arc::new(images::PassthroughResolver),
            registrar: Arc::new(dns::LoggingRegistrar),
        }
    }

    /// Replace the image resolver.
    #[must_use]
    pub fn with_image_resolver(mut self, resolver: Arc<dyn ImageResolver>) -> Self {
        self.image_resolver = resolver;
        self
    }

    /// Replace the DNS registrar.
    #[must_use]
    pub fn with_registrar(mut self, registrar: Arc<dyn DnsRegistrar>) -> Self {
        self.registrar = registrar;
        self
    }

    async fn resolve_images(&self, descriptor: &mut StackDescriptor) -> anyhow::Result<()> {
        for container in descriptor
            .containers
            .iter_mut()
            .chain(descriptor.init_containers.iter_mut())
            .chain(descriptor.sidecar_containers.iter_mut())
        {
            container.image = self
                .image_resolver
                .resolve(&container.name, &container.image)
                .await
                .with_context(|| format!("resolving image for container {}", container.name))?;
        }
        Ok(())
    }

    fn export_outputs(spec: &DeploymentUnitSpec) -> StackOutputs {
        let mut outputs = StackOutputs::new();
        let service = &spec.service_name;
        outputs.set(format!("{service}-namespace"), spec.namespace.as_str());
        outputs.set(format!("{service}-deployment"), spec.deployment_name.as_str());
        if let Some(port) = spec.ingress_container().and_then(|c| c.resolve_main_port()) {
            outputs.set(format!("{service}-port"), port.to_string());
            outputs.set(
                format!("{service}-url"),
                format!("http://{}:{port}", spec.service_dns()),
            );
        }
        outputs.set(
            format!("{service}-provisioned-at"),
            chrono::Utc::now().to_rfc3339(),
        );
        outputs
    }

    /// The full provisioning pass for one stack.
    pub async fn kube_run(
        &self,
        client: Client,
        descriptor: &StackDescriptor,
        params: &ProvisionParams,
        proxy: Option<&ProxyTarget>,
    ) -> anyhow::Result<RunResult> {
        let stack = &params.stack_name;
        let env = &params.environment;
        info!(stack = %stack, environment = %env, "starting provisioning run");

        let mut descriptor = descriptor.clone();
        self.resolve_images(&mut descriptor).await?;

        let mut ctx = ComputeContext::new();
        bind_shared_resources(&self.registry, &descriptor, params, &mut ctx)
            .await
            .with_context(|| format!("stack {stack}, env {env}, binding shared resources"))?;

        let spec = resolve_unit_spec(&descriptor, params, &mut ctx)
            .await
            .with_context(|| format!("stack {stack}, env {env}, resolving unit spec"))?;
        let unit = compose(&spec)
            .with_context(|| format!("stack {stack}, env {env}, composing deployment unit"))?;

        let applier = Applier::new(client.clone());
        deploy(&applier, &spec, &mut ctx, &unit).await?;

        if let Some(domain) = &spec.domain {
            self.register_dns(params, domain).await?;
        }

        // Reload the proxy when this unit contributed a routing fragment.
        // A failed reload is surfaced but the applied unit stands; the
        // proxy keeps serving its previous routing table.
        let mut patch_failure: Option<ProvisionError> = None;
        if let (Some(proxy), Some(fragment)) = (proxy, fragment_for_unit(&spec)) {
            let previous_config = params
                .parent_stack
                .as_ref()
                .and_then(|p| p.outputs.get(&export_key(&proxy.name, None, export_field::CADDY_CONFIG)))
                .unwrap_or_default()
                .to_string();
            let hash = routing_state_hash(&[previous_config.as_str(), fragment.as_str()]);
            match patch_deployment(client, &proxy.namespace, &proxy.name, &hash).await {
                Ok(()) => {}
                Err(err) => {
                    warn!(error = %err, "proxy reload failed, previous routing table stays active");
                    patch_failure = Some(err);
                }
            }
        }

        let outputs = Self::export_outputs(&spec);
        let result = RunResult { unit, outputs };

        if let Some(err) = patch_failure {
            return Err(anyhow::Error::new(err)
                .context(format!("stack {stack}, env {env}, reloading proxy")));
        }
        info!(stack = %stack, environment = %env, "provisioning run complete");
        Ok(result)
    }

    async fn register_dns(&self, params: &ProvisionParams, domain: &str) -> anyhow::Result<()> {
        let Some(parent) = params.parent_stack.as_ref() else {
            warn!(domain, "no parent stack exports; skipping DNS record");
            return Ok(());
        };
        // The cluster slice's ingress IP is exported by the parent run.
        let Some(ip) = parent.outputs.iter().find_map(|(k, v)| {
            k.ends_with(export_field::CLUSTER_IP).then(|| v.to_string())
        }) else {
            warn!(domain, "no cluster ingress IP exported; skipping DNS record");
            return Ok(());
        };
        self.registrar
            .new_record(&DnsRecord {
                name: domain.to_string(),
                record_type: "A".to_string(),
                value: ip,
                proxied: false,
            })
            .await
            .with_context(|| format!("registering DNS record for {domain}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(yaml: &str) -> StackDescriptor {
        StackDescriptor::from_yaml(yaml).unwrap()
    }

    fn params() -> ProvisionParams {
        ProvisionParams {
            stack_name: "api".to_string(),
            environment: "staging".to_string(),
            parent_environment: Some("staging".to_string()),
            parent_stack: None,
            use_resources: BTreeMap::new(),
        }
    }

    #[test]
    fn test_collect_bindings_merges_uses_and_depends_on() {
        let d = descriptor(
            r#"
service: api
containers:
  - name: api
    image: img
uses:
  - name: main-db
    type: postgres
  - name: cache
    type: redis
dependsOn:
  - name: ledger
    resource: main-db
    owner: accounting
  - name: audit
    resource: audit-db
    owner: audit-svc
"#,
        );
        let bindings = collect_bindings(&d, &params());
        assert_eq!(bindings.len(), 3);

        let main_db = bindings.iter().find(|b| b.resource_name == "main-db").unwrap();
        assert!(main_db.declared_use);
        assert_eq!(main_db.dependencies.len(), 1);

        let audit_db = bindings.iter().find(|b| b.resource_name == "audit-db").unwrap();
        assert!(!audit_db.declared_use);
        assert_eq!(audit_db.resource_type, "postgres");
    }

    #[test]
    fn test_use_resources_map_overrides_declaration() {
        let d = descriptor(
            r#"
service: api
containers:
  - name: api
    image: img
uses:
  - name: cache
    type: redis
"#,
        );
        let mut p = params();
        p.use_resources.insert("cache".to_string(), false);
        let bindings = collect_bindings(&d, &p);
        assert!(!bindings[0].declared_use);
    }
}
