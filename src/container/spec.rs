//! # Deployment Unit Spec
//!
//! The fully resolved input to the composer: descriptor content merged
//! with compute-context contributions under environment-aware naming.

use crate::config::ProvisionParams;
use crate::context::ComputeContext;
use crate::descriptor::{
    AffinitySpec, ContainerSpec, ImagePullCredentialSpec, PdbSpec, PersistentVolumeSpec,
    ScalePolicySpec, StackDescriptor, TextVolumeSpec, VerticalScalePolicySpec,
};
use crate::errors::{ProvisionError, Result};
use crate::labels;
use crate::naming::{derive_base_name, derive_resource_name, sanitize_identifier};
use crate::scaling::validate_scaling_policy;
use std::collections::BTreeMap;

/// Composed input to the deployment-unit composer. All resource names for
/// one logical deployment derive from `(service_name, stack_environment,
/// parent_environment)` so they share one disambiguating suffix.
#[derive(Debug, Clone)]
pub struct DeploymentUnitSpec {
    /// Kubernetes namespace: the sanitized stack environment, never
    /// parent-derived.
    pub namespace: String,
    /// Raw (sanitized) service name.
    pub service_name: String,
    /// Deployment object name: the derived base name.
    pub deployment_name: String,
    /// Stack environment.
    pub stack_environment: String,
    /// Parent environment; empty for standard stacks.
    pub parent_environment: String,
    /// Domain for domain-based proxy routing.
    pub domain: Option<String>,
    /// Prefix for prefix-based proxy routing.
    pub path_prefix: Option<String>,
    /// Keep the prefix when proxying.
    pub proxy_keep_prefix: bool,
    /// Emit a native Ingress.
    pub provision_ingress: bool,
    /// Replicas when no HPA owns the count.
    pub replicas: i32,
    /// Service type.
    pub service_type: String,
    /// App containers.
    pub containers: Vec<ContainerSpec>,
    /// Init containers.
    pub init_containers: Vec<ContainerSpec>,
    /// Sidecar containers.
    pub sidecar_containers: Vec<ContainerSpec>,
    /// Ingress container name override.
    pub ingress_container: Option<String>,
    /// Node selector.
    pub node_selector: BTreeMap<String, String>,
    /// Node-affinity rules.
    pub affinity: Option<AffinitySpec>,
    /// Persistent volumes.
    pub persistent_volumes: Vec<PersistentVolumeSpec>,
    /// ConfigMap-backed text files.
    pub text_volumes: Vec<TextVolumeSpec>,
    /// Secret-backed text files.
    pub secret_text_volumes: Vec<TextVolumeSpec>,
    /// Ordered plain env: compute-context contributions (descriptor wins
    /// on conflict) followed by descriptor entries.
    pub plain_env: Vec<(String, String)>,
    /// Ordered secret env, delivered via the aggregated Secret.
    pub secret_env: Vec<(String, String)>,
    /// PodDisruptionBudget knobs.
    pub pod_disruption_budget: Option<PdbSpec>,
    /// Horizontal scaling policy.
    pub scale: Option<ScalePolicySpec>,
    /// Vertical scaling policy.
    pub vertical_scale: Option<VerticalScalePolicySpec>,
    /// Private registry credential.
    pub image_pull_credential: Option<ImagePullCredentialSpec>,
}

impl DeploymentUnitSpec {
    /// Derive a unit-scoped resource name for a kind suffix.
    #[must_use]
    pub fn resource_name(&self, kind_suffix: &str) -> String {
        derive_resource_name(
            &self.service_name,
            &self.stack_environment,
            &self.parent_environment,
            kind_suffix,
        )
    }

    /// Standard labels for this unit's objects.
    #[must_use]
    pub fn labels(&self) -> BTreeMap<String, String> {
        labels::standard_labels(
            &self.service_name,
            &self.stack_environment,
            &self.parent_environment,
        )
    }

    /// Stable selector labels shared by Deployment, Service and PDB.
    #[must_use]
    pub fn selector_labels(&self) -> BTreeMap<String, String> {
        labels::selector_labels(&self.deployment_name)
    }

    /// The container receiving ingress/proxy traffic.
    #[must_use]
    pub fn ingress_container(&self) -> Option<&ContainerSpec> {
        match &self.ingress_container {
            Some(name) => self
                .containers
                .iter()
                .chain(self.sidecar_containers.iter())
                .find(|c| c.name == *name),
            None => self.containers.first(),
        }
    }

    /// Cluster-internal DNS name of the unit's Service.
    #[must_use]
    pub fn service_dns(&self) -> String {
        format!("{}.{}.svc.cluster.local", self.deployment_name, self.namespace)
    }
}

/// Resolve a descriptor plus provisioning parameters and an accumulated
/// compute context into a composed unit spec.
///
/// This is the hard synchronization point for deferred compute-context
/// outputs: every registered output settles before any env list is read,
/// so composition never observes a partially registered context.
pub async fn resolve_unit_spec(
    descriptor: &StackDescriptor,
    params: &ProvisionParams,
    ctx: &mut ComputeContext,
) -> Result<DeploymentUnitSpec> {
    ctx.wait_outputs()
        .await
        .map_err(|e| ProvisionError::config(format!("deferred compute output failed: {e:#}")))?;

    if descriptor.containers.is_empty() {
        return Err(ProvisionError::config(format!(
            "stack '{}' declares no containers",
            descriptor.service
        )));
    }
    if descriptor.domain.is_some() && descriptor.path_prefix.is_some() {
        return Err(ProvisionError::config(
            "domain and pathPrefix routing are mutually exclusive",
        ));
    }

    let service_name = sanitize_identifier(&descriptor.service);
    let stack_environment = sanitize_identifier(&params.environment);
    let parent_environment = sanitize_identifier(params.parent_env_or_empty());
    let deployment_name =
        derive_base_name(&service_name, &stack_environment, &parent_environment);

    // Probe ambiguity is a configuration error, caught before anything is
    // provisioned: several ports, no main port, no explicit probe.
    for container in &descriptor.containers {
        let has_explicit_probe =
            container.readiness_probe.is_some() || container.liveness_probe.is_some();
        if container.ports.len() > 1 && container.resolve_main_port().is_none() && !has_explicit_probe
        {
            return Err(ProvisionError::config(format!(
                "container '{}' exposes {} ports with no mainPort and no explicit probe; \
                 the liveness port is ambiguous",
                container.name,
                container.ports.len()
            )));
        }
    }

    if descriptor.provision_ingress {
        let ingress_target = descriptor.ingress_container().ok_or_else(|| {
            ProvisionError::config("ingress requested but no ingress container resolvable")
        })?;
        if ingress_target.resolve_main_port().is_none() {
            return Err(ProvisionError::config(format!(
                "ingress requested but container '{}' has no resolvable main port",
                ingress_target.name
            )));
        }
    }

    validate_scaling_policy(descriptor.scale.as_ref(), &descriptor.containers)?;

    // Compute-context env, with descriptor declarations winning on name
    // conflicts, then the descriptor's own entries.
    let mut plain_env: Vec<(String, String)> = ctx
        .env_vars()
        .into_iter()
        .filter(|entry| !descriptor.env.contains_key(&entry.name))
        .map(|entry| (entry.name, entry.value))
        .collect();
    plain_env.extend(descriptor.env.iter().map(|(k, v)| (k.clone(), v.clone())));

    let mut secret_env: Vec<(String, String)> = ctx
        .secret_env_vars()
        .into_iter()
        .filter(|entry| !descriptor.secret_env.contains_key(&entry.name))
        .map(|entry| (entry.name, entry.value))
        .collect();
    secret_env.extend(
        descriptor
            .secret_env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );

    Ok(DeploymentUnitSpec {
        namespace: stack_environment.clone(),
        service_name,
        deployment_name,
        stack_environment,
        parent_environment,
        domain: descriptor.domain.clone(),
        path_prefix: descriptor.path_prefix.clone(),
        proxy_keep_prefix: descriptor.proxy_keep_prefix,
        provision_ingress: descriptor.provision_ingress,
        replicas: descriptor.replicas,
        service_type: descriptor.service_type.clone(),
        containers: descriptor.containers.clone(),
        init_containers: descriptor.init_containers.clone(),
        sidecar_containers: descriptor.sidecar_containers.clone(),
        ingress_container: descriptor.ingress_container.clone(),
        node_selector: descriptor.node_selector.clone(),
        affinity: descriptor.affinity.clone(),
        persistent_volumes: descriptor.persistent_volumes.clone(),
        text_volumes: descriptor.text_volumes.clone(),
        secret_text_volumes: descriptor.secret_text_volumes.clone(),
        plain_env,
        secret_env,
        pod_disruption_budget: descriptor.pod_disruption_budget.clone(),
        scale: descriptor.scale.clone(),
        vertical_scale: descriptor.vertical_scale.clone(),
        image_pull_credential: descriptor.image_pull_credential.clone(),
    })
}
