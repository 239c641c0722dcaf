//! # Deployment-Unit Composer
//!
//! Builds and applies the full set of Kubernetes objects for one logical
//! service in one environment: namespace, config/secret volumes, the
//! aggregated env Secret, PVCs, Deployment, Service, optional Ingress,
//! optional PodDisruptionBudget, optional HPA and VPA.
//!
//! Composition is pure object construction ([`compose`]); applying walks
//! the composed unit in a fixed order with the compute-context lifecycle
//! hooks interleaved ([`deploy`]):
//!
//! `Namespace → pre-processors → Secrets/ConfigMaps → PVCs → Deployment →
//! Service → Ingress → PDB → post-processors → HPA → VPA`
//!
//! Any sub-step failure aborts the whole composition; retry belongs to the
//! caller, not this layer.

pub mod ingress;
pub mod pdb;
pub mod podspec;
pub mod service;
pub mod spec;
pub mod volumes;

use crate::context::{ComputeContext, HookContext};
use crate::errors::Result;
use crate::kube::Applier;
use crate::scaling::{build_hpa, build_vpa};
use crate::scaling::vpa::vpa_api_resource;
use anyhow::Context as _;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy, RollingUpdateDeployment};
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, PersistentVolumeClaim, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use kube::core::DynamicObject;
use spec::DeploymentUnitSpec;
use tracing::info;

/// Every object composed for one deployment unit.
#[derive(Debug, Clone)]
pub struct DeploymentUnit {
    pub namespace: Namespace,
    pub config_volumes: Option<ConfigMap>,
    pub secret_volumes: Option<Secret>,
    pub env_secret: Option<Secret>,
    pub docker_config_secret: Option<Secret>,
    pub persistent_volume_claims: Vec<PersistentVolumeClaim>,
    pub deployment: Deployment,
    pub service: Option<Service>,
    pub ingress: Option<Ingress>,
    pub pod_disruption_budget: Option<PodDisruptionBudget>,
    pub hpa: Option<HorizontalPodAutoscaler>,
    pub vpa: Option<DynamicObject>,
}

fn build_namespace(spec: &DeploymentUnitSpec) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            // The object name is the stack environment itself; several
            // custom stacks of one parent each land in their own namespace.
            name: Some(spec.namespace.clone()),
            labels: Some(spec.labels()),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn build_deployment(spec: &DeploymentUnitSpec) -> Result<Deployment> {
    let template = podspec::build_pod_template(spec)?;

    // Replicas stay unset once an HPA owns the count, otherwise the next
    // apply would fight the autoscaler.
    let has_hpa = spec.scale.as_ref().is_some_and(|s| s.enabled);
    let replicas = if has_hpa { None } else { Some(spec.replicas) };

    Ok(Deployment {
        metadata: ObjectMeta {
            name: Some(spec.deployment_name.clone()),
            namespace: Some(spec.namespace.clone()),
            labels: Some(spec.labels()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas,
            selector: LabelSelector {
                match_labels: Some(spec.selector_labels()),
                ..Default::default()
            },
            template,
            strategy: Some(DeploymentStrategy {
                type_: Some("RollingUpdate".to_string()),
                rolling_update: Some(RollingUpdateDeployment {
                    max_surge: Some(IntOrString::String("25%".to_string())),
                    max_unavailable: Some(IntOrString::String("25%".to_string())),
                }),
            }),
            ..Default::default()
        }),
        status: None,
    })
}

/// Compose the full deployment unit. Pure construction: no cluster access,
/// any configuration problem surfaces here before anything is applied.
pub fn compose(spec: &DeploymentUnitSpec) -> Result<DeploymentUnit> {
    Ok(DeploymentUnit {
        namespace: build_namespace(spec),
        config_volumes: volumes::build_config_volumes(spec),
        secret_volumes: volumes::build_secret_volumes(spec),
        env_secret: volumes::build_env_secret(spec),
        docker_config_secret: volumes::build_docker_config_secret(spec)?,
        persistent_volume_claims: volumes::build_pvcs(spec),
        deployment: build_deployment(spec)?,
        service: service::build_service(spec),
        ingress: ingress::build_ingress(spec)?,
        pod_disruption_budget: pdb::build_pdb(spec),
        hpa: build_hpa(spec),
        vpa: build_vpa(spec)?,
    })
}

/// Apply a composed unit in dependency order, running the compute-context
/// lifecycle hooks at their contract points. Pre-processor execution is a
/// hard prerequisite gate for the Deployment, not a best-effort hook: a
/// consumer's credential Job must exist before its pods start.
pub async fn deploy(
    applier: &Applier,
    spec: &DeploymentUnitSpec,
    ctx: &mut ComputeContext,
    unit: &DeploymentUnit,
) -> anyhow::Result<()> {
    let stack = &spec.service_name;
    let env = &spec.stack_environment;
    let step = |sub_step: &str| format!("stack {stack}, env {env}, {sub_step}");

    applier
        .apply_cluster(&unit.namespace)
        .await
        .with_context(|| step("creating namespace"))?;

    let hook_ctx = HookContext {
        client: applier.client(),
        namespace: spec.namespace.clone(),
    };
    ctx.run_pre_processors(&hook_ctx)
        .await
        .with_context(|| step("running pre-processors"))?;

    if let Some(cm) = &unit.config_volumes {
        applier
            .apply_namespaced(&spec.namespace, cm)
            .await
            .with_context(|| step("creating config volumes"))?;
    }
    if let Some(secret) = &unit.secret_volumes {
        applier
            .apply_namespaced(&spec.namespace, secret)
            .await
            .with_context(|| step("creating secret volumes"))?;
    }
    if let Some(secret) = &unit.env_secret {
        applier
            .apply_namespaced(&spec.namespace, secret)
            .await
            .with_context(|| step("creating env secret"))?;
    }
    if let Some(secret) = &unit.docker_config_secret {
        applier
            .apply_namespaced(&spec.namespace, secret)
            .await
            .with_context(|| step("creating docker config secret"))?;
    }
    for pvc in &unit.persistent_volume_claims {
        applier
            .apply_namespaced(&spec.namespace, pvc)
            .await
            .with_context(|| step("creating persistent volume claim"))?;
    }

    applier
        .apply_namespaced(&spec.namespace, &unit.deployment)
        .await
        .with_context(|| step("creating deployment"))?;

    if let Some(svc) = &unit.service {
        applier
            .apply_namespaced(&spec.namespace, svc)
            .await
            .with_context(|| step("creating service"))?;
    }
    if let Some(ing) = &unit.ingress {
        applier
            .apply_namespaced(&spec.namespace, ing)
            .await
            .with_context(|| step("creating ingress"))?;
    }
    if let Some(pdb) = &unit.pod_disruption_budget {
        applier
            .apply_namespaced(&spec.namespace, pdb)
            .await
            .with_context(|| step("creating pod disruption budget"))?;
    }

    ctx.run_post_processors(&hook_ctx)
        .await
        .with_context(|| step("running post-processors"))?;

    // Autoscalers reference the Deployment by name, so they come last.
    if let Some(hpa) = &unit.hpa {
        applier
            .apply_namespaced(&spec.namespace, hpa)
            .await
            .with_context(|| step("creating horizontal pod autoscaler"))?;
    }
    if let Some(vpa) = &unit.vpa {
        applier
            .apply_dynamic(&spec.namespace, &vpa_api_resource(), vpa)
            .await
            .with_context(|| step("creating vertical pod autoscaler"))?;
    }

    info!(
        stack = %stack,
        environment = %env,
        deployment = %spec.deployment_name,
        "deployment unit applied"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProvisionParams;
    use crate::descriptor::StackDescriptor;
    use std::collections::BTreeMap;

    async fn resolved(yaml: &str, env: &str, parent: &str) -> DeploymentUnitSpec {
        let descriptor = StackDescriptor::from_yaml(yaml).unwrap();
        let params = ProvisionParams {
            stack_name: descriptor.service.clone(),
            environment: env.to_string(),
            parent_environment: (!parent.is_empty()).then(|| parent.to_string()),
            parent_stack: None,
            use_resources: BTreeMap::new(),
        };
        let mut ctx = ComputeContext::new();
        spec::resolve_unit_spec(&descriptor, &params, &mut ctx)
            .await
            .unwrap()
    }

    const BASIC: &str = r#"
service: api
containers:
  - name: api
    image: registry.example.com/api:1.0
    ports:
      - containerPort: 8080
"#;

    #[tokio::test]
    async fn test_standard_stack_unit() {
        // Scenario: standard stack, one container, no ingress, no scaling
        let unit = compose(&resolved(BASIC, "staging", "").await).unwrap();
        assert_eq!(unit.namespace.metadata.name.as_deref(), Some("staging"));
        assert_eq!(unit.deployment.metadata.name.as_deref(), Some("api"));
        let service = unit.service.unwrap();
        let ports = service.spec.unwrap().ports.unwrap();
        assert_eq!(ports[0].name.as_deref(), Some("http-8080"));
        assert!(unit.ingress.is_none());
        assert!(unit.hpa.is_none());
        assert!(unit.vpa.is_none());
        assert_eq!(unit.deployment.spec.unwrap().replicas, Some(1));
    }

    #[tokio::test]
    async fn test_custom_stack_unit() {
        let yaml = r#"
service: api
containers:
  - name: api
    image: registry.example.com/api:1.0
    ports:
      - containerPort: 8080
    resources:
      requests:
        cpu: 100m
scale:
  minReplicas: 2
  maxReplicas: 4
  cpuTargetPercent: 80
"#;
        let unit = compose(&resolved(yaml, "staging-preview", "staging").await).unwrap();
        assert_eq!(
            unit.namespace.metadata.name.as_deref(),
            Some("staging-preview")
        );
        assert_eq!(
            unit.deployment.metadata.name.as_deref(),
            Some("api-staging-preview")
        );
        let hpa = unit.hpa.unwrap();
        assert_eq!(hpa.metadata.name.as_deref(), Some("api-staging-preview-hpa"));
        // HPA owns the replica count
        assert_eq!(unit.deployment.spec.unwrap().replicas, None);
    }

    #[tokio::test]
    async fn test_vpa_emitted_with_base_name() {
        let yaml = r#"
service: api
containers:
  - name: api
    image: registry.example.com/api:1.0
    ports:
      - containerPort: 8080
verticalScale:
  updateMode: "Off"
"#;
        let unit = compose(&resolved(yaml, "staging-pr-7", "staging").await).unwrap();
        let vpa = unit.vpa.unwrap();
        assert_eq!(vpa.metadata.name.as_deref(), Some("api-staging-pr-7-vpa"));
        assert_eq!(
            vpa.data["spec"]["targetRef"]["name"],
            "api-staging-pr-7"
        );
    }
}
