//! # Stack Descriptor
//!
//! The declarative YAML model a stack is provisioned from: containers,
//! ports, probes, volumes, scaling policy, shared-resource consumption and
//! the parent-environment relationship.
//!
//! Field naming and defaulting follow Kubernetes conventions (camelCase on
//! the wire, serde defaults for everything optional) so descriptors read
//! like the manifests they produce.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Top-level stack descriptor.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StackDescriptor {
    /// Logical service name. Base for all derived resource names.
    pub service: String,
    /// Descriptor template type, e.g. `simple-container`.
    #[serde(default = "default_template")]
    pub template: String,
    /// Parent environment for custom stacks (PR previews, hotfixes).
    /// Empty or equal to the target environment means a standard stack.
    #[serde(default)]
    pub parent_env: Option<String>,
    /// Public domain for domain-based proxy routing.
    #[serde(default)]
    pub domain: Option<String>,
    /// Path prefix for prefix-based proxy routing. Mutually exclusive with
    /// `domain`.
    #[serde(default)]
    pub path_prefix: Option<String>,
    /// Keep the path prefix when proxying instead of stripping it.
    #[serde(default)]
    pub proxy_keep_prefix: bool,
    /// Create a native Kubernetes Ingress for the main port.
    #[serde(default)]
    pub provision_ingress: bool,
    /// Service type: ClusterIP, NodePort or LoadBalancer.
    #[serde(default = "default_service_type")]
    pub service_type: String,
    /// Desired replica count (ignored while an HPA owns the replica field).
    #[serde(default = "default_replicas")]
    pub replicas: i32,
    /// Node selector applied to the pod spec.
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
    /// Optional node-affinity rules.
    #[serde(default)]
    pub affinity: Option<AffinitySpec>,
    /// Application containers. At least one is required.
    pub containers: Vec<ContainerSpec>,
    /// Init containers, run to completion before the app containers.
    #[serde(default)]
    pub init_containers: Vec<ContainerSpec>,
    /// Sidecar containers appended after the app containers.
    #[serde(default)]
    pub sidecar_containers: Vec<ContainerSpec>,
    /// Name of the container that receives ingress/proxy traffic.
    /// Defaults to the first container.
    #[serde(default)]
    pub ingress_container: Option<String>,
    /// Stack-level plain environment variables. Override compute-context
    /// values of the same name.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Stack-level secret environment variables, delivered via one
    /// aggregated Secret.
    #[serde(default)]
    pub secret_env: BTreeMap<String, String>,
    /// ConfigMap-backed text files mounted into the pod.
    #[serde(default)]
    pub text_volumes: Vec<TextVolumeSpec>,
    /// Secret-backed text files mounted into the pod.
    #[serde(default)]
    pub secret_text_volumes: Vec<TextVolumeSpec>,
    /// Persistent volumes; each becomes a PVC plus a volume/mount pair.
    #[serde(default)]
    pub persistent_volumes: Vec<PersistentVolumeSpec>,
    /// Optional PodDisruptionBudget.
    #[serde(default)]
    pub pod_disruption_budget: Option<PdbSpec>,
    /// Optional horizontal scaling policy.
    #[serde(default)]
    pub scale: Option<ScalePolicySpec>,
    /// Optional vertical scaling policy.
    #[serde(default)]
    pub vertical_scale: Option<VerticalScalePolicySpec>,
    /// Optional private-registry credential.
    #[serde(default)]
    pub image_pull_credential: Option<ImagePullCredentialSpec>,
    /// Shared-resource instances this stack consumes from its parent.
    #[serde(default)]
    pub uses: Vec<ResourceUseSpec>,
    /// Databases owned by other consumers that this stack depends on.
    #[serde(default)]
    pub depends_on: Vec<DependencySpec>,
}

fn default_template() -> String {
    "simple-container".to_string()
}

fn default_service_type() -> String {
    "ClusterIP".to_string()
}

fn default_replicas() -> i32 {
    1
}

/// One application, init or sidecar container.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    /// Container name.
    pub name: String,
    /// Image reference. May be overridden by the image-resolution layer.
    pub image: String,
    /// Exposed ports.
    #[serde(default)]
    pub ports: Vec<PortSpec>,
    /// The port representing liveness and receiving proxy traffic when a
    /// container exposes several ports.
    #[serde(default)]
    pub main_port: Option<i32>,
    /// Entrypoint override.
    #[serde(default)]
    pub command: Option<Vec<String>>,
    /// Arguments override.
    #[serde(default)]
    pub args: Option<Vec<String>>,
    /// Working directory.
    #[serde(default)]
    pub working_dir: Option<String>,
    /// Container-level env vars. Highest precedence in the merge.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Compute resource requests/limits.
    #[serde(default)]
    pub resources: Option<ComputeResourcesSpec>,
    /// Explicit readiness probe. When absent, a TCP probe is defaulted from
    /// the main or single port.
    #[serde(default)]
    pub readiness_probe: Option<ProbeSpec>,
    /// Explicit liveness probe.
    #[serde(default)]
    pub liveness_probe: Option<ProbeSpec>,
    /// Run as a privileged container.
    #[serde(default)]
    pub privileged: bool,
}

impl ContainerSpec {
    /// Resolve the port that represents this container for probing and
    /// proxy routing.
    ///
    /// Returns `None` when the container exposes several ports and no
    /// `mainPort` was declared; callers treat that as a configuration error
    /// where a single representative port is required.
    #[must_use]
    pub fn resolve_main_port(&self) -> Option<i32> {
        if let Some(main) = self.main_port {
            return Some(main);
        }
        match self.ports.as_slice() {
            [only] => Some(only.container_port),
            _ => None,
        }
    }
}

/// One container port.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortSpec {
    /// Port number inside the container.
    pub container_port: i32,
    /// Optional port name; defaults to `http-{port}` on the Service.
    #[serde(default)]
    pub name: Option<String>,
    /// Protocol, TCP unless stated otherwise.
    #[serde(default)]
    pub protocol: Option<String>,
}

/// Compute requests and limits, Kubernetes quantity strings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeResourcesSpec {
    #[serde(default)]
    pub requests: BTreeMap<String, String>,
    #[serde(default)]
    pub limits: BTreeMap<String, String>,
}

/// Explicit probe configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeSpec {
    /// HTTP GET probe; translated faithfully including headers.
    #[serde(default)]
    pub http_get: Option<HttpGetSpec>,
    /// TCP probe on an explicit port.
    #[serde(default)]
    pub tcp_port: Option<i32>,
    #[serde(default)]
    pub initial_delay_seconds: Option<i32>,
    #[serde(default)]
    pub period_seconds: Option<i32>,
    #[serde(default)]
    pub failure_threshold: Option<i32>,
}

/// HTTP GET probe parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpGetSpec {
    pub path: String,
    pub port: i32,
    /// Request headers sent with the probe.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub scheme: Option<String>,
}

/// Node-affinity rules, a required match on node labels.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AffinitySpec {
    /// Node labels that must all match for scheduling.
    pub required_node_labels: BTreeMap<String, String>,
}

/// A text file delivered via ConfigMap or Secret and mounted at a path.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextVolumeSpec {
    /// Key inside the backing ConfigMap/Secret; also the file name.
    pub name: String,
    /// Absolute mount path of the rendered file.
    pub mount_path: String,
    /// File content.
    pub content: String,
}

/// A persistent volume claim plus its mount.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolumeSpec {
    /// Claim/volume name (unit-scoped).
    pub name: String,
    /// Absolute mount path inside the containers.
    pub mount_path: String,
    /// Requested capacity, e.g. `10Gi`.
    pub size: String,
    /// Storage class; the cluster default applies when unset.
    #[serde(default)]
    pub storage_class: Option<String>,
}

/// PodDisruptionBudget knobs; exactly one of the two should be set.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PdbSpec {
    #[serde(default)]
    pub min_available: Option<i32>,
    #[serde(default)]
    pub max_unavailable: Option<i32>,
}

/// Horizontal scaling policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalePolicySpec {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub min_replicas: i32,
    pub max_replicas: i32,
    /// Target CPU utilization percent, 1-100.
    #[serde(default)]
    pub cpu_target_percent: Option<i32>,
    /// Target memory utilization percent, 1-100.
    #[serde(default)]
    pub memory_target_percent: Option<i32>,
}

fn default_enabled() -> bool {
    true
}

/// Vertical scaling policy. May coexist with an HPA; in that case the
/// recommended `updateMode` is `Off` so the VPA only emits recommendations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerticalScalePolicySpec {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// `Off`, `Initial`, `Recreate` or `Auto`.
    #[serde(default = "default_vpa_mode")]
    pub update_mode: String,
    #[serde(default)]
    pub min_allowed: BTreeMap<String, String>,
    #[serde(default)]
    pub max_allowed: BTreeMap<String, String>,
    /// Resources the VPA controls, e.g. `cpu`, `memory`.
    #[serde(default)]
    pub controlled_resources: Vec<String>,
}

fn default_vpa_mode() -> String {
    "Auto".to_string()
}

/// Private registry credential for image pulls.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePullCredentialSpec {
    pub registry: String,
    pub username: String,
    pub password: String,
}

/// Declares consumption of a shared-resource instance exported by the
/// parent stack.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUseSpec {
    /// Resource instance name as exported by the parent stack.
    pub name: String,
    /// Resource type: `postgres`, `redis`, `mongodb`, `rabbitmq`.
    #[serde(rename = "type")]
    pub resource_type: String,
}

/// Declares a dependency on a database owned by another consumer of a
/// shared Postgres instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencySpec {
    /// Dependency name; combined with the consuming stack's name to derive
    /// the credential user.
    pub name: String,
    /// The shared-resource instance the owner's database lives on.
    pub resource: String,
    /// The owning consumer whose database is shared.
    pub owner: String,
}

impl StackDescriptor {
    /// Parse a descriptor from YAML.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let descriptor: Self = serde_yaml::from_str(yaml)?;
        Ok(descriptor)
    }

    /// Look up a container (app, init or sidecar) by name.
    #[must_use]
    pub fn find_container(&self, name: &str) -> Option<&ContainerSpec> {
        self.containers
            .iter()
            .chain(self.init_containers.iter())
            .chain(self.sidecar_containers.iter())
            .find(|c| c.name == name)
    }

    /// The container that receives ingress and proxy traffic.
    #[must_use]
    pub fn ingress_container(&self) -> Option<&ContainerSpec> {
        match &self.ingress_container {
            Some(name) => self.find_container(name),
            None => self.containers.first(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
service: api
containers:
  - name: api
    image: registry.example.com/api:1.2.3
    ports:
      - containerPort: 8080
"#;

    #[test]
    fn test_minimal_descriptor_defaults() {
        let d = StackDescriptor::from_yaml(MINIMAL).unwrap();
        assert_eq!(d.service, "api");
        assert_eq!(d.template, "simple-container");
        assert_eq!(d.service_type, "ClusterIP");
        assert_eq!(d.replicas, 1);
        assert!(d.parent_env.is_none());
        assert!(d.uses.is_empty());
        assert!(!d.provision_ingress);
    }

    #[test]
    fn test_full_descriptor_round_trip() {
        let yaml = r#"
service: billing
parentEnv: staging
domain: billing.example.com
serviceType: ClusterIP
replicas: 2
containers:
  - name: app
    image: registry.example.com/billing:2.0
    ports:
      - containerPort: 8080
      - containerPort: 9090
    mainPort: 8080
    env:
      LOG_LEVEL: debug
    resources:
      requests:
        cpu: 100m
        memory: 128Mi
    readinessProbe:
      httpGet:
        path: /healthz
        port: 8080
        headers:
          X-Probe: "1"
uses:
  - name: main-db
    type: postgres
dependsOn:
  - name: ledger
    resource: main-db
    owner: accounting
scale:
  minReplicas: 2
  maxReplicas: 6
  cpuTargetPercent: 75
persistentVolumes:
  - name: data
    mountPath: /var/lib/billing
    size: 10Gi
"#;
        let d = StackDescriptor::from_yaml(yaml).unwrap();
        assert_eq!(d.parent_env.as_deref(), Some("staging"));
        assert_eq!(d.uses[0].resource_type, "postgres");
        assert_eq!(d.depends_on[0].owner, "accounting");
        let scale = d.scale.unwrap();
        assert!(scale.enabled);
        assert_eq!(scale.cpu_target_percent, Some(75));
        let container = &d.containers[0];
        assert_eq!(container.resolve_main_port(), Some(8080));
        let probe = container.readiness_probe.as_ref().unwrap();
        assert_eq!(
            probe.http_get.as_ref().unwrap().headers.get("X-Probe"),
            Some(&"1".to_string())
        );
    }

    #[test]
    fn test_main_port_resolution() {
        let single = ContainerSpec {
            name: "a".into(),
            image: "img".into(),
            ports: vec![PortSpec {
                container_port: 3000,
                name: None,
                protocol: None,
            }],
            main_port: None,
            command: None,
            args: None,
            working_dir: None,
            env: BTreeMap::new(),
            resources: None,
            readiness_probe: None,
            liveness_probe: None,
            privileged: false,
        };
        assert_eq!(single.resolve_main_port(), Some(3000));

        let mut multi = single.clone();
        multi.ports.push(PortSpec {
            container_port: 4000,
            name: None,
            protocol: None,
        });
        assert_eq!(multi.resolve_main_port(), None);

        multi.main_port = Some(4000);
        assert_eq!(multi.resolve_main_port(), Some(4000));
    }

    #[test]
    fn test_ingress_container_defaults_to_first() {
        let d = StackDescriptor::from_yaml(MINIMAL).unwrap();
        assert_eq!(d.ingress_container().unwrap().name, "api");
    }
}
