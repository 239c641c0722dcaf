//! # Pod Assembly
//!
//! Pod template construction for the deployment unit: container env
//! merging, probe defaulting, affinity, security context.

use crate::container::spec::DeploymentUnitSpec;
use crate::container::volumes;
use crate::descriptor::{ContainerSpec, ProbeSpec};
use crate::errors::{ProvisionError, Result};
use crate::naming::suffix;
use k8s_openapi::api::core::v1::{
    Affinity, Container, ContainerPort, EnvFromSource, EnvVar, HTTPGetAction, HTTPHeader,
    LocalObjectReference, NodeAffinity, NodeSelector, NodeSelectorRequirement, NodeSelectorTerm,
    PodSpec, PodTemplateSpec, Probe, ResourceRequirements, SecretEnvSource, SecurityContext,
    TCPSocketAction,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

/// Merge the unit-level plain env with a container's own declarations.
/// Container entries have the highest precedence; unit-level ordering is
/// preserved for entries the container does not override.
fn container_env(spec: &DeploymentUnitSpec, container: &ContainerSpec) -> Vec<EnvVar> {
    let mut env: Vec<EnvVar> = spec
        .plain_env
        .iter()
        .filter(|(name, _)| !container.env.contains_key(name))
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: Some(value.clone()),
            ..Default::default()
        })
        .collect();
    env.extend(container.env.iter().map(|(name, value)| EnvVar {
        name: name.clone(),
        value: Some(value.clone()),
        ..Default::default()
    }));
    env
}

/// Translate an explicit probe, or default a TCP probe from the container's
/// representative port.
///
/// Ambiguity (several ports, no main port, no explicit probe) is rejected
/// during spec resolution; by this point a container either has a probe
/// source or deliberately exposes no ports.
pub fn resolve_probe(container: &ContainerSpec) -> Result<Option<Probe>> {
    if let Some(probe) = &container.readiness_probe {
        return Ok(Some(translate_probe(probe)));
    }
    match container.resolve_main_port() {
        Some(port) => Ok(Some(tcp_probe(port, None))),
        None if container.ports.is_empty() => Ok(None),
        // An explicit liveness probe disambiguates; no readiness default
        None if container.liveness_probe.is_some() => Ok(None),
        None => Err(ProvisionError::config(format!(
            "container '{}' has no resolvable probe port",
            container.name
        ))),
    }
}

fn tcp_probe(port: i32, periods: Option<(i32, i32)>) -> Probe {
    let (initial_delay, period) = periods.unwrap_or((5, 10));
    Probe {
        tcp_socket: Some(TCPSocketAction {
            port: IntOrString::Int(port),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay),
        period_seconds: Some(period),
        ..Default::default()
    }
}

/// Faithful translation of an explicit probe, headers included.
fn translate_probe(probe: &ProbeSpec) -> Probe {
    let mut translated = Probe {
        initial_delay_seconds: probe.initial_delay_seconds,
        period_seconds: probe.period_seconds,
        failure_threshold: probe.failure_threshold,
        ..Default::default()
    };
    if let Some(http) = &probe.http_get {
        let headers: Vec<HTTPHeader> = http
            .headers
            .iter()
            .map(|(name, value)| HTTPHeader {
                name: name.clone(),
                value: value.clone(),
            })
            .collect();
        translated.http_get = Some(HTTPGetAction {
            path: Some(http.path.clone()),
            port: IntOrString::Int(http.port),
            scheme: http.scheme.clone(),
            http_headers: (!headers.is_empty()).then_some(headers),
            ..Default::default()
        });
    } else if let Some(port) = probe.tcp_port {
        translated.tcp_socket = Some(TCPSocketAction {
            port: IntOrString::Int(port),
            ..Default::default()
        });
    }
    translated
}

fn resource_requirements(container: &ContainerSpec) -> Option<ResourceRequirements> {
    let resources = container.resources.as_ref()?;
    let quantify = |m: &BTreeMap<String, String>| -> Option<BTreeMap<String, Quantity>> {
        (!m.is_empty()).then(|| {
            m.iter()
                .map(|(k, v)| (k.clone(), Quantity(v.clone())))
                .collect()
        })
    };
    Some(ResourceRequirements {
        requests: quantify(&resources.requests),
        limits: quantify(&resources.limits),
        ..Default::default()
    })
}

fn build_container(
    spec: &DeploymentUnitSpec,
    container: &ContainerSpec,
    with_probes: bool,
) -> Result<Container> {
    let ports: Vec<ContainerPort> = container
        .ports
        .iter()
        .map(|p| ContainerPort {
            container_port: p.container_port,
            name: p.name.clone(),
            protocol: p.protocol.clone(),
            ..Default::default()
        })
        .collect();

    // All secret env rides in one aggregated Secret consumed via envFrom:
    // one audit point for the unit's secret material.
    let env_from = (!spec.secret_env.is_empty()).then(|| {
        vec![EnvFromSource {
            secret_ref: Some(SecretEnvSource {
                name: spec.resource_name(suffix::SECRETS),
                optional: Some(false),
            }),
            ..Default::default()
        }]
    });

    let (_, mounts) = volumes::pod_volumes_and_mounts(spec);

    let probe = if with_probes {
        resolve_probe(container)?
    } else {
        None
    };
    let liveness = if with_probes {
        container.liveness_probe.as_ref().map(translate_probe)
    } else {
        None
    };

    Ok(Container {
        name: container.name.clone(),
        image: Some(container.image.clone()),
        command: container.command.clone(),
        args: container.args.clone(),
        working_dir: container.working_dir.clone(),
        ports: (!ports.is_empty()).then_some(ports),
        env: Some(container_env(spec, container)),
        env_from,
        resources: resource_requirements(container),
        readiness_probe: probe,
        liveness_probe: liveness,
        volume_mounts: (!mounts.is_empty()).then_some(mounts),
        security_context: container.privileged.then(|| SecurityContext {
            privileged: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn node_affinity(spec: &DeploymentUnitSpec) -> Option<Affinity> {
    let rules = spec.affinity.as_ref()?;
    let requirements: Vec<NodeSelectorRequirement> = rules
        .required_node_labels
        .iter()
        .map(|(key, value)| NodeSelectorRequirement {
            key: key.clone(),
            operator: "In".to_string(),
            values: Some(vec![value.clone()]),
        })
        .collect();
    Some(Affinity {
        node_affinity: Some(NodeAffinity {
            required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                node_selector_terms: vec![NodeSelectorTerm {
                    match_expressions: Some(requirements),
                    ..Default::default()
                }],
            }),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Build the pod template for the unit's Deployment.
pub fn build_pod_template(spec: &DeploymentUnitSpec) -> Result<PodTemplateSpec> {
    let mut containers = Vec::with_capacity(spec.containers.len() + spec.sidecar_containers.len());
    for container in &spec.containers {
        containers.push(build_container(spec, container, true)?);
    }
    for sidecar in &spec.sidecar_containers {
        containers.push(build_container(spec, sidecar, false)?);
    }

    let mut init_containers = Vec::with_capacity(spec.init_containers.len());
    for init in &spec.init_containers {
        init_containers.push(build_container(spec, init, false)?);
    }

    let (pod_volumes, _) = volumes::pod_volumes_and_mounts(spec);

    let image_pull_secrets = spec.image_pull_credential.as_ref().map(|_| {
        vec![LocalObjectReference {
            name: spec.resource_name(suffix::DOCKER_CONFIG),
        }]
    });

    Ok(PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(spec.selector_labels()),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers,
            init_containers: (!init_containers.is_empty()).then_some(init_containers),
            volumes: (!pod_volumes.is_empty()).then_some(pod_volumes),
            node_selector: (!spec.node_selector.is_empty()).then(|| spec.node_selector.clone()),
            affinity: node_affinity(spec),
            image_pull_secrets,
            ..Default::default()
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{HttpGetSpec, PortSpec};

    fn unit_with_container(container: ContainerSpec) -> DeploymentUnitSpec {
        DeploymentUnitSpec {
            namespace: "staging".into(),
            service_name: "api".into(),
            deployment_name: "api".into(),
            stack_environment: "staging".into(),
            parent_environment: String::new(),
            domain: None,
            path_prefix: None,
            proxy_keep_prefix: false,
            provision_ingress: false,
            replicas: 1,
            service_type: "ClusterIP".into(),
            containers: vec![container],
            init_containers: Vec::new(),
            sidecar_containers: Vec::new(),
            ingress_container: None,
            node_selector: BTreeMap::new(),
            affinity: None,
            persistent_volumes: Vec::new(),
            text_volumes: Vec::new(),
            secret_text_volumes: Vec::new(),
            plain_env: vec![("PGHOST".into(), "db".into()), ("LOG_LEVEL".into(), "info".into())],
            secret_env: vec![("PGPASSWORD".into(), "pw".into())],
            pod_disruption_budget: None,
            scale: None,
            vertical_scale: None,
            image_pull_credential: None,
        }
    }

    fn basic_container() -> ContainerSpec {
        ContainerSpec {
            name: "api".into(),
            image: "registry.example.com/api:1.0".into(),
            ports: vec![PortSpec {
                container_port: 8080,
                name: None,
                protocol: None,
            }],
            main_port: None,
            command: None,
            args: None,
            working_dir: None,
            env: BTreeMap::from([("LOG_LEVEL".to_string(), "debug".to_string())]),
            resources: None,
            readiness_probe: None,
            liveness_probe: None,
            privileged: false,
        }
    }

    #[test]
    fn test_container_env_precedence() {
        let spec = unit_with_container(basic_container());
        let env = container_env(&spec, &spec.containers[0]);
        let pairs: Vec<(String, String)> = env
            .into_iter()
            .map(|e| (e.name, e.value.unwrap()))
            .collect();
        // Unit-level PGHOST survives, container-level LOG_LEVEL wins
        assert_eq!(pairs[0], ("PGHOST".to_string(), "db".to_string()));
        assert_eq!(pairs[1], ("LOG_LEVEL".to_string(), "debug".to_string()));
        assert_eq!(pairs.len(), 2);
    }

    #[test]
    fn test_single_port_defaults_tcp_probe() {
        let probe = resolve_probe(&basic_container()).unwrap().unwrap();
        assert_eq!(
            probe.tcp_socket.unwrap().port,
            IntOrString::Int(8080)
        );
    }

    #[test]
    fn test_main_port_is_preferred_for_probe() {
        let mut container = basic_container();
        container.ports.push(PortSpec {
            container_port: 9090,
            name: None,
            protocol: None,
        });
        container.main_port = Some(9090);
        let probe = resolve_probe(&container).unwrap().unwrap();
        assert_eq!(probe.tcp_socket.unwrap().port, IntOrString::Int(9090));
    }

    #[test]
    fn test_explicit_http_probe_translates_headers() {
        let mut container = basic_container();
        container.readiness_probe = Some(ProbeSpec {
            http_get: Some(HttpGetSpec {
                path: "/healthz".into(),
                port: 8080,
                headers: BTreeMap::from([("X-Probe".to_string(), "1".to_string())]),
                scheme: None,
            }),
            tcp_port: None,
            initial_delay_seconds: Some(3),
            period_seconds: None,
            failure_threshold: None,
        });
        let probe = resolve_probe(&container).unwrap().unwrap();
        let http = probe.http_get.unwrap();
        assert_eq!(http.path.as_deref(), Some("/healthz"));
        assert_eq!(http.http_headers.unwrap()[0].name, "X-Probe");
        assert_eq!(probe.initial_delay_seconds, Some(3));
    }

    #[test]
    fn test_portless_container_gets_no_probe() {
        let mut container = basic_container();
        container.ports.clear();
        assert!(resolve_probe(&container).unwrap().is_none());
    }

    #[test]
    fn test_secret_env_rides_env_from() {
        let spec = unit_with_container(basic_container());
        let template = build_pod_template(&spec).unwrap();
        let container = &template.spec.unwrap().containers[0];
        let env_from = container.env_from.as_ref().unwrap();
        assert_eq!(
            Some(env_from[0].secret_ref.as_ref().unwrap().name.as_str()),
            Some("api-secrets")
        );
    }

    #[test]
    fn test_affinity_rules_translate_to_node_affinity() {
        let mut spec = unit_with_container(basic_container());
        spec.affinity = Some(crate::descriptor::AffinitySpec {
            required_node_labels: BTreeMap::from([(
                "kubernetes.io/arch".to_string(),
                "arm64".to_string(),
            )]),
        });
        let template = build_pod_template(&spec).unwrap();
        let affinity = template.spec.unwrap().affinity.unwrap();
        let terms = affinity
            .node_affinity
            .unwrap()
            .required_during_scheduling_ignored_during_execution
            .unwrap()
            .node_selector_terms;
        let expr = &terms[0].match_expressions.as_ref().unwrap()[0];
        assert_eq!(expr.key, "kubernetes.io/arch");
        assert_eq!(expr.values.as_ref().unwrap()[0], "arm64");
    }
}
