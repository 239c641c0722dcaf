//! # Service Exposure
//!
//! Service construction, including the proxy routing fragment carried as
//! an annotation when the unit requested domain or prefix routing.

use crate::caddy::fragment::fragment_for_unit;
use crate::caddy::ROUTING_ANNOTATION;
use crate::container::spec::DeploymentUnitSpec;
use crate::naming::sanitize_identifier;
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

/// Default port name when the descriptor does not provide one.
#[must_use]
pub fn default_port_name(port: i32) -> String {
    format!("http-{port}")
}

/// Build the unit's Service, or `None` when no container exposes a port.
#[must_use]
pub fn build_service(spec: &DeploymentUnitSpec) -> Option<Service> {
    let ports: Vec<ServicePort> = spec
        .containers
        .iter()
        .chain(spec.sidecar_containers.iter())
        .flat_map(|container| container.ports.iter())
        .map(|port| ServicePort {
            name: Some(
                port.name
                    .clone()
                    .map_or_else(|| default_port_name(port.container_port), |n| sanitize_identifier(&n)),
            ),
            port: port.container_port,
            target_port: Some(IntOrString::Int(port.container_port)),
            protocol: port.protocol.clone(),
            ..Default::default()
        })
        .collect();

    if ports.is_empty() {
        return None;
    }

    // The routing fragment lives and dies with the Service object; the
    // proxy's init container is its only reader.
    let annotations: Option<BTreeMap<String, String>> = fragment_for_unit(spec)
        .map(|fragment| BTreeMap::from([(ROUTING_ANNOTATION.to_string(), fragment)]));

    Some(Service {
        metadata: ObjectMeta {
            name: Some(spec.deployment_name.clone()),
            namespace: Some(spec.namespace.clone()),
            labels: Some(spec.labels()),
            annotations,
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(spec.selector_labels()),
            ports: Some(ports),
            type_: Some(spec.service_type.clone()),
            ..Default::default()
        }),
        status: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{ContainerSpec, PortSpec};

    fn unit(domain: Option<&str>) -> DeploymentUnitSpec {
        DeploymentUnitSpec {
            namespace: "staging".into(),
            service_name: "api".into(),
            deployment_name: "api".into(),
            stack_environment: "staging".into(),
            parent_environment: String::new(),
            domain: domain.map(str::to_string),
            path_prefix: None,
            proxy_keep_prefix: false,
            provision_ingress: false,
            replicas: 1,
            service_type: "ClusterIP".into(),
            containers: vec![ContainerSpec {
                name: "api".into(),
                image: "img".into(),
                ports: vec![PortSpec {
                    container_port: 8080,
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
            }],
            init_containers: Vec::new(),
            sidecar_containers: Vec::new(),
            ingress_container: None,
            node_selector: BTreeMap::new(),
            affinity: None,
            persistent_volumes: Vec::new(),
            text_volumes: Vec::new(),
            secret_text_volumes: Vec::new(),
            plain_env: Vec::new(),
            secret_env: Vec::new(),
            pod_disruption_budget: None,
            scale: None,
            vertical_scale: None,
            image_pull_credential: None,
        }
    }

    #[test]
    fn test_port_naming() {
        let service = build_service(&unit(None)).unwrap();
        let ports = service.spec.unwrap().ports.unwrap();
        assert_eq!(ports[0].name.as_deref(), Some("http-8080"));
        assert_eq!(ports[0].port, 8080);
    }

    #[test]
    fn test_no_ports_no_service() {
        let mut spec = unit(None);
        spec.containers[0].ports.clear();
        assert!(build_service(&spec).is_none());
    }

    #[test]
    fn test_routing_annotation_only_when_requested() {
        let without = build_service(&unit(None)).unwrap();
        assert!(without.metadata.annotations.is_none());

        let with = build_service(&unit(Some("api.example.com"))).unwrap();
        let annotations = with.metadata.annotations.unwrap();
        let fragment = annotations.get(ROUTING_ANNOTATION).unwrap();
        assert!(fragment.contains("api.example.com"));
        assert!(fragment.contains("api.staging.svc.cluster.local:8080"));
    }
}
