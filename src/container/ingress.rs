//! # Native Ingress
//!
//! Kubernetes Ingress construction, distinct from the Caddy routing
//! mechanism. Only emitted when explicitly requested; a missing main port
//! is a configuration error at that point.

use crate::container::spec::DeploymentUnitSpec;
use crate::container::service::default_port_name;
use crate::errors::{ProvisionError, Result};
use crate::naming::suffix;
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use kube::api::ObjectMeta;

/// Build the unit's Ingress, or `None` when none was requested.
pub fn build_ingress(spec: &DeploymentUnitSpec) -> Result<Option<Ingress>> {
    if !spec.provision_ingress {
        return Ok(None);
    }
    let container = spec.ingress_container().ok_or_else(|| {
        ProvisionError::config("ingress requested but no ingress container resolvable")
    })?;
    let port = container.resolve_main_port().ok_or_else(|| {
        ProvisionError::config(format!(
            "ingress requested but container '{}' has no resolvable main port",
            container.name
        ))
    })?;

    let backend = IngressBackend {
        service: Some(IngressServiceBackend {
            name: spec.deployment_name.clone(),
            port: Some(ServiceBackendPort {
                name: Some(default_port_name(port)),
                number: None,
            }),
        }),
        ..Default::default()
    };

    let path = spec.path_prefix.clone().unwrap_or_else(|| "/".to_string());
    let rule = IngressRule {
        host: spec.domain.clone(),
        http: Some(HTTPIngressRuleValue {
            paths: vec![HTTPIngressPath {
                path: Some(path),
                path_type: "Prefix".to_string(),
                backend,
            }],
        }),
    };

    Ok(Some(Ingress {
        metadata: ObjectMeta {
            name: Some(spec.resource_name(suffix::INGRESS)),
            namespace: Some(spec.namespace.clone()),
            labels: Some(spec.labels()),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            rules: Some(vec![rule]),
            ..Default::default()
        }),
        status: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{ContainerSpec, PortSpec};
    use std::collections::BTreeMap;

    fn unit(provision: bool) -> DeploymentUnitSpec {
        DeploymentUnitSpec {
            namespace: "staging".into(),
            service_name: "api".into(),
            deployment_name: "api".into(),
            stack_environment: "staging".into(),
            parent_environment: String::new(),
            domain: Some("api.example.com".into()),
            path_prefix: None,
            proxy_keep_prefix: false,
            provision_ingress: provision,
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
    fn test_not_requested_is_none() {
        assert!(build_ingress(&unit(false)).unwrap().is_none());
    }

    #[test]
    fn test_ingress_targets_service_port() {
        let ingress = build_ingress(&unit(true)).unwrap().unwrap();
        assert_eq!(ingress.metadata.name.as_deref(), Some("api-ingress"));
        let rules = ingress.spec.unwrap().rules.unwrap();
        assert_eq!(rules[0].host.as_deref(), Some("api.example.com"));
        let backend = &rules[0].http.as_ref().unwrap().paths[0].backend;
        let service = backend.service.as_ref().unwrap();
        assert_eq!(service.name, "api");
        assert_eq!(
            service.port.as_ref().unwrap().name.as_deref(),
            Some("http-8080")
        );
    }

    #[test]
    fn test_missing_main_port_is_error() {
        let mut spec = unit(true);
        spec.containers[0].ports.push(PortSpec {
            container_port: 9090,
            name: None,
            protocol: None,
        });
        assert!(matches!(
            build_ingress(&spec),
            Err(ProvisionError::Configuration(_))
        ));
    }
}
