//! # Caddy Reverse-Proxy Synthesizer
//!
//! Deploys one long-lived Caddy proxy per cluster slice. The proxy's
//! configuration is not a static file: an init container re-scans all
//! Services cluster-wide for the routing-fragment annotation on every pod
//! (re)start, aggregates the fragments into a Caddyfile and hands it to
//! the Caddy process through a shared emptyDir. Consumers force a re-scan
//! through the annotation-only patch in [`patch`], never by recreating the
//! proxy Deployment.

pub mod fragment;
pub mod patch;

use crate::errors::Result;
use crate::labels;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, Namespace,
    PodSpec, PodTemplateSpec, Service, ServiceAccount, ServicePort, ServiceSpec, Volume,
    VolumeMount,
};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Service annotation the proxy's init container scans for.
pub const ROUTING_ANNOTATION: &str = "caddy.stack-deployer.io/snippet";

/// Pod-template annotation carrying the routing-state hash; changing it
/// rolls the proxy pods and with them the init-container scan.
pub const CONFIG_HASH_ANNOTATION: &str = "caddy.stack-deployer.io/config-hash";

const CADDY_IMAGE: &str = "caddy:2-alpine";
const KUBECTL_IMAGE: &str = "bitnami/kubectl:1.30";

/// Options for the synthesized proxy bundle.
#[derive(Debug, Clone)]
pub struct ProxyOptions {
    /// Namespace the proxy lives in.
    pub namespace: String,
    /// Name of the proxy Deployment and Service.
    pub name: String,
    /// Service type; LoadBalancer for the cluster's public entry point.
    pub service_type: String,
    /// Wrap aggregated fragments with a catch-all site (static files,
    /// gzip, HSTS).
    pub default_site: bool,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            namespace: "caddy-system".to_string(),
            name: "caddy-proxy".to_string(),
            service_type: "LoadBalancer".to_string(),
            default_site: true,
        }
    }
}

/// Content hash of the aggregated routing state. Stable input order is the
/// caller's business; the hash only certifies "something changed".
#[must_use]
pub fn routing_state_hash(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// The init-container scan script. Fragments beginning with a `handle`
/// directive are routed into the catch-all site through Caddy's `import`;
/// full site blocks (domain routing) land at the top level.
#[must_use]
fn scan_script(default_site: bool) -> String {
    let default_block = if default_site {
        format!(
            r#"cat >> /config/Caddyfile <<'SITE'

:80 {{
    encode gzip
    header Strict-Transport-Security "max-age=31536000; includeSubDomains"
    root * /var/www/html
    import {prefix_file}
    file_server
}}
SITE"#,
            prefix_file = "/config/prefixes.caddy"
        )
    } else {
        String::new()
    };

    format!(
        r#"#!/bin/sh
set -eu

fragments=/tmp/fragments.caddy
sites=/tmp/sites.caddy
prefixes=/config/prefixes.caddy
: > "$fragments"; : > "$sites"; : > "$prefixes"

kubectl get services --all-namespaces \
  -o jsonpath='{{range .items[*]}}{{.metadata.annotations.caddy\.stack-deployer\.io/snippet}}{{"\n"}}{{end}}' \
  >> "$fragments"

# split handle/handle_path blocks (prefix routing) from full site blocks
awk -v sites="$sites" -v prefixes="$prefixes" '
  /^(handle|handle_path) / {{ mode = "p" }}
  mode == "" && /^[^ }}]/ {{ mode = "s" }}
  mode == "p" {{ print >> prefixes; if ($0 == "}}") mode = ""; next }}
  mode == "s" {{ print >> sites; if ($0 == "}}") mode = "" }}
' "$fragments"

cat "$sites" > /config/Caddyfile
{default_block}

echo "aggregated $(grep -c '^' "$fragments" || true) fragment lines"
"#
    )
}

/// Everything the proxy bundle consists of.
#[derive(Debug, Clone)]
pub struct ProxyBundle {
    pub namespace: Namespace,
    pub service_account: ServiceAccount,
    pub cluster_role: ClusterRole,
    pub cluster_role_binding: ClusterRoleBinding,
    pub scan_config: ConfigMap,
    pub deployment: Deployment,
    pub service: Service,
}

fn proxy_labels(opts: &ProxyOptions) -> BTreeMap<String, String> {
    BTreeMap::from([
        (labels::NAME.to_string(), opts.name.clone()),
        (labels::MANAGED_BY.to_string(), labels::MANAGER.to_string()),
    ])
}

/// Compose the proxy bundle. Pure construction.
#[must_use]
pub fn compose_proxy(opts: &ProxyOptions) -> ProxyBundle {
    let labels = proxy_labels(opts);
    let meta = |name: &str| ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(opts.namespace.clone()),
        labels: Some(labels.clone()),
        ..Default::default()
    };

    let namespace = Namespace {
        metadata: ObjectMeta {
            name: Some(opts.namespace.clone()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        ..Default::default()
    };

    let service_account = ServiceAccount {
        metadata: meta(&opts.name),
        ..Default::default()
    };

    // The scan reads Services in every namespace, nothing else.
    let cluster_role = ClusterRole {
        metadata: ObjectMeta {
            name: Some(format!("{}-service-reader", opts.name)),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec![String::new()]),
            resources: Some(vec!["services".to_string()]),
            verbs: vec!["get".to_string(), "list".to_string()],
            ..Default::default()
        }]),
        ..Default::default()
    };

    let cluster_role_binding = ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(format!("{}-service-reader", opts.name)),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: format!("{}-service-reader", opts.name),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: opts.name.clone(),
            namespace: Some(opts.namespace.clone()),
            ..Default::default()
        }]),
    };

    let scan_config = ConfigMap {
        metadata: meta(&format!("{}-scan", opts.name)),
        data: Some(BTreeMap::from([(
            "scan.sh".to_string(),
            scan_script(opts.default_site),
        )])),
        ..Default::default()
    };

    let config_volume = Volume {
        name: "config".to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    };
    let scan_volume = Volume {
        name: "scan".to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: format!("{}-scan", opts.name),
            default_mode: Some(0o755),
            ..Default::default()
        }),
        ..Default::default()
    };
    let config_mount = VolumeMount {
        name: "config".to_string(),
        mount_path: "/config".to_string(),
        ..Default::default()
    };

    let init_container = Container {
        name: "scan-routes".to_string(),
        image: Some(KUBECTL_IMAGE.to_string()),
        command: Some(vec![
            "sh".to_string(),
            "/etc/caddy-scan/scan.sh".to_string(),
        ]),
        volume_mounts: Some(vec![
            config_mount.clone(),
            VolumeMount {
                name: "scan".to_string(),
                mount_path: "/etc/caddy-scan".to_string(),
                read_only: Some(true),
                ..Default::default()
            },
        ]),
        ..Default::default()
    };

    let caddy_container = Container {
        name: "caddy".to_string(),
        image: Some(CADDY_IMAGE.to_string()),
        command: Some(vec![
            "caddy".to_string(),
            "run".to_string(),
            "--config".to_string(),
            "/config/Caddyfile".to_string(),
            "--adapter".to_string(),
            "caddyfile".to_string(),
        ]),
        ports: Some(vec![
            ContainerPort {
                container_port: 80,
                name: Some("http".to_string()),
                ..Default::default()
            },
            ContainerPort {
                container_port: 443,
                name: Some("https".to_string()),
                ..Default::default()
            },
        ]),
        volume_mounts: Some(vec![config_mount]),
        ..Default::default()
    };

    let deployment = Deployment {
        metadata: meta(&opts.name),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels.clone()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(opts.name.clone()),
                    init_containers: Some(vec![init_container]),
                    containers: vec![caddy_container],
                    volumes: Some(vec![config_volume, scan_volume]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    };

    let service = Service {
        metadata: meta(&opts.name),
        spec: Some(ServiceSpec {
            selector: Some(labels),
            type_: Some(opts.service_type.clone()),
            ports: Some(vec![
                ServicePort {
                    name: Some("http".to_string()),
                    port: 80,
                    target_port: Some(IntOrString::Int(80)),
                    ..Default::default()
                },
                ServicePort {
                    name: Some("https".to_string()),
                    port: 443,
                    target_port: Some(IntOrString::Int(443)),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        }),
        status: None,
    };

    ProxyBundle {
        namespace,
        service_account,
        cluster_role,
        cluster_role_binding,
        scan_config,
        deployment,
        service,
    }
}

/// Apply the whole proxy bundle.
pub async fn deploy_proxy(applier: &crate::kube::Applier, opts: &ProxyOptions) -> Result<()> {
    let bundle = compose_proxy(opts);
    applier.apply_cluster(&bundle.namespace).await?;
    applier
        .apply_namespaced(&opts.namespace, &bundle.service_account)
        .await?;
    applier.apply_cluster(&bundle.cluster_role).await?;
    applier.apply_cluster(&bundle.cluster_role_binding).await?;
    applier
        .apply_namespaced(&opts.namespace, &bundle.scan_config)
        .await?;
    applier
        .apply_namespaced(&opts.namespace, &bundle.deployment)
        .await?;
    applier
        .apply_namespaced(&opts.namespace, &bundle.service)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_state_hash_changes_with_content() {
        let a = routing_state_hash(&["site-a", "site-b"]);
        let b = routing_state_hash(&["site-a", "site-b"]);
        let c = routing_state_hash(&["site-a", "site-c"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_scan_script_references_annotation() {
        let script = scan_script(true);
        assert!(script.contains("caddy\\.stack-deployer\\.io/snippet"));
        assert!(script.contains("file_server"));
        assert!(script.contains("Strict-Transport-Security"));
    }

    #[test]
    fn test_scan_script_without_default_site() {
        let script = scan_script(false);
        assert!(!script.contains("file_server"));
    }

    #[test]
    fn test_proxy_bundle_wiring() {
        let opts = ProxyOptions::default();
        let bundle = compose_proxy(&opts);

        let pod = bundle.deployment.spec.unwrap().template.spec.unwrap();
        assert_eq!(
            pod.service_account_name.as_deref(),
            Some("caddy-proxy")
        );
        let init = &pod.init_containers.unwrap()[0];
        assert_eq!(init.name, "scan-routes");
        assert_eq!(pod.containers[0].name, "caddy");

        let rule = &bundle.cluster_role.rules.unwrap()[0];
        assert_eq!(rule.resources.as_ref().unwrap()[0], "services");
        assert_eq!(rule.verbs, vec!["get", "list"]);

        assert_eq!(
            bundle.service.spec.unwrap().type_.as_deref(),
            Some("LoadBalancer")
        );
    }
}
