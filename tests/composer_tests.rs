//! # Composer Tests
//!
//! End-to-end composition scenarios: a full descriptor goes through spec
//! resolution and object construction, and the resulting Kubernetes
//! objects are checked for naming, wiring and the standard/custom stack
//! split.

use stack_deployer::config::ProvisionParams;
use stack_deployer::container::spec::resolve_unit_spec;
use stack_deployer::container::{compose, DeploymentUnit};
use stack_deployer::context::ComputeContext;
use stack_deployer::descriptor::StackDescriptor;
use std::collections::BTreeMap;

async fn compose_from(yaml: &str, env: &str, parent_env: &str) -> DeploymentUnit {
    let descriptor = StackDescriptor::from_yaml(yaml).expect("descriptor should parse");
    let params = ProvisionParams {
        stack_name: descriptor.service.clone(),
        environment: env.to_string(),
        parent_environment: (!parent_env.is_empty()).then(|| parent_env.to_string()),
        parent_stack: None,
        use_resources: BTreeMap::new(),
    };
    let mut ctx = ComputeContext::new();
    let spec = resolve_unit_spec(&descriptor, &params, &mut ctx)
        .await
        .expect("spec should resolve");
    compose(&spec).expect("unit should compose")
}

const SCENARIO_A: &str = r#"
service: api
containers:
  - name: api
    image: registry.example.com/api:1.2.3
    ports:
      - containerPort: 8080
"#;

#[tokio::test]
async fn test_standard_stack_minimal_unit() {
    // service=api, env=staging, no parent, one container on 8080,
    // no ingress requested
    let unit = compose_from(SCENARIO_A, "staging", "").await;

    assert_eq!(unit.namespace.metadata.name.as_deref(), Some("staging"));
    assert_eq!(unit.deployment.metadata.name.as_deref(), Some("api"));

    let service = unit.service.expect("a port is exposed, service expected");
    let ports = service.spec.unwrap().ports.unwrap();
    assert_eq!(ports.len(), 1);
    assert_eq!(ports[0].name.as_deref(), Some("http-8080"));

    assert!(unit.ingress.is_none());
    assert!(unit.hpa.is_none());
    assert!(unit.vpa.is_none());
    assert!(unit.pod_disruption_budget.is_none());
    assert!(unit.env_secret.is_none());
}

#[tokio::test]
async fn test_custom_stack_full_unit() {
    // Same service branched off staging as a preview environment: every
    // derived name carries the environment suffix, the namespace is the
    // preview's own environment.
    let yaml = r#"
service: api
containers:
  - name: api
    image: registry.example.com/api:1.2.3
    ports:
      - containerPort: 8080
    resources:
      requests:
        cpu: 100m
        memory: 128Mi
scale:
  minReplicas: 2
  maxReplicas: 5
  cpuTargetPercent: 70
secretEnv:
  API_TOKEN: t0ps3cret
"#;
    let unit = compose_from(yaml, "staging-preview", "staging").await;

    assert_eq!(
        unit.namespace.metadata.name.as_deref(),
        Some("staging-preview")
    );
    assert_eq!(
        unit.deployment.metadata.name.as_deref(),
        Some("api-staging-preview")
    );

    let hpa = unit.hpa.expect("scaling policy enabled");
    assert_eq!(hpa.metadata.name.as_deref(), Some("api-staging-preview-hpa"));
    let hpa_spec = hpa.spec.unwrap();
    assert_eq!(hpa_spec.scale_target_ref.name, "api-staging-preview");
    assert_eq!(hpa_spec.min_replicas, Some(2));

    let secret = unit.env_secret.expect("secret env declared");
    assert_eq!(
        secret.metadata.name.as_deref(),
        Some("api-staging-preview-secrets")
    );

    // The deployment consumes the aggregated secret via envFrom
    let pod = unit.deployment.spec.unwrap().template.spec.unwrap();
    let env_from = pod.containers[0].env_from.as_ref().unwrap();
    assert_eq!(
        Some(env_from[0].secret_ref.as_ref().unwrap().name.as_str()),
        Some("api-staging-preview-secrets")
    );
}

#[tokio::test]
async fn test_sibling_previews_do_not_collide() {
    let first = compose_from(SCENARIO_A, "staging-pr-123", "staging").await;
    let second = compose_from(SCENARIO_A, "staging-pr-456", "staging").await;

    assert_ne!(
        first.namespace.metadata.name,
        second.namespace.metadata.name
    );
    assert_ne!(
        first.deployment.metadata.name,
        second.deployment.metadata.name
    );
}

#[tokio::test]
async fn test_ingress_and_volumes() {
    let yaml = r#"
service: web
domain: web.example.com
provisionIngress: true
containers:
  - name: web
    image: registry.example.com/web:2.0
    ports:
      - containerPort: 3000
textVolumes:
  - name: app.conf
    mountPath: /etc/web/app.conf
    content: "mode = production"
persistentVolumes:
  - name: cache
    mountPath: /var/cache/web
    size: 5Gi
"#;
    let unit = compose_from(yaml, "prod", "").await;

    let ingress = unit.ingress.expect("ingress requested");
    assert_eq!(ingress.metadata.name.as_deref(), Some("web-ingress"));
    let rules = ingress.spec.unwrap().rules.unwrap();
    assert_eq!(rules[0].host.as_deref(), Some("web.example.com"));

    let cm = unit.config_volumes.expect("text volume declared");
    assert_eq!(cm.metadata.name.as_deref(), Some("web-cfg-volumes"));

    assert_eq!(unit.persistent_volume_claims.len(), 1);
    assert_eq!(
        unit.persistent_volume_claims[0].metadata.name.as_deref(),
        Some("web-cache")
    );

    // PVC and pod volume pair up
    let pod = unit.deployment.spec.unwrap().template.spec.unwrap();
    let volumes = pod.volumes.unwrap();
    assert!(volumes.iter().any(|v| {
        v.persistent_volume_claim
            .as_ref()
            .is_some_and(|c| c.claim_name == "web-cache")
    }));
}

#[tokio::test]
async fn test_compute_context_env_flows_into_containers() {
    let descriptor = StackDescriptor::from_yaml(SCENARIO_A).unwrap();
    let params = ProvisionParams {
        stack_name: "api".to_string(),
        environment: "staging".to_string(),
        parent_environment: None,
        parent_stack: None,
        use_resources: BTreeMap::new(),
    };
    let mut ctx = ComputeContext::new();
    ctx.add_env_var_if_not_exist("PGHOST", "db.internal", "postgres", "main-db", "api");
    ctx.add_secret_env_var_if_not_exist("PGPASSWORD", "generated", "postgres", "main-db", "api");

    let spec = resolve_unit_spec(&descriptor, &params, &mut ctx).await.unwrap();
    let unit = compose(&spec).unwrap();

    let pod = unit.deployment.spec.unwrap().template.spec.unwrap();
    let env = pod.containers[0].env.as_ref().unwrap();
    assert!(env.iter().any(|e| e.name == "PGHOST" && e.value.as_deref() == Some("db.internal")));

    let secret = unit.env_secret.expect("secret env from context");
    let data = secret.string_data.unwrap();
    assert_eq!(data.get("PGPASSWORD").unwrap(), "generated");
    // Secret values never appear inline in the pod spec
    assert!(!env.iter().any(|e| e.name == "PGPASSWORD"));
}
