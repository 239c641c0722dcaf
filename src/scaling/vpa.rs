//! # Vertical Autoscaling
//!
//! VerticalPodAutoscaler construction. The VPA is a CRD, not a built-in
//! type, so the typed policy is the primary representation and the untyped
//! spec is produced only at the resource-graph boundary as a
//! [`DynamicObject`].

use crate::container::spec::DeploymentUnitSpec;
use crate::descriptor::VerticalScalePolicySpec;
use crate::errors::Result;
use crate::naming::suffix;
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use serde_json::json;

/// API coordinates of the VPA CRD.
#[must_use]
pub fn vpa_api_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk(
        "autoscaling.k8s.io",
        "v1",
        "VerticalPodAutoscaler",
    ))
}

/// Serialize the typed policy into the untyped VPA spec payload.
///
/// When an HPA also targets the deployment, `updateMode: "Off"` keeps the
/// VPA in recommendation-only mode; choosing that is operator policy, not
/// validated here.
#[must_use]
pub fn to_untyped_spec(
    policy: &VerticalScalePolicySpec,
    deployment_name: &str,
) -> serde_json::Value {
    let mut container_policy = serde_json::Map::new();
    container_policy.insert("containerName".to_string(), json!("*"));
    if !policy.min_allowed.is_empty() {
        container_policy.insert("minAllowed".to_string(), json!(policy.min_allowed));
    }
    if !policy.max_allowed.is_empty() {
        container_policy.insert("maxAllowed".to_string(), json!(policy.max_allowed));
    }
    if !policy.controlled_resources.is_empty() {
        container_policy.insert(
            "controlledResources".to_string(),
            json!(policy.controlled_resources),
        );
    }

    json!({
        "targetRef": {
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "name": deployment_name,
        },
        "updatePolicy": {
            "updateMode": policy.update_mode,
        },
        "resourcePolicy": {
            "containerPolicies": [serde_json::Value::Object(container_policy)],
        },
    })
}

/// Build the VPA object for a unit, or `None` when no enabled policy
/// exists. Named with the unit's base name like every sibling resource.
pub fn build_vpa(spec: &DeploymentUnitSpec) -> Result<Option<DynamicObject>> {
    let Some(policy) = spec.vertical_scale.as_ref() else {
        return Ok(None);
    };
    if !policy.enabled {
        return Ok(None);
    }

    let resource = vpa_api_resource();
    let mut obj = DynamicObject::new(&spec.resource_name(suffix::VPA), &resource)
        .within(&spec.namespace)
        .data(json!({ "spec": to_untyped_spec(policy, &spec.deployment_name) }));
    obj.metadata.labels = Some(spec.labels());
    Ok(Some(obj))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_untyped_spec_shape() {
        let policy = VerticalScalePolicySpec {
            enabled: true,
            update_mode: "Off".to_string(),
            min_allowed: BTreeMap::from([("cpu".to_string(), "50m".to_string())]),
            max_allowed: BTreeMap::from([("cpu".to_string(), "2".to_string())]),
            controlled_resources: vec!["cpu".to_string()],
        };
        let spec = to_untyped_spec(&policy, "api-staging-preview");
        assert_eq!(spec["targetRef"]["name"], "api-staging-preview");
        assert_eq!(spec["updatePolicy"]["updateMode"], "Off");
        let container_policy = &spec["resourcePolicy"]["containerPolicies"][0];
        assert_eq!(container_policy["containerName"], "*");
        assert_eq!(container_policy["minAllowed"]["cpu"], "50m");
        assert_eq!(container_policy["controlledResources"][0], "cpu");
    }

    #[test]
    fn test_empty_bounds_are_omitted() {
        let policy = VerticalScalePolicySpec {
            enabled: true,
            update_mode: "Auto".to_string(),
            min_allowed: BTreeMap::new(),
            max_allowed: BTreeMap::new(),
            controlled_resources: Vec::new(),
        };
        let spec = to_untyped_spec(&policy, "api");
        let container_policy = &spec["resourcePolicy"]["containerPolicies"][0];
        assert!(container_policy.get("minAllowed").is_none());
        assert!(container_policy.get("maxAllowed").is_none());
    }

    #[test]
    fn test_api_resource_plural() {
        let res = vpa_api_resource();
        assert_eq!(res.plural, "verticalpodautoscalers");
        assert_eq!(res.api_version, "autoscaling.k8s.io/v1");
    }
}
