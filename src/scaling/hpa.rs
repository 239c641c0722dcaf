//! # Horizontal Autoscaling
//!
//! Policy validation and HorizontalPodAutoscaler (autoscaling/v2)
//! construction.
//!
//! The emitted behavior block is deliberately asymmetric: scale-up reacts
//! within a minute, scale-down is damped over five. Transient
//! over-provisioning is preferred over replica flapping.

use crate::container::spec::DeploymentUnitSpec;
use crate::descriptor::{ContainerSpec, ScalePolicySpec};
use crate::errors::{ProvisionError, Result};
use crate::naming::suffix;
use k8s_openapi::api::autoscaling::v2::{
    CrossVersionObjectReference, HPAScalingPolicy, HPAScalingRules, HorizontalPodAutoscaler,
    HorizontalPodAutoscalerBehavior, HorizontalPodAutoscalerSpec, MetricSpec, MetricTarget,
    ResourceMetricSource,
};
use kube::api::ObjectMeta;

/// Scale-up stabilization window in seconds.
const SCALE_UP_STABILIZATION_SECS: i32 = 60;
/// Scale-down stabilization window in seconds.
const SCALE_DOWN_STABILIZATION_SECS: i32 = 300;

/// Validate a scaling policy against the containers it will scale.
///
/// Rules are checked in order; the first violation wins. A missing or
/// disabled policy is always valid.
pub fn validate_scaling_policy(
    policy: Option<&ScalePolicySpec>,
    containers: &[ContainerSpec],
) -> Result<()> {
    let Some(policy) = policy else {
        return Ok(());
    };
    if !policy.enabled {
        return Ok(());
    }

    if policy.min_replicas <= 0 {
        return Err(ProvisionError::config(format!(
            "minReplicas must be positive, got {}",
            policy.min_replicas
        )));
    }
    if policy.max_replicas <= policy.min_replicas {
        return Err(ProvisionError::config(format!(
            "maxReplicas ({}) must be strictly greater than minReplicas ({})",
            policy.max_replicas, policy.min_replicas
        )));
    }

    for (metric, target) in [
        ("cpu", policy.cpu_target_percent),
        ("memory", policy.memory_target_percent),
    ] {
        let Some(target) = target else { continue };
        if !(1..=100).contains(&target) {
            return Err(ProvisionError::config(format!(
                "{metric} target must be within 1-100 percent, got {target}"
            )));
        }
        // Utilization is computed against requests; scaling on a metric
        // with no baseline request is meaningless.
        for container in containers {
            let has_request = container
                .resources
                .as_ref()
                .is_some_and(|r| r.requests.contains_key(metric));
            if !has_request {
                return Err(ProvisionError::config(format!(
                    "container '{}' declares no {metric} request; cannot scale on a metric \
                     with no baseline request",
                    container.name
                )));
            }
        }
    }

    if policy.cpu_target_percent.is_none() && policy.memory_target_percent.is_none() {
        return Err(ProvisionError::config(
            "scaling policy sets no target metric; at least one of cpu or memory is required",
        ));
    }

    Ok(())
}

fn utilization_metric(name: &str, target: i32) -> MetricSpec {
    MetricSpec {
        type_: "Resource".to_string(),
        resource: Some(ResourceMetricSource {
            name: name.to_string(),
            target: MetricTarget {
                type_: "Utilization".to_string(),
                average_utilization: Some(target),
                ..Default::default()
            },
        }),
        ..Default::default()
    }
}

/// Build the HPA for a unit, or `None` when no enabled policy exists.
///
/// The HPA name uses the unit's base name, so a custom stack's autoscaler
/// never collides with its parent's.
#[must_use]
pub fn build_hpa(spec: &DeploymentUnitSpec) -> Option<HorizontalPodAutoscaler> {
    let policy = spec.scale.as_ref()?;
    if !policy.enabled {
        return None;
    }

    let mut metrics = Vec::new();
    if let Some(cpu) = policy.cpu_target_percent {
        metrics.push(utilization_metric("cpu", cpu));
    }
    if let Some(memory) = policy.memory_target_percent {
        metrics.push(utilization_metric("memory", memory));
    }

    let behavior = HorizontalPodAutoscalerBehavior {
        scale_up: Some(HPAScalingRules {
            stabilization_window_seconds: Some(SCALE_UP_STABILIZATION_SECS),
            // Min select: the more conservative of 50% or 2 pods per minute
            select_policy: Some("Min".to_string()),
            policies: Some(vec![
                HPAScalingPolicy {
                    type_: "Percent".to_string(),
                    value: 50,
                    period_seconds: 60,
                },
                HPAScalingPolicy {
                    type_: "Pods".to_string(),
                    value: 2,
                    period_seconds: 60,
                },
            ]),
            ..Default::default()
        }),
        scale_down: Some(HPAScalingRules {
            stabilization_window_seconds: Some(SCALE_DOWN_STABILIZATION_SECS),
            policies: Some(vec![HPAScalingPolicy {
                type_: "Percent".to_string(),
                value: 10,
                period_seconds: 60,
            }]),
            ..Default::default()
        }),
    };

    Some(HorizontalPodAutoscaler {
        metadata: ObjectMeta {
            name: Some(spec.resource_name(suffix::HPA)),
            namespace: Some(spec.namespace.clone()),
            labels: Some(spec.labels()),
            ..Default::default()
        },
        spec: Some(HorizontalPodAutoscalerSpec {
            scale_target_ref: CrossVersionObjectReference {
                api_version: Some("apps/v1".to_string()),
                kind: "Deployment".to_string(),
                name: spec.deployment_name.clone(),
            },
            min_replicas: Some(policy.min_replicas),
            max_replicas: policy.max_replicas,
            metrics: Some(metrics),
            behavior: Some(behavior),
        }),
        status: None,
    })
}
