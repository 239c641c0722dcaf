//! # Pod Disruption Budget

use crate::container::spec::DeploymentUnitSpec;
use crate::naming::suffix;
use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;

/// Build the unit's PodDisruptionBudget, or `None` when none was
/// requested.
#[must_use]
pub fn build_pdb(spec: &DeploymentUnitSpec) -> Option<PodDisruptionBudget> {
    let pdb = spec.pod_disruption_budget.as_ref()?;
    Some(PodDisruptionBudget {
        metadata: ObjectMeta {
            name: Some(spec.resource_name(suffix::PDB)),
            namespace: Some(spec.namespace.clone()),
            labels: Some(spec.labels()),
            ..Default::default()
        },
        spec: Some(PodDisruptionBudgetSpec {
            min_available: pdb.min_available.map(IntOrString::Int),
            max_unavailable: pdb.max_unavailable.map(IntOrString::Int),
            selector: Some(LabelSelector {
                match_labels: Some(spec.selector_labels()),
                ..Default::default()
            }),
            ..Default::default()
        }),
        status: None,
    })
}
