//! # Volumes and Secret Material
//!
//! ConfigMap/Secret-backed text volumes, persistent volume claims, the
//! aggregated env Secret and the image-pull credential Secret.

use crate::container::spec::DeploymentUnitSpec;
use crate::errors::Result;
use crate::naming::suffix;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeClaimVolumeSource, Secret, SecretVolumeSource, Volume, VolumeMount,
    VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

fn meta(spec: &DeploymentUnitSpec, name: String) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: Some(spec.namespace.clone()),
        labels: Some(spec.labels()),
        ..Default::default()
    }
}

/// ConfigMap carrying plain text volumes, or `None` when there are none.
#[must_use]
pub fn build_config_volumes(spec: &DeploymentUnitSpec) -> Option<ConfigMap> {
    if spec.text_volumes.is_empty() {
        return None;
    }
    let data: BTreeMap<String, String> = spec
        .text_volumes
        .iter()
        .map(|v| (v.name.clone(), v.content.clone()))
        .collect();
    Some(ConfigMap {
        metadata: meta(spec, spec.resource_name(suffix::CFG_VOLUMES)),
        data: Some(data),
        ..Default::default()
    })
}

/// Secret carrying secret text volumes, or `None` when there are none.
#[must_use]
pub fn build_secret_volumes(spec: &DeploymentUnitSpec) -> Option<Secret> {
    if spec.secret_text_volumes.is_empty() {
        return None;
    }
    let data: BTreeMap<String, String> = spec
        .secret_text_volumes
        .iter()
        .map(|v| (v.name.clone(), v.content.clone()))
        .collect();
    Some(Secret {
        metadata: meta(spec, spec.resource_name(suffix::SECRET_VOLUMES)),
        string_data: Some(data),
        ..Default::default()
    })
}

/// The unit's aggregated env Secret: every secret env variable of the
/// deployment in one object, consumed via `envFrom`.
#[must_use]
pub fn build_env_secret(spec: &DeploymentUnitSpec) -> Option<Secret> {
    if spec.secret_env.is_empty() {
        return None;
    }
    let data: BTreeMap<String, String> = spec.secret_env.iter().cloned().collect();
    Some(Secret {
        metadata: meta(spec, spec.resource_name(suffix::SECRETS)),
        string_data: Some(data),
        ..Default::default()
    })
}

/// dockerconfigjson Secret for the image-pull credential.
pub fn build_docker_config_secret(spec: &DeploymentUnitSpec) -> Result<Option<Secret>> {
    let Some(credential) = spec.image_pull_credential.as_ref() else {
        return Ok(None);
    };
    let auth = BASE64.encode(format!("{}:{}", credential.username, credential.password));
    let mut auths = serde_json::Map::new();
    auths.insert(
        credential.registry.clone(),
        serde_json::json!({
            "username": credential.username,
            "password": credential.password,
            "auth": auth,
        }),
    );
    let docker_config = serde_json::json!({ "auths": auths });
    Ok(Some(Secret {
        metadata: meta(spec, spec.resource_name(suffix::DOCKER_CONFIG)),
        type_: Some("kubernetes.io/dockerconfigjson".to_string()),
        string_data: Some(BTreeMap::from([(
            ".dockerconfigjson".to_string(),
            serde_json::to_string(&docker_config)?,
        )])),
        ..Default::default()
    }))
}

/// One PVC per declared persistent volume. An unset storage class falls
/// back to the cluster default instead of erroring.
#[must_use]
pub fn build_pvcs(spec: &DeploymentUnitSpec) -> Vec<PersistentVolumeClaim> {
    spec.persistent_volumes
        .iter()
        .map(|pv| PersistentVolumeClaim {
            metadata: meta(spec, format!("{}-{}", spec.deployment_name, pv.name)),
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                storage_class_name: pv.storage_class.clone(),
                resources: Some(VolumeResourceRequirements {
                    requests: Some(BTreeMap::from([(
                        "storage".to_string(),
                        Quantity(pv.size.clone()),
                    )])),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            status: None,
        })
        .collect()
}

/// Pod volumes and their mounts: text volumes are projected per file via
/// `subPath`, persistent volumes mount whole.
#[must_use]
pub fn pod_volumes_and_mounts(spec: &DeploymentUnitSpec) -> (Vec<Volume>, Vec<VolumeMount>) {
    let mut volumes = Vec::new();
    let mut mounts = Vec::new();

    if !spec.text_volumes.is_empty() {
        let volume_name = spec.resource_name(suffix::CFG_VOLUMES);
        volumes.push(Volume {
            name: volume_name.clone(),
            config_map: Some(ConfigMapVolumeSource {
                name: volume_name.clone(),
                ..Default::default()
            }),
            ..Default::default()
        });
        for file in &spec.text_volumes {
            mounts.push(VolumeMount {
                name: volume_name.clone(),
                mount_path: file.mount_path.clone(),
                sub_path: Some(file.name.clone()),
                read_only: Some(true),
                ..Default::default()
            });
        }
    }

    if !spec.secret_text_volumes.is_empty() {
        let volume_name = spec.resource_name(suffix::SECRET_VOLUMES);
        volumes.push(Volume {
            name: volume_name.clone(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(volume_name.clone()),
                ..Default::default()
            }),
            ..Default::default()
        });
        for file in &spec.secret_text_volumes {
            mounts.push(VolumeMount {
                name: volume_name.clone(),
                mount_path: file.mount_path.clone(),
                sub_path: Some(file.name.clone()),
                read_only: Some(true),
                ..Default::default()
            });
        }
    }

    for pv in &spec.persistent_volumes {
        let claim_name = format!("{}-{}", spec.deployment_name, pv.name);
        volumes.push(Volume {
            name: pv.name.clone(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name,
                ..Default::default()
            }),
            ..Default::default()
        });
        mounts.push(VolumeMount {
            name: pv.name.clone(),
            mount_path: pv.mount_path.clone(),
            ..Default::default()
        });
    }

    (volumes, mounts)
}
