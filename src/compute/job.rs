//! # Init Jobs
//!
//! One-shot Kubernetes Jobs that provision per-consumer credentials before
//! the consuming Deployment is created. Registered as compute-context
//! pre-processors, which is the ordering guarantee: pre-processors run
//! after the namespace exists and strictly before the Deployment.

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{Container, EnvVar, PodSpec, PodTemplateSpec};
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

/// Retries before the Job is marked failed.
const BACKOFF_LIMIT: i32 = 3;

/// Finished Jobs are garbage-collected after this many seconds.
const TTL_AFTER_FINISHED: i32 = 600;

/// Parameters for a credential-provisioning init Job.
#[derive(Debug, Clone)]
pub struct InitJobSpec {
    /// Job name, unit-scoped and salted with a credential fingerprint.
    pub name: String,
    /// Container image carrying the client tooling (psql, mongosh, ...).
    pub image: String,
    /// Command executed once to completion.
    pub command: Vec<String>,
    /// Environment for the command; credential material rides here.
    pub env: Vec<(String, String)>,
    /// Labels stamped on the Job and its pods.
    pub labels: BTreeMap<String, String>,
}

/// Build the Job object. Pure construction; applying it is the
/// pre-processor's business.
#[must_use]
pub fn build_init_job(namespace: &str, spec: &InitJobSpec) -> Job {
    let env: Vec<EnvVar> = spec
        .env
        .iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: Some(value.clone()),
            ..Default::default()
        })
        .collect();

    Job {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(spec.labels.clone()),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(BACKOFF_LIMIT),
            ttl_seconds_after_finished: Some(TTL_AFTER_FINISHED),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(spec.labels.clone()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    containers: vec![Container {
                        name: "provision".to_string(),
                        image: Some(spec.image.clone()),
                        command: Some(spec.command.clone()),
                        env: Some(env),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> InitJobSpec {
        InitJobSpec {
            name: "api-main-db-user-init-abc123".to_string(),
            image: "postgres:16".to_string(),
            command: vec!["psql".to_string(), "-c".to_string(), "SELECT 1".to_string()],
            env: vec![("PGPASSWORD".to_string(), "root-pw".to_string())],
            labels: BTreeMap::from([(
                "app.kubernetes.io/managed-by".to_string(),
                "stack-deployer".to_string(),
            )]),
        }
    }

    #[test]
    fn test_job_is_one_shot() {
        let job = build_init_job("staging", &sample());
        let spec = job.spec.unwrap();
        assert_eq!(spec.backoff_limit, Some(3));
        assert_eq!(spec.ttl_seconds_after_finished, Some(600));
        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
        assert_eq!(pod.containers.len(), 1);
    }

    #[test]
    fn test_job_carries_env_and_namespace() {
        let job = build_init_job("staging", &sample());
        assert_eq!(job.metadata.namespace.as_deref(), Some("staging"));
        let container = &job.spec.unwrap().template.spec.unwrap().containers[0];
        let env = container.env.as_ref().unwrap();
        assert_eq!(env[0].name, "PGPASSWORD");
        assert_eq!(env[0].value.as_deref(), Some("root-pw"));
    }
}
