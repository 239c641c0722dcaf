//! # Proxy Reload Patch
//!
//! Forces the proxy Deployment's pods to roll (and the init-container scan
//! to re-run) by changing a single pod-template annotation to the latest
//! routing-state hash. The patch is a strategic merge scoped to the
//! annotations field only, so it never fights other controllers over the
//! rest of the Deployment spec. Transient API errors are retried inside a
//! bounded budget; a missing Deployment is a distinct error and is not
//! retried.

use crate::caddy::CONFIG_HASH_ANNOTATION;
use crate::errors::{ProvisionError, Result};
use crate::kube::FIELD_MANAGER;
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use serde_json::json;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

/// Overall patch budget.
pub const PATCH_BUDGET: Duration = Duration::from_secs(30);

const RETRY_INTERVAL: Duration = Duration::from_secs(1);

fn annotation_patch(config_hash: &str) -> serde_json::Value {
    json!({
        "spec": {
            "template": {
                "metadata": {
                    "annotations": {
                        CONFIG_HASH_ANNOTATION: config_hash,
                    }
                }
            }
        }
    })
}

/// Patch the proxy Deployment's pod-template annotation to `config_hash`,
/// triggering a rolling restart and a fresh routing scan.
pub async fn patch_deployment(
    client: Client,
    namespace: &str,
    name: &str,
    config_hash: &str,
) -> Result<()> {
    let api: Api<Deployment> = Api::namespaced(client, namespace);
    let patch = annotation_patch(config_hash);
    let params = PatchParams::apply(FIELD_MANAGER);

    let attempt_loop = async {
        let started = Instant::now();
        loop {
            match api.patch(name, &params, &Patch::Merge(&patch)).await {
                Ok(_) => {
                    info!(
                        deployment = name,
                        namespace,
                        hash = config_hash,
                        "proxy reload patch applied"
                    );
                    return Ok(());
                }
                Err(kube::Error::Api(ae)) if ae.code == 404 => {
                    // No proxy to reload is not a transient condition.
                    return Err(ProvisionError::NotFound {
                        what: format!("proxy deployment {namespace}/{name}"),
                    });
                }
                Err(err) => {
                    debug!(
                        deployment = name,
                        namespace,
                        elapsed_secs = started.elapsed().as_secs(),
                        error = %err,
                        "transient error patching proxy deployment, retrying"
                    );
                    sleep(RETRY_INTERVAL).await;
                }
            }
        }
    };

    match timeout(PATCH_BUDGET, attempt_loop).await {
        Ok(result) => result,
        Err(_) => {
            warn!(deployment = name, namespace, "proxy reload patch timed out");
            Err(ProvisionError::Patch(format!(
                "patching {namespace}/{name} did not succeed within {}s",
                PATCH_BUDGET.as_secs()
            )))
        }
    }
}
