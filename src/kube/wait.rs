//! # Bounded Polling
//!
//! Waiting for cluster-side effects that another controller produces, e.g.
//! an operator-created credentials Secret. Polls at a fixed interval inside
//! a hard budget; running out of budget is a timeout error, clearly distinct
//! from the object simply not existing yet on an individual poll.

use crate::errors::{ProvisionError, Result};
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Poll interval between existence checks.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default overall wait budget.
pub const DEFAULT_WAIT_BUDGET: Duration = Duration::from_secs(30);

/// Wait for a Secret to materialize in a namespace.
///
/// Transient API errors count as "not there yet" and are retried within the
/// budget. Exceeding the budget yields [`ProvisionError::WaitTimeout`].
/// Cancelling the ambient task (dropping the future) stops polling
/// immediately.
pub async fn wait_for_secret(
    client: Client,
    namespace: &str,
    name: &str,
    budget: Duration,
) -> Result<Secret> {
    let api: Api<Secret> = Api::namespaced(client, namespace);
    let started = Instant::now();

    loop {
        match api.get_opt(name).await {
            Ok(Some(secret)) => return Ok(secret),
            Ok(None) => {
                debug!(secret = name, namespace, "secret not present yet");
            }
            Err(err) => {
                debug!(secret = name, namespace, error = %err, "transient error polling secret");
            }
        }

        if started.elapsed() >= budget {
            return Err(ProvisionError::WaitTimeout {
                what: format!("secret {namespace}/{name}"),
                waited_secs: budget.as_secs(),
            });
        }
        sleep(POLL_INTERVAL).await;
    }
}
