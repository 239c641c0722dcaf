//! # RabbitMQ Binding
//!
//! Binds a consuming stack to a shared RabbitMQ cluster (run by the
//! RabbitMQ cluster operator in the parent environment). A per-consumer
//! user and vhost are provisioned through a one-shot rabbitmqadmin Job.
//! The operator publishes broker credentials asynchronously, so the
//! pre-processor first waits (bounded) for the operator-created
//! default-user Secret before creating the Job.

use crate::compute::credentials::{consumer_username, credential_fingerprint, generate_password};
use crate::compute::job::{build_init_job, InitJobSpec};
use crate::compute::{ComputeInput, ComputeProcessor};
use crate::config::{export_field, export_key};
use crate::context::ComputeContext;
use crate::errors::{ProvisionError, Result};
use crate::kube::{wait_for_secret, Applier};
use crate::kube::wait::DEFAULT_WAIT_BUDGET;
use crate::labels::standard_labels;
use crate::naming::derive_base_name;
use anyhow::Context as _;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::info;

const RESOURCE_TYPE: &str = "rabbitmq";
const DEFAULT_PORT: &str = "5672";
const DEFAULT_MANAGEMENT_PORT: &str = "15672";
const CLIENT_IMAGE: &str = "rabbitmq:3-management";

/// Shared RabbitMQ compute processor.
#[derive(Debug, Clone, Copy, Default)]
pub struct RabbitmqProcessor;

/// AMQP URI with embedded credentials, scoped to the consumer's vhost.
#[must_use]
pub fn amqp_uri(user: &str, password: &str, host: &str, port: &str, vhost: &str) -> String {
    format!("amqp://{user}:{password}@{host}:{port}/{vhost}")
}

/// Provisioning script: declare vhost, upsert user, grant permissions.
/// rabbitmqadmin calls are idempotent, re-declaring converges.
#[must_use]
pub fn user_provision_commands(user: &str, password: &str, vhost: &str) -> String {
    format!(
        "rabbitmqadmin --host \"$RABBITMQ_HOST\" --username \"$RABBITMQ_ADMIN_USER\" --password \"$RABBITMQ_ADMIN_PASSWORD\" declare vhost name={vhost} && \
rabbitmqadmin --host \"$RABBITMQ_HOST\" --username \"$RABBITMQ_ADMIN_USER\" --password \"$RABBITMQ_ADMIN_PASSWORD\" declare user name={user} password={password} tags= && \
rabbitmqadmin --host \"$RABBITMQ_HOST\" --username \"$RABBITMQ_ADMIN_USER\" --password \"$RABBITMQ_ADMIN_PASSWORD\" declare permission vhost={vhost} user={user} configure=.* write=.* read=.*"
    )
}

#[async_trait]
impl ComputeProcessor for RabbitmqProcessor {
    fn resource_type(&self) -> &'static str {
        RESOURCE_TYPE
    }

    async fn process(&self, input: &ComputeInput<'_>, ctx: &mut ComputeContext) -> Result<()> {
        if !input.declared_use {
            return Err(ProvisionError::config(format!(
                "rabbitmq resource '{}' must be declared as used by stack '{}'",
                input.resource_name, input.params.stack_name
            )));
        }

        let parent = input.params.require_parent_stack()?;
        let params = input.params;
        let res = input.resource_name.to_string();
        let host = parent.require_output(&export_key(&res, None, export_field::HOST))?;
        let admin_user = parent.require_output(&export_key(&res, None, export_field::ROOT_USER))?;
        let admin_password =
            parent.require_output(&export_key(&res, None, export_field::ROOT_PASSWORD))?;
        let port = parent
            .outputs
            .get(&export_key(&res, None, export_field::PORT))
            .unwrap_or(DEFAULT_PORT)
            .to_string();

        let stack = params.stack_name.clone();
        let user = consumer_username(&stack);
        let vhost = user.clone();
        let password = generate_password();

        let base = derive_base_name(&stack, &params.environment, params.parent_env_or_empty());
        let fingerprint = credential_fingerprint(&[user.as_str(), vhost.as_str(), password.as_str()]);
        let job_spec = InitJobSpec {
            name: format!("{base}-{res}-user-init-{fingerprint}"),
            image: CLIENT_IMAGE.to_string(),
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                user_provision_commands(&user, &password, &vhost),
            ],
            env: vec![
                ("RABBITMQ_HOST".to_string(), host.clone()),
                ("RABBITMQ_ADMIN_USER".to_string(), admin_user.clone()),
                ("RABBITMQ_ADMIN_PASSWORD".to_string(), admin_password.clone()),
            ],
            labels: standard_labels(&stack, &params.environment, params.parent_env_or_empty()),
        };
        let namespace = crate::naming::sanitize_identifier(&params.environment);
        let job = build_init_job(&namespace, &job_spec);
        let job_name = job_spec.name.clone();
        // The operator publishes this Secret once the broker is up; its
        // presence is the readiness signal for admin operations.
        let operator_secret = format!("{res}-default-user");
        let marker = format!("rabbitmq:{res}:{user}");
        ctx.add_pre_processor(
            &marker,
            Box::new(move |hook_ctx| {
                Box::pin(async move {
                    wait_for_secret(
                        hook_ctx.client.clone(),
                        &hook_ctx.namespace,
                        &operator_secret,
                        DEFAULT_WAIT_BUDGET,
                    )
                    .await
                    .with_context(|| {
                        format!("waiting for rabbitmq operator secret {operator_secret}")
                    })?;
                    info!(job = %job_name, "provisioning rabbitmq user via init job");
                    Applier::new(hook_ctx.client)
                        .apply_namespaced(&hook_ctx.namespace, &job)
                        .await
                        .with_context(|| format!("creating rabbitmq init job {job_name}"))?;
                    Ok(())
                })
            }),
        );

        for (name, value) in [
            ("RABBITMQ_HOST", host.as_str()),
            ("RABBITMQ_PORT", port.as_str()),
            ("RABBITMQ_USER", user.as_str()),
            ("RABBITMQ_VHOST", vhost.as_str()),
        ] {
            ctx.add_env_var_if_not_exist(name, value, RESOURCE_TYPE, &res, &stack);
        }

        let writer = ctx.env_writer();
        let uri = amqp_uri(&user, &password, &host, &port, &vhost);
        let (deferred_res, deferred_stack) = (res.clone(), stack.clone());
        let deferred_password = password.clone();
        ctx.add_output(Box::pin(async move {
            writer.add_secret_env_var_if_not_exist(
                "RABBITMQ_PASSWORD",
                &deferred_password,
                RESOURCE_TYPE,
                &deferred_res,
                &deferred_stack,
            );
            writer.add_secret_env_var_if_not_exist(
                "AMQP_URI",
                &uri,
                RESOURCE_TYPE,
                &deferred_res,
                &deferred_stack,
            );
            Ok(())
        }));

        ctx.add_resource_tpl_extension(
            &res,
            BTreeMap::from([
                ("host".to_string(), host.clone()),
                ("port".to_string(), port.clone()),
                ("user".to_string(), user.clone()),
                ("password".to_string(), password.clone()),
                ("vhost".to_string(), vhost.clone()),
                (
                    "uri".to_string(),
                    amqp_uri(&user, &password, &host, &port, &vhost),
                ),
                (
                    "managementUrl".to_string(),
                    format!("http://{host}:{DEFAULT_MANAGEMENT_PORT}"),
                ),
            ]),
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amqp_uri() {
        assert_eq!(
            amqp_uri("u", "p", "mq", "5672", "billing"),
            "amqp://u:p@mq:5672/billing"
        );
    }

    #[test]
    fn test_provision_commands_cover_vhost_user_permission() {
        let cmds = user_provision_commands("u", "p", "v");
        assert!(cmds.contains("declare vhost name=v"));
        assert!(cmds.contains("declare user name=u"));
        assert!(cmds.contains("declare permission vhost=v user=u"));
    }
}
