//! # MongoDB Binding
//!
//! Binds a consuming stack to a shared MongoDB instance: a per-consumer
//! user and database named after the consuming stack, provisioned through
//! a one-shot mongosh Job. `uses` is mandatory; MongoDB has no dependsOn
//! mode. The template extension additionally exposes the oplog URI for
//! change-stream consumers.

use crate::compute::credentials::{consumer_username, credential_fingerprint, generate_password};
use crate::compute::job::{build_init_job, InitJobSpec};
use crate::compute::{ComputeInput, ComputeProcessor};
use crate::config::{export_field, export_key};
use crate::context::ComputeContext;
use crate::errors::{ProvisionError, Result};
use crate::kube::Applier;
use crate::labels::standard_labels;
use crate::naming::derive_base_name;
use anyhow::Context as _;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::info;

const RESOURCE_TYPE: &str = "mongodb";
const DEFAULT_PORT: &str = "27017";
const CLIENT_IMAGE: &str = "mongo:7";

/// Shared MongoDB compute processor.
#[derive(Debug, Clone, Copy, Default)]
pub struct MongoProcessor;

/// Idempotent user provisioning script: `updateUser` when present,
/// `createUser` otherwise.
#[must_use]
pub fn user_provision_script(user: &str, database: &str, password: &str) -> String {
    format!(
        r#"const db2 = db.getSiblingDB('{database}');
const existing = db2.getUser('{user}');
if (existing) {{
  db2.updateUser('{user}', {{ pwd: '{password}' }});
}} else {{
  db2.createUser({{ user: '{user}', pwd: '{password}', roles: [{{ role: 'readWrite', db: '{database}' }}] }});
}}"#
    )
}

/// Connection URI scoped to the consumer's database.
#[must_use]
pub fn connection_uri(user: &str, password: &str, host: &str, port: &str, database: &str) -> String {
    format!("mongodb://{user}:{password}@{host}:{port}/{database}?authSource={database}")
}

/// Oplog URI: root access against `local`, used by change-stream tailers.
#[must_use]
pub fn oplog_uri(root_user: &str, root_password: &str, host: &str, port: &str) -> String {
    format!("mongodb://{root_user}:{root_password}@{host}:{port}/local?authSource=admin")
}

#[async_trait]
impl ComputeProcessor for MongoProcessor {
    fn resource_type(&self) -> &'static str {
        RESOURCE_TYPE
    }

    async fn process(&self, input: &ComputeInput<'_>, ctx: &mut ComputeContext) -> Result<()> {
        if !input.declared_use {
            return Err(ProvisionError::config(format!(
                "mongodb resource '{}' must be declared as used by stack '{}'",
                input.resource_name, input.params.stack_name
            )));
        }

        let parent = input.params.require_parent_stack()?;
        let params = input.params;
        let res = input.resource_name.to_string();
        let host = parent.require_output(&export_key(&res, None, export_field::HOST))?;
        let root_user = parent.require_output(&export_key(&res, None, export_field::ROOT_USER))?;
        let root_password =
            parent.require_output(&export_key(&res, None, export_field::ROOT_PASSWORD))?;
        let port = parent
            .outputs
            .get(&export_key(&res, None, export_field::PORT))
            .unwrap_or(DEFAULT_PORT)
            .to_string();

        let stack = params.stack_name.clone();
        let user = consumer_username(&stack);
        let database = user.clone();
        let password = generate_password();

        let base = derive_base_name(&stack, &params.environment, params.parent_env_or_empty());
        let fingerprint = credential_fingerprint(&[user.as_str(), database.as_str(), password.as_str()]);
        let admin_uri = format!(
            "mongodb://{root_user}:{root_password}@{host}:{port}/admin?authSource=admin"
        );
        let job_spec = InitJobSpec {
            name: format!("{base}-{res}-user-init-{fingerprint}"),
            image: CLIENT_IMAGE.to_string(),
            command: vec![
                "mongosh".to_string(),
                admin_uri,
                "--eval".to_string(),
                user_provision_script(&user, &database, &password),
            ],
            env: Vec::new(),
            labels: standard_labels(&stack, &params.environment, params.parent_env_or_empty()),
        };
        let namespace = crate::naming::sanitize_identifier(&params.environment);
        let job = build_init_job(&namespace, &job_spec);
        let job_name = job_spec.name.clone();
        let marker = format!("mongodb:{res}:{user}");
        ctx.add_pre_processor(
            &marker,
            Box::new(move |hook_ctx| {
                Box::pin(async move {
                    info!(job = %job_name, "provisioning mongodb user via init job");
                    Applier::new(hook_ctx.client)
                        .apply_namespaced(&hook_ctx.namespace, &job)
                        .await
                        .with_context(|| format!("creating mongodb init job {job_name}"))?;
                    Ok(())
                })
            }),
        );

        for (name, value) in [
            ("MONGO_HOST", host.as_str()),
            ("MONGO_PORT", port.as_str()),
            ("MONGO_USER", user.as_str()),
            ("MONGO_DATABASE", database.as_str()),
        ] {
            ctx.add_env_var_if_not_exist(name, value, RESOURCE_TYPE, &res, &stack);
        }

        let writer = ctx.env_writer();
        let uri = connection_uri(&user, &password, &host, &port, &database);
        let (deferred_res, deferred_stack) = (res.clone(), stack.clone());
        let deferred_password = password.clone();
        ctx.add_output(Box::pin(async move {
            writer.add_secret_env_var_if_not_exist(
                "MONGO_PASSWORD",
                &deferred_password,
                RESOURCE_TYPE,
                &deferred_res,
                &deferred_stack,
            );
            writer.add_secret_env_var_if_not_exist(
                "MONGO_URI",
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
                ("database".to_string(), database.clone()),
                (
                    "uri".to_string(),
                    connection_uri(&user, &password, &host, &port, &database),
                ),
                (
                    "oplogUri".to_string(),
                    oplog_uri(&root_user, &root_password, &host, &port),
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
    fn test_provision_script_handles_both_branches() {
        let script = user_provision_script("billing", "billing", "pw");
        assert!(script.contains("updateUser"));
        assert!(script.contains("createUser"));
        assert!(script.contains("readWrite"));
    }

    #[test]
    fn test_uris() {
        assert_eq!(
            connection_uri("u", "p", "db", "27017", "billing"),
            "mongodb://u:p@db:27017/billing?authSource=billing"
        );
        assert_eq!(
            oplog_uri("root", "rp", "db", "27017"),
            "mongodb://root:rp@db:27017/local?authSource=admin"
        );
    }
}
