//! # Postgres Binding
//!
//! Binds a consuming stack to a shared Postgres instance operated in the
//! parent environment. Supports two consumption modes: a direct `uses`
//! binding (per-consumer role and database named after the consuming
//! stack) and `dependsOn` bindings against another consumer's database
//! (role `{consumer}--{dependency}` on the owner's database).

use crate::compute::credentials::{
    consumer_username, credential_fingerprint, dependency_username, generate_password,
};
use crate::compute::job::{build_init_job, InitJobSpec};
use crate::compute::{ComputeInput, ComputeProcessor};
use crate::config::{export_field, export_key};
use crate::context::ComputeContext;
use crate::errors::Result;
use crate::kube::Applier;
use crate::labels::standard_labels;
use crate::naming::derive_base_name;
use anyhow::Context as _;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::{debug, info};

const RESOURCE_TYPE: &str = "postgres";
const DEFAULT_PORT: &str = "5432";
const CLIENT_IMAGE: &str = "postgres:16-alpine";

/// Shared Postgres compute processor.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresProcessor;

/// Connection coordinates of the shared instance, read from the parent
/// stack's exports.
#[derive(Debug, Clone)]
struct RootAccess {
    host: String,
    port: String,
    root_user: String,
    root_password: String,
}

/// Idempotent role/database provisioning script. Re-runs converge: an
/// existing role gets its password rotated, an existing database is left
/// in place.
#[must_use]
pub fn user_provision_sql(user: &str, database: &str, password: &str) -> String {
    format!(
        r#"DO $$
BEGIN
  IF EXISTS (SELECT FROM pg_roles WHERE rolname = '{user}') THEN
    EXECUTE format('ALTER ROLE %I LOGIN PASSWORD %L', '{user}', '{password}');
  ELSE
    EXECUTE format('CREATE ROLE %I LOGIN PASSWORD %L', '{user}', '{password}');
  END IF;
END
$$;
SELECT 'CREATE DATABASE "{database}" OWNER "{user}"'
WHERE NOT EXISTS (SELECT FROM pg_database WHERE datname = '{database}')\gexec
GRANT ALL PRIVILEGES ON DATABASE "{database}" TO "{user}";"#
    )
}

/// Connection URI with embedded credentials. Secret material: never goes
/// into a plain env var.
#[must_use]
pub fn connection_uri(user: &str, password: &str, host: &str, port: &str, database: &str) -> String {
    format!("postgres://{user}:{password}@{host}:{port}/{database}")
}

impl PostgresProcessor {
    fn read_root_access(input: &ComputeInput<'_>) -> Result<RootAccess> {
        let parent = input.params.require_parent_stack()?;
        let res = input.resource_name;
        Ok(RootAccess {
            host: parent.require_output(&export_key(res, None, export_field::HOST))?,
            port: parent
                .outputs
                .get(&export_key(res, None, export_field::PORT))
                .unwrap_or(DEFAULT_PORT)
                .to_string(),
            root_user: parent.require_output(&export_key(res, None, export_field::ROOT_USER))?,
            root_password: parent
                .require_output(&export_key(res, None, export_field::ROOT_PASSWORD))?,
        })
    }

    fn register_user_job(
        &self,
        input: &ComputeInput<'_>,
        ctx: &mut ComputeContext,
        root: &RootAccess,
        user: &str,
        database: &str,
        password: &str,
    ) {
        let params = input.params;
        let base = derive_base_name(
            &params.stack_name,
            &params.environment,
            params.parent_env_or_empty(),
        );
        let fingerprint = credential_fingerprint(&[user, database, password]);
        let job_spec = InitJobSpec {
            name: format!("{base}-{}-user-init-{fingerprint}", input.resource_name),
            image: CLIENT_IMAGE.to_string(),
            command: vec![
                "psql".to_string(),
                "-v".to_string(),
                "ON_ERROR_STOP=1".to_string(),
                "-c".to_string(),
                user_provision_sql(user, database, password),
            ],
            env: vec![
                ("PGHOST".to_string(), root.host.clone()),
                ("PGPORT".to_string(), root.port.clone()),
                ("PGUSER".to_string(), root.root_user.clone()),
                ("PGPASSWORD".to_string(), root.root_password.clone()),
                ("PGDATABASE".to_string(), "postgres".to_string()),
            ],
            labels: standard_labels(
                &params.stack_name,
                &params.environment,
                params.parent_env_or_empty(),
            ),
        };
        let namespace = crate::naming::sanitize_identifier(&params.environment);
        let job = build_init_job(&namespace, &job_spec);
        let marker = format!("postgres:{}:{user}", input.resource_name);
        let job_name = job_spec.name.clone();

        ctx.add_pre_processor(
            &marker,
            Box::new(move |hook_ctx| {
                Box::pin(async move {
                    info!(job = %job_name, "provisioning postgres role via init job");
                    Applier::new(hook_ctx.client)
                        .apply_namespaced(&hook_ctx.namespace, &job)
                        .await
                        .with_context(|| format!("creating postgres init job {job_name}"))?;
                    Ok(())
                })
            }),
        );
    }
}

#[async_trait]
impl ComputeProcessor for PostgresProcessor {
    fn resource_type(&self) -> &'static str {
        RESOURCE_TYPE
    }

    async fn process(&self, input: &ComputeInput<'_>, ctx: &mut ComputeContext) -> Result<()> {
        if !input.declared_use && input.dependencies.is_empty() {
            debug!(
                resource = input.resource_name,
                "postgres instance neither used nor depended on, nothing to bind"
            );
            return Ok(());
        }

        let root = Self::read_root_access(input)?;
        let params = input.params;
        let res = input.resource_name.to_string();
        let stack = params.stack_name.clone();

        if input.declared_use {
            let user = consumer_username(&stack);
            let database = user.clone();
            let password = generate_password();
            self.register_user_job(input, ctx, &root, &user, &database, &password);

            for (name, value) in [
                ("PGHOST", root.host.as_str()),
                ("PGPORT", root.port.as_str()),
                ("PGUSER", user.as_str()),
                ("PGDATABASE", database.as_str()),
                ("POSTGRES_HOST", root.host.as_str()),
                ("POSTGRES_PORT", root.port.as_str()),
                ("POSTGRES_USER", user.as_str()),
                ("POSTGRES_DATABASE", database.as_str()),
            ] {
                ctx.add_env_var_if_not_exist(name, value, RESOURCE_TYPE, &res, &stack);
            }

            // Password-bearing values settle as a deferred output so every
            // reader observes either all of them or none.
            let writer = ctx.env_writer();
            let uri = connection_uri(&user, &password, &root.host, &root.port, &database);
            let (deferred_res, deferred_stack) = (res.clone(), stack.clone());
            let deferred_password = password.clone();
            ctx.add_output(Box::pin(async move {
                for (name, value) in [
                    ("PGPASSWORD", deferred_password.as_str()),
                    ("POSTGRES_PASSWORD", deferred_password.as_str()),
                    ("POSTGRES_URI", uri.as_str()),
                ] {
                    writer.add_secret_env_var_if_not_exist(
                        name,
                        value,
                        RESOURCE_TYPE,
                        &deferred_res,
                        &deferred_stack,
                    );
                }
                Ok(())
            }));

            ctx.add_resource_tpl_extension(
                &res,
                BTreeMap::from([
                    ("host".to_string(), root.host.clone()),
                    ("port".to_string(), root.port.clone()),
                    ("user".to_string(), user.clone()),
                    ("password".to_string(), password.clone()),
                    ("database".to_string(), database.clone()),
                    (
                        "uri".to_string(),
                        connection_uri(&user, &password, &root.host, &root.port, &database),
                    ),
                ]),
            );
        }

        for dep in input.dependencies {
            let user = dependency_username(&stack, &dep.name);
            let database = consumer_username(&dep.owner);
            let password = generate_password();
            self.register_user_job(input, ctx, &root, &user, &database, &password);

            ctx.add_dependency_tpl_extension(
                &dep.name,
                &res,
                BTreeMap::from([
                    ("host".to_string(), root.host.clone()),
                    ("port".to_string(), root.port.clone()),
                    ("user".to_string(), user.clone()),
                    ("password".to_string(), password.clone()),
                    ("database".to_string(), database.clone()),
                    (
                        "uri".to_string(),
                        connection_uri(&user, &password, &root.host, &root.port, &database),
                    ),
                ]),
            );
        }

        Ok(())
    }
}
