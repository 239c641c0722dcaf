//! # Redis Binding
//!
//! Injects connection coordinates for a shared Redis instance. Redis has
//! no per-consumer credential model here, so the binding is pure env-var
//! injection; `uses` must be declared since there is no other consumption
//! mode for this resource type.

use crate::compute::{ComputeInput, ComputeProcessor};
use crate::config::{export_field, export_key};
use crate::context::ComputeContext;
use crate::errors::{ProvisionError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;

const RESOURCE_TYPE: &str = "redis";
const DEFAULT_PORT: &str = "6379";

/// Shared Redis compute processor.
#[derive(Debug, Clone, Copy, Default)]
pub struct RedisProcessor;

/// Connection URL with embedded password.
#[must_use]
pub fn connection_url(password: &str, host: &str, port: &str) -> String {
    format!("redis://:{password}@{host}:{port}")
}

#[async_trait]
impl ComputeProcessor for RedisProcessor {
    fn resource_type(&self) -> &'static str {
        RESOURCE_TYPE
    }

    async fn process(&self, input: &ComputeInput<'_>, ctx: &mut ComputeContext) -> Result<()> {
        if !input.declared_use {
            return Err(ProvisionError::config(format!(
                "redis resource '{}' must be declared as used by stack '{}'",
                input.resource_name, input.params.stack_name
            )));
        }

        let parent = input.params.require_parent_stack()?;
        let res = input.resource_name;
        let host = parent.require_output(&export_key(res, None, export_field::HOST))?;
        let password = parent.require_output(&export_key(res, None, export_field::ROOT_PASSWORD))?;
        let port = parent
            .outputs
            .get(&export_key(res, None, export_field::PORT))
            .unwrap_or(DEFAULT_PORT)
            .to_string();

        let stack = input.params.stack_name.as_str();
        ctx.add_env_var_if_not_exist("REDIS_HOST", &host, RESOURCE_TYPE, res, stack);
        ctx.add_env_var_if_not_exist("REDIS_PORT", &port, RESOURCE_TYPE, res, stack);
        ctx.add_secret_env_var_if_not_exist("REDIS_PASSWORD", &password, RESOURCE_TYPE, res, stack);
        ctx.add_secret_env_var_if_not_exist(
            "REDIS_URL",
            &connection_url(&password, &host, &port),
            RESOURCE_TYPE,
            res,
            stack,
        );

        ctx.add_resource_tpl_extension(
            res,
            BTreeMap::from([
                ("host".to_string(), host.clone()),
                ("port".to_string(), port.clone()),
                ("password".to_string(), password.clone()),
                ("uri".to_string(), connection_url(&password, &host, &port)),
            ]),
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_url() {
        assert_eq!(
            connection_url("pw", "cache.internal", "6379"),
            "redis://:pw@cache.internal:6379"
        );
    }
}
