//! # Shared-Resource Compute Processors
//!
//! A compute processor binds a consuming stack to a shared infrastructure
//! resource operated in the parent environment (Postgres, Redis, MongoDB,
//! RabbitMQ). Given the parent stack's exported connection coordinates it
//! provisions per-consumer credentials through a one-shot init Job and
//! registers derived environment variables and template extensions into the
//! [`ComputeContext`](crate::context::ComputeContext).
//!
//! Processors are looked up by resource-type string in an explicitly
//! constructed registry that is built once at startup and passed into the
//! orchestration entry point.

pub mod credentials;
pub mod job;
pub mod mongo;
pub mod postgres;
pub mod rabbitmq;
pub mod redis;

use crate::config::ProvisionParams;
use crate::context::ComputeContext;
use crate::descriptor::DependencySpec;
use crate::errors::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Input to one processor invocation: one shared-resource instance bound to
/// one consuming stack.
#[derive(Debug)]
pub struct ComputeInput<'a> {
    /// Resource instance name, as exported by the parent stack.
    pub resource_name: &'a str,
    /// Whether the consumer declared `uses` for this resource.
    pub declared_use: bool,
    /// `dependsOn` declarations targeting this resource.
    pub dependencies: &'a [DependencySpec],
    /// The run's provisioning parameters (consumer stack name, parent
    /// stack exports).
    pub params: &'a ProvisionParams,
}

/// One shared-resource binding strategy.
#[async_trait]
pub trait ComputeProcessor: Send + Sync {
    /// Resource-type string this processor handles, e.g. `postgres`.
    fn resource_type(&self) -> &'static str;

    /// Bind the consumer to the resource instance: derive credentials,
    /// register init Jobs as pre-processors, and write env variables and
    /// template extensions into the context.
    async fn process(&self, input: &ComputeInput<'_>, ctx: &mut ComputeContext) -> Result<()>;
}

/// Explicit processor registry, keyed by resource type.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: BTreeMap<&'static str, Arc<dyn ComputeProcessor>>,
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("types", &self.processors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ProcessorRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with all built-in processors.
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(postgres::PostgresProcessor));
        registry.register(Arc::new(redis::RedisProcessor));
        registry.register(Arc::new(mongo::MongoProcessor));
        registry.register(Arc::new(rabbitmq::RabbitmqProcessor));
        registry
    }

    /// Register a processor, replacing any previous one for the same type.
    pub fn register(&mut self, processor: Arc<dyn ComputeProcessor>) {
        self.processors.insert(processor.resource_type(), processor);
    }

    /// Look up the processor for a resource type.
    #[must_use]
    pub fn get(&self, resource_type: &str) -> Option<Arc<dyn ComputeProcessor>> {
        self.processors.get(resource_type).map(Arc::clone)
    }

    /// Registered resource types, sorted.
    #[must_use]
    pub fn resource_types(&self) -> Vec<&'static str> {
        self.processors.keys().copied().collect()
    }
}
