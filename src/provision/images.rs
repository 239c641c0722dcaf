//! # Image Resolution
//!
//! Interface to the external image-build layer. The orchestrator hands
//! over every container's image reference and injects the resolved
//! (digested or retagged) references back into the pod spec.

use async_trait::async_trait;

/// External image-resolution boundary.
#[async_trait]
pub trait ImageResolver: Send + Sync {
    /// Resolve a container's image reference.
    async fn resolve(&self, container_name: &str, image: &str) -> anyhow::Result<String>;
}

/// Resolver that uses descriptor references as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughResolver;

#[async_trait]
impl ImageResolver for PassthroughResolver {
    async fn resolve(&self, _container_name: &str, image: &str) -> anyhow::Result<String> {
        Ok(image.to_string())
    }
}
