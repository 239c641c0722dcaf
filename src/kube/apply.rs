//! # Server-Side Apply
//!
//! All generated objects go through one applier with one field manager, so
//! repeated provisioning runs converge instead of conflicting and other
//! controllers' fields are left alone.

use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, Patch, PatchParams};
use kube::core::{ApiResource, DynamicObject};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use tracing::debug;

/// Field manager recorded on every object this tool applies.
pub const FIELD_MANAGER: &str = "stack-deployer";

/// Applies generated manifests with server-side apply.
#[derive(Clone)]
pub struct Applier {
    client: Client,
}

impl Debug for Applier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Applier").finish_non_exhaustive()
    }
}

impl Applier {
    /// Wrap a client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// The underlying client, for call sites that need raw API access.
    #[must_use]
    pub fn client(&self) -> Client {
        self.client.clone()
    }

    fn params() -> PatchParams {
        PatchParams::apply(FIELD_MANAGER).force()
    }

    /// Apply a namespaced object.
    pub async fn apply_namespaced<K>(&self, namespace: &str, obj: &K) -> Result<K, kube::Error>
    where
        K: Resource<Scope = NamespaceResourceScope> + Serialize + DeserializeOwned + Clone + Debug,
        K::DynamicType: Default,
    {
        let name = obj
            .meta()
            .name
            .clone()
            .unwrap_or_else(|| "unnamed".to_string());
        debug!(kind = %K::kind(&K::DynamicType::default()), name, namespace, "applying object");
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.patch(&name, &Self::params(), &Patch::Apply(obj)).await
    }

    /// Apply a cluster-scoped object.
    pub async fn apply_cluster<K>(&self, obj: &K) -> Result<K, kube::Error>
    where
        K: Resource + Serialize + DeserializeOwned + Clone + Debug,
        K::DynamicType: Default,
    {
        let name = obj
            .meta()
            .name
            .clone()
            .unwrap_or_else(|| "unnamed".to_string());
        debug!(kind = %K::kind(&K::DynamicType::default()), name, "applying cluster object");
        let api: Api<K> = Api::all(self.client.clone());
        api.patch(&name, &Self::params(), &Patch::Apply(obj)).await
    }

    /// Apply a dynamic object (CRD instances such as the VPA) against an
    /// explicit API resource description.
    pub async fn apply_dynamic(
        &self,
        namespace: &str,
        resource: &ApiResource,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, kube::Error> {
        let name = obj
            .metadata
            .name
            .clone()
            .unwrap_or_else(|| "unnamed".to_string());
        debug!(kind = %resource.kind, name, namespace, "applying dynamic object");
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, resource);
        api.patch(&name, &Self::params(), &Patch::Apply(obj)).await
    }
}
