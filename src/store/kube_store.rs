//! [`ClusterStore`] backed by the Kubernetes API.

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::api::{DeleteParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::crd::{Redis, RedisStatus};
use crate::resources::{ManagedResource, ResourceKind};
use crate::store::{ClusterStore, FIELD_MANAGER, RedisKey, api_error};

/// Store that reads and writes through the API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        }
    }

    async fn create_typed<K>(&self, namespace: &str, obj: &K) -> Result<K, kube::Error>
    where
        K: Resource<Scope = NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Serialize
            + std::fmt::Debug,
        <K as Resource>::DynamicType: Default,
    {
        self.api::<K>(namespace)
            .create(&Self::post_params(), obj)
            .await
    }

    async fn replace_typed<K>(&self, namespace: &str, name: &str, obj: &K) -> Result<K, kube::Error>
    where
        K: Resource<Scope = NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Serialize
            + std::fmt::Debug,
        <K as Resource>::DynamicType: Default,
    {
        self.api::<K>(namespace)
            .replace(name, &Self::post_params(), obj)
            .await
    }

    async fn delete_typed<K>(&self, namespace: &str, name: &str) -> Result<(), kube::Error>
    where
        K: Resource<Scope = NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + std::fmt::Debug,
        <K as Resource>::DynamicType: Default,
    {
        match self
            .api::<K>(namespace)
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn namespace_of(resource: &ManagedResource) -> Result<&str, kube::Error> {
    resource.namespace().ok_or_else(|| {
        api_error(
            400,
            "BadRequest",
            format!("{} {} has no namespace", resource.kind(), resource.name()),
        )
    })
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn get_redis(&self, key: &RedisKey) -> Result<Option<Redis>, kube::Error> {
        self.api::<Redis>(&key.namespace).get_opt(&key.name).await
    }

    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ManagedResource>, kube::Error> {
        Ok(match kind {
            ResourceKind::Secret => self
                .api::<Secret>(namespace)
                .get_opt(name)
                .await?
                .map(ManagedResource::Secret),
            ResourceKind::Service => self
                .api::<Service>(namespace)
                .get_opt(name)
                .await?
                .map(ManagedResource::Service),
            ResourceKind::Deployment => self
                .api::<Deployment>(namespace)
                .get_opt(name)
                .await?
                .map(ManagedResource::Deployment),
        })
    }

    async fn create(&self, resource: &ManagedResource) -> Result<ManagedResource, kube::Error> {
        let namespace = namespace_of(resource)?;
        debug!(kind = %resource.kind(), name = %resource.name(), "Creating resource");
        Ok(match resource {
            ManagedResource::Secret(s) => {
                ManagedResource::Secret(self.create_typed(namespace, s).await?)
            }
            ManagedResource::Service(s) => {
                ManagedResource::Service(self.create_typed(namespace, s).await?)
            }
            ManagedResource::Deployment(d) => {
                ManagedResource::Deployment(self.create_typed(namespace, d).await?)
            }
        })
    }

    async fn update(&self, resource: &ManagedResource) -> Result<ManagedResource, kube::Error> {
        let namespace = namespace_of(resource)?;
        let name = resource.name();
        debug!(kind = %resource.kind(), name = %name, "Replacing resource");
        Ok(match resource {
            ManagedResource::Secret(s) => {
                ManagedResource::Secret(self.replace_typed(namespace, name, s).await?)
            }
            ManagedResource::Service(s) => {
                ManagedResource::Service(self.replace_typed(namespace, name, s).await?)
            }
            ManagedResource::Deployment(d) => {
                ManagedResource::Deployment(self.replace_typed(namespace, name, d).await?)
            }
        })
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), kube::Error> {
        match kind {
            ResourceKind::Secret => self.delete_typed::<Secret>(namespace, name).await,
            ResourceKind::Service => self.delete_typed::<Service>(namespace, name).await,
            ResourceKind::Deployment => self.delete_typed::<Deployment>(namespace, name).await,
        }
    }

    async fn update_status(&self, key: &RedisKey, status: &RedisStatus) -> Result<(), kube::Error> {
        let patch = serde_json::json!({
            "status": status
        });
        self.api::<Redis>(&key.namespace)
            .patch_status(
                &key.name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(())
    }
}
