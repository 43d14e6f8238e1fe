//! Access to cluster state.
//!
//! The engine reads and writes through [`ClusterStore`] only. [`KubeStore`]
//! talks to the API server; [`InMemoryStore`] keeps objects in a map and is
//! what the tests converge against.

mod kube_store;
mod memory;

use async_trait::async_trait;

use crate::crd::{Redis, RedisStatus};
use crate::resources::{ManagedResource, ResourceKind};

pub use kube_store::KubeStore;
pub use memory::{Fault, InMemoryStore, StoreOp, WriteRecord};

/// Field manager name used for every write
pub const FIELD_MANAGER: &str = "redis-operator";

/// Identity of a `Redis`: namespace and name.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RedisKey {
    pub namespace: String,
    pub name: String,
}

impl RedisKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for RedisKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Reads and writes of cluster objects.
///
/// Errors are returned as `kube::Error` so API status codes survive; the
/// engine attaches the resource identity.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Fetch a `Redis`, `None` when it does not exist.
    async fn get_redis(&self, key: &RedisKey) -> Result<Option<Redis>, kube::Error>;

    /// Fetch a managed resource, `None` when it does not exist.
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ManagedResource>, kube::Error>;

    /// Create a resource. Fails with 409 when it already exists.
    async fn create(&self, resource: &ManagedResource) -> Result<ManagedResource, kube::Error>;

    /// Replace an existing resource.
    async fn update(&self, resource: &ManagedResource) -> Result<ManagedResource, kube::Error>;

    /// Delete a resource. Missing resources are not an error.
    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str)
    -> Result<(), kube::Error>;

    /// Write the status subresource of a `Redis`.
    async fn update_status(&self, key: &RedisKey, status: &RedisStatus)
    -> Result<(), kube::Error>;
}

/// Build an API-style error response.
pub(crate) fn api_error(code: u16, reason: &str, message: impl Into<String>) -> kube::Error {
    kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: message.into(),
        reason: reason.to_string(),
        code,
    })
}
