//! In-memory [`ClusterStore`].
//!
//! Behaves like the API server for the calls the engine makes: create
//! conflicts on an existing name, update needs the object to exist and a
//! matching `resourceVersion`, delete of a missing object succeeds. Faults
//! can be queued per operation to exercise error and cancellation paths.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::crd::{Redis, RedisStatus};
use crate::resources::{ManagedResource, ResourceKind};
use crate::store::{ClusterStore, RedisKey, api_error};

/// Store operation a [`Fault`] can be attached to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreOp {
    GetRedis,
    Get,
    Create,
    Update,
    Delete,
    UpdateStatus,
}

/// Injected misbehaviour for the next matching call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    /// Fail with an API error carrying this status code
    Fail(u16),
    /// Never return
    Stall,
}

/// A write observed by the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteRecord {
    pub op: StoreOp,
    pub kind: Option<ResourceKind>,
    pub name: String,
}

type ObjectKey = (ResourceKind, String, String);

#[derive(Debug)]
struct PendingFault {
    op: StoreOp,
    kind: Option<ResourceKind>,
    fault: Fault,
}

#[derive(Debug, Default)]
struct State {
    redis: BTreeMap<RedisKey, Redis>,
    objects: BTreeMap<ObjectKey, ManagedResource>,
    revision: u64,
    writes: Vec<WriteRecord>,
    faults: Vec<PendingFault>,
}

impl State {
    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }
}

/// Map-backed store for tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

fn object_key(resource: &ManagedResource) -> Result<ObjectKey, kube::Error> {
    let namespace = resource.namespace().ok_or_else(|| {
        api_error(
            400,
            "BadRequest",
            format!("{} {} has no namespace", resource.kind(), resource.name()),
        )
    })?;
    if resource.name().is_empty() {
        return Err(api_error(
            422,
            "Invalid",
            format!("{} has no name", resource.kind()),
        ));
    }
    Ok((
        resource.kind(),
        namespace.to_string(),
        resource.name().to_string(),
    ))
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a `Redis`. A uid and generation are assigned when absent.
    pub async fn insert_redis(&self, mut redis: Redis) -> Redis {
        let mut state = self.state.lock().await;
        let revision = state.next_revision();
        let namespace = redis
            .metadata
            .namespace
            .get_or_insert_with(|| "default".to_string())
            .clone();
        let name = redis.metadata.name.clone().unwrap_or_default();
        redis
            .metadata
            .uid
            .get_or_insert_with(|| format!("uid-redis-{namespace}-{name}"));
        redis.metadata.generation.get_or_insert(1);
        redis.metadata.resource_version = Some(revision);
        state
            .redis
            .insert(RedisKey::new(namespace, name), redis.clone());
        redis
    }

    pub async fn remove_redis(&self, key: &RedisKey) -> Option<Redis> {
        self.state.lock().await.redis.remove(key)
    }

    pub async fn redis(&self, key: &RedisKey) -> Option<Redis> {
        self.state.lock().await.redis.get(key).cloned()
    }

    /// Place an object directly, bypassing the write log.
    pub async fn insert_object(&self, mut resource: ManagedResource) -> ManagedResource {
        let mut state = self.state.lock().await;
        let revision = state.next_revision();
        resource.metadata_mut().resource_version = Some(revision);
        if let Ok(key) = object_key(&resource) {
            state.objects.insert(key, resource.clone());
        }
        resource
    }

    pub async fn object(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Option<ManagedResource> {
        self.state
            .lock()
            .await
            .objects
            .get(&(kind, namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Every stored object, ordered by kind, namespace and name.
    pub async fn objects(&self) -> Vec<ManagedResource> {
        self.state.lock().await.objects.values().cloned().collect()
    }

    pub async fn writes(&self) -> Vec<WriteRecord> {
        self.state.lock().await.writes.clone()
    }

    /// Writes that touched managed resources, excluding status updates.
    pub async fn resource_write_count(&self) -> usize {
        self.state
            .lock()
            .await
            .writes
            .iter()
            .filter(|w| w.op != StoreOp::UpdateStatus)
            .count()
    }

    pub async fn clear_writes(&self) {
        self.state.lock().await.writes.clear();
    }

    /// Queue a one-shot fault for the next `op`, optionally limited to `kind`.
    pub async fn inject(&self, op: StoreOp, kind: Option<ResourceKind>, fault: Fault) {
        self.state
            .lock()
            .await
            .faults
            .push(PendingFault { op, kind, fault });
    }

    async fn check_fault(
        &self,
        op: StoreOp,
        kind: Option<ResourceKind>,
    ) -> Result<(), kube::Error> {
        let fault = {
            let mut state = self.state.lock().await;
            let position = state
                .faults
                .iter()
                .position(|f| f.op == op && (f.kind.is_none() || f.kind == kind));
            position.map(|i| state.faults.remove(i).fault)
        };

        match fault {
            None => Ok(()),
            Some(Fault::Fail(code)) => Err(api_error(
                code,
                "Injected",
                format!("injected failure on {op:?}"),
            )),
            Some(Fault::Stall) => std::future::pending().await,
        }
    }
}

#[async_trait]
impl ClusterStore for InMemoryStore {
    async fn get_redis(&self, key: &RedisKey) -> Result<Option<Redis>, kube::Error> {
        self.check_fault(StoreOp::GetRedis, None).await?;
        Ok(self.state.lock().await.redis.get(key).cloned())
    }

    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ManagedResource>, kube::Error> {
        self.check_fault(StoreOp::Get, Some(kind)).await?;
        Ok(self.object(kind, namespace, name).await)
    }

    async fn create(&self, resource: &ManagedResource) -> Result<ManagedResource, kube::Error> {
        self.check_fault(StoreOp::Create, Some(resource.kind()))
            .await?;
        let key = object_key(resource)?;
        let mut state = self.state.lock().await;
        if state.objects.contains_key(&key) {
            return Err(api_error(
                409,
                "AlreadyExists",
                format!("{} {} already exists", resource.kind(), resource.name()),
            ));
        }

        let revision = state.next_revision();
        let mut stored = resource.clone();
        let meta = stored.metadata_mut();
        meta.uid = Some(format!("uid-{}-{}-{}", key.0, key.1, key.2));
        meta.resource_version = Some(revision);
        state.objects.insert(key, stored.clone());
        state.writes.push(WriteRecord {
            op: StoreOp::Create,
            kind: Some(resource.kind()),
            name: resource.name().to_string(),
        });
        Ok(stored)
    }

    async fn update(&self, resource: &ManagedResource) -> Result<ManagedResource, kube::Error> {
        self.check_fault(StoreOp::Update, Some(resource.kind()))
            .await?;
        let key = object_key(resource)?;
        let mut state = self.state.lock().await;
        let current_version = match state.objects.get(&key) {
            Some(current) => current.metadata().resource_version.clone(),
            None => {
                return Err(api_error(
                    404,
                    "NotFound",
                    format!("{} {} not found", resource.kind(), resource.name()),
                ));
            }
        };
        let requested = resource.metadata().resource_version.as_ref();
        if requested.is_some() && requested != current_version.as_ref() {
            return Err(api_error(
                409,
                "Conflict",
                format!(
                    "{} {} has been modified",
                    resource.kind(),
                    resource.name()
                ),
            ));
        }

        let revision = state.next_revision();
        let mut stored = resource.clone();
        stored.metadata_mut().resource_version = Some(revision);
        state.objects.insert(key, stored.clone());
        state.writes.push(WriteRecord {
            op: StoreOp::Update,
            kind: Some(resource.kind()),
            name: resource.name().to_string(),
        });
        Ok(stored)
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), kube::Error> {
        self.check_fault(StoreOp::Delete, Some(kind)).await?;
        let mut state = self.state.lock().await;
        if state
            .objects
            .remove(&(kind, namespace.to_string(), name.to_string()))
            .is_some()
        {
            state.writes.push(WriteRecord {
                op: StoreOp::Delete,
                kind: Some(kind),
                name: name.to_string(),
            });
        }
        Ok(())
    }

    async fn update_status(&self, key: &RedisKey, status: &RedisStatus) -> Result<(), kube::Error> {
        self.check_fault(StoreOp::UpdateStatus, None).await?;
        let mut state = self.state.lock().await;
        let Some(redis) = state.redis.get_mut(key) else {
            return Err(api_error(404, "NotFound", format!("Redis {key} not found")));
        };
        redis.status = Some(status.clone());
        state.writes.push(WriteRecord {
            op: StoreOp::UpdateStatus,
            kind: None,
            name: key.name.clone(),
        });
        Ok(())
    }
}
