//! Convergence of one `Redis` against the cluster.
//!
//! A cycle resolves the `Redis`, walks its builders in a fixed order and
//! creates, updates, preserves or prunes each managed resource. The first
//! failure aborts the cycle; resources converged before it stay converged
//! and the next cycle picks up where this one stopped.

use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::controller::error::{Error, Result};
use crate::crd::Redis;
use crate::resources::common::is_controlled_by;
use crate::resources::{ManagedResource, ResourceBuilder, ResourceKind, resource_builders, set_owner};
use crate::store::{ClusterStore, RedisKey};

/// What happened to one managed resource during a cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationResult {
    /// Did not exist and was created
    Created,
    /// Existed and differed from the desired state
    Updated,
    /// Existed and already matched the desired state
    Unchanged,
    /// Existed and is deliberately left untouched
    Preserved,
    /// Should not exist and was not touched
    Skipped,
    /// Should not exist and was deleted
    Pruned,
}

impl OperationResult {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationResult::Created => "created",
            OperationResult::Updated => "updated",
            OperationResult::Unchanged => "unchanged",
            OperationResult::Preserved => "preserved",
            OperationResult::Skipped => "skipped",
            OperationResult::Pruned => "pruned",
        }
    }

    /// Whether the cluster was written to.
    pub fn is_write(self) -> bool {
        matches!(
            self,
            OperationResult::Created | OperationResult::Updated | OperationResult::Pruned
        )
    }
}

impl std::fmt::Display for OperationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceReport {
    pub kind: ResourceKind,
    pub name: String,
    pub result: OperationResult,
}

/// Result of a cycle that ran every builder.
#[derive(Clone, Debug)]
pub struct Convergence {
    /// The `Redis` as read at the start of the cycle
    pub redis: Redis,
    /// One entry per builder, in reconciliation order
    pub resources: Vec<ResourceReport>,
}

impl Convergence {
    pub fn count(&self, result: OperationResult) -> usize {
        self.resources.iter().filter(|r| r.result == result).count()
    }

    pub fn with_result(&self, result: OperationResult) -> impl Iterator<Item = &ResourceReport> {
        self.resources.iter().filter(move |r| r.result == result)
    }

    /// Whether the cycle wrote anything.
    pub fn changed(&self) -> bool {
        self.resources.iter().any(|r| r.result.is_write())
    }
}

#[derive(Clone, Debug)]
pub enum Outcome {
    /// The `Redis` no longer exists
    NoOp,
    /// Every builder ran to completion
    Converged(Convergence),
}

/// Reconciliation engine over a [`ClusterStore`].
pub struct Engine<'s, S: ClusterStore + ?Sized> {
    store: &'s S,
    prune: bool,
}

impl<'s, S: ClusterStore + ?Sized> Engine<'s, S> {
    /// Engine with pruning enabled.
    pub fn new(store: &'s S) -> Self {
        Self { store, prune: true }
    }

    /// Delete owned resources whose predicate turned false.
    pub fn with_prune(mut self, prune: bool) -> Self {
        self.prune = prune;
        self
    }

    /// Run one convergence cycle for the `Redis` identified by `key`.
    pub async fn reconcile(&self, key: &RedisKey, cancel: &CancellationToken) -> Result<Outcome> {
        let redis = cancellable(cancel, async {
            self.store
                .get_redis(key)
                .await
                .map_err(|source| Error::StoreRead {
                    kind: "Redis",
                    name: key.to_string(),
                    source,
                })
        })
        .await?;

        let Some(redis) = redis else {
            debug!(redis = %key, "Redis not found, nothing to do");
            return Ok(Outcome::NoOp);
        };

        let mut resources = Vec::new();
        for builder in resource_builders(&redis) {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let kind = builder.kind();
            let name = builder.name();

            let result = if builder.should_exist() {
                let identity = builder.build_identity()?;
                self.converge(&redis, &builder, identity, cancel).await?
            } else {
                self.handle_unwanted(&redis, &builder, cancel).await?
            };

            debug!(
                redis = %key,
                kind = %kind,
                resource = %name,
                result = %result,
                "Resource reconciled"
            );
            resources.push(ResourceReport { kind, name, result });
        }

        Ok(Outcome::Converged(Convergence { redis, resources }))
    }

    /// Fetch by identity, then preserve or create-or-update.
    async fn converge(
        &self,
        redis: &Redis,
        builder: &ResourceBuilder<'_>,
        identity: ManagedResource,
        cancel: &CancellationToken,
    ) -> Result<OperationResult> {
        let existing = self.fetch(&identity, cancel).await?;

        if existing.is_some() && builder.preserves_existing() {
            debug!(
                kind = %identity.kind(),
                resource = %identity.name(),
                "Resource exists, preserving"
            );
            return Ok(OperationResult::Preserved);
        }

        self.create_or_update(redis, builder, identity, existing, cancel)
            .await
    }

    async fn create_or_update(
        &self,
        redis: &Redis,
        builder: &ResourceBuilder<'_>,
        identity: ManagedResource,
        existing: Option<ManagedResource>,
        cancel: &CancellationToken,
    ) -> Result<OperationResult> {
        let kind = identity.kind();
        let mut desired = existing.clone().unwrap_or(identity);
        builder.apply_desired_state(&mut desired)?;
        set_owner(redis, desired.metadata_mut())?;

        match existing {
            None => {
                self.write(kind, desired.name(), cancel, self.store.create(&desired))
                    .await?;
                info!(kind = %kind, resource = %desired.name(), "Created resource");
                Ok(OperationResult::Created)
            }
            Some(current) if current == desired => Ok(OperationResult::Unchanged),
            Some(_) => {
                self.write(kind, desired.name(), cancel, self.store.update(&desired))
                    .await?;
                info!(kind = %kind, resource = %desired.name(), "Updated resource");
                Ok(OperationResult::Updated)
            }
        }
    }

    /// A resource whose predicate is false: prune it if we own it.
    async fn handle_unwanted(
        &self,
        redis: &Redis,
        builder: &ResourceBuilder<'_>,
        cancel: &CancellationToken,
    ) -> Result<OperationResult> {
        if !self.prune || !builder.prunable() {
            return Ok(OperationResult::Skipped);
        }

        let identity = builder.build_identity()?;
        let Some(current) = self.fetch(&identity, cancel).await? else {
            return Ok(OperationResult::Skipped);
        };

        if !is_controlled_by(redis, current.metadata()) {
            warn!(
                kind = %current.kind(),
                resource = %current.name(),
                "Not controlled by this Redis, leaving in place"
            );
            return Ok(OperationResult::Skipped);
        }

        let namespace = current.namespace().unwrap_or_default();
        self.write(
            current.kind(),
            current.name(),
            cancel,
            self.store.delete(current.kind(), namespace, current.name()),
        )
        .await?;
        info!(kind = %current.kind(), resource = %current.name(), "Pruned resource");
        Ok(OperationResult::Pruned)
    }

    async fn fetch(
        &self,
        identity: &ManagedResource,
        cancel: &CancellationToken,
    ) -> Result<Option<ManagedResource>> {
        let kind = identity.kind();
        let name = identity.name();
        let namespace = identity.namespace().unwrap_or_default();
        cancellable(cancel, async {
            self.store
                .get(kind, namespace, name)
                .await
                .map_err(|source| Error::StoreRead {
                    kind: kind.as_str(),
                    name: name.to_string(),
                    source,
                })
        })
        .await
    }

    async fn write<T>(
        &self,
        kind: ResourceKind,
        name: &str,
        cancel: &CancellationToken,
        call: impl Future<Output = std::result::Result<T, kube::Error>>,
    ) -> Result<T> {
        cancellable(cancel, async {
            call.await.map_err(|source| Error::StoreWrite {
                kind: kind.as_str(),
                name: name.to_string(),
                source,
            })
        })
        .await
    }
}

/// Race `fut` against the token; cancellation wins ties.
async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = fut => result,
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use crate::crd::RedisSpec;
    use crate::store::{Fault, InMemoryStore, StoreOp};

    fn redis(name: &str) -> Redis {
        let mut redis = Redis::new(name, RedisSpec::default());
        redis.metadata.namespace = Some("ns".to_string());
        redis
    }

    fn converged(outcome: Outcome) -> Convergence {
        match outcome {
            Outcome::Converged(c) => c,
            Outcome::NoOp => panic!("expected convergence"),
        }
    }

    #[tokio::test]
    async fn test_missing_redis_is_noop() {
        let store = InMemoryStore::new();
        let outcome = Engine::new(&store)
            .reconcile(&RedisKey::new("ns", "gone"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::NoOp));
        assert!(store.writes().await.is_empty());
    }

    #[tokio::test]
    async fn test_first_cycle_creates_default_topology() {
        let store = InMemoryStore::new();
        store.insert_redis(redis("cache1")).await;

        let report = converged(
            Engine::new(&store)
                .reconcile(&RedisKey::new("ns", "cache1"), &CancellationToken::new())
                .await
                .unwrap(),
        );

        let results: Vec<OperationResult> = report.resources.iter().map(|r| r.result).collect();
        assert_eq!(
            results,
            vec![
                OperationResult::Created,
                OperationResult::Created,
                OperationResult::Created,
                OperationResult::Skipped,
                OperationResult::Skipped,
            ]
        );
        assert_eq!(store.objects().await.len(), 3);
    }

    #[tokio::test]
    async fn test_second_cycle_is_unchanged() {
        let store = InMemoryStore::new();
        store.insert_redis(redis("cache1")).await;
        let engine = Engine::new(&store);
        let key = RedisKey::new("ns", "cache1");
        let cancel = CancellationToken::new();

        engine.reconcile(&key, &cancel).await.unwrap();
        store.clear_writes().await;

        let report = converged(engine.reconcile(&key, &cancel).await.unwrap());
        assert!(!report.changed());
        assert_eq!(report.count(OperationResult::Preserved), 1);
        assert_eq!(report.count(OperationResult::Unchanged), 2);
        assert_eq!(store.resource_write_count().await, 0);
    }

    #[tokio::test]
    async fn test_failure_aborts_cycle() {
        let store = InMemoryStore::new();
        store.insert_redis(redis("cache1")).await;
        store
            .inject(StoreOp::Create, Some(ResourceKind::Deployment), Fault::Fail(500))
            .await;

        let err = Engine::new(&store)
            .reconcile(&RedisKey::new("ns", "cache1"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::StoreWrite { kind: "Deployment", .. }
        ));
        assert!(err.is_retryable());
        // Secret and master service were created before the failure
        assert_eq!(store.objects().await.len(), 2);
    }

    #[tokio::test]
    async fn test_read_failure_names_resource() {
        let store = InMemoryStore::new();
        store.insert_redis(redis("cache1")).await;
        store
            .inject(StoreOp::Get, Some(ResourceKind::Service), Fault::Fail(403))
            .await;

        let err = Engine::new(&store)
            .reconcile(&RedisKey::new("ns", "cache1"), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            Error::StoreRead { kind, name, .. } => {
                assert_eq!(kind, "Service");
                assert_eq!(name, "cache1-redis-master");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let store = InMemoryStore::new();
        store.insert_redis(redis("cache1")).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = Engine::new(&store)
            .reconcile(&RedisKey::new("ns", "cache1"), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(store.writes().await.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_interrupts_stalled_call() {
        let store = InMemoryStore::new();
        store.insert_redis(redis("cache1")).await;
        store
            .inject(StoreOp::Create, Some(ResourceKind::Service), Fault::Stall)
            .await;
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                cancel.cancel();
            })
        };

        let err = Engine::new(&store)
            .reconcile(&RedisKey::new("ns", "cache1"), &cancel)
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert!(err.is_cancelled());
        assert_eq!(store.objects().await.len(), 1);
    }

    #[tokio::test]
    async fn test_prune_disabled_skips() {
        let store = InMemoryStore::new();
        let key = RedisKey::new("ns", "cache1");
        let mut r = redis("cache1");
        r.spec.replica.count = 2;
        store.insert_redis(r.clone()).await;
        let engine = Engine::new(&store).with_prune(false);
        let cancel = CancellationToken::new();
        engine.reconcile(&key, &cancel).await.unwrap();

        r.spec.replica.count = 0;
        store.insert_redis(r).await;
        let report = converged(engine.reconcile(&key, &cancel).await.unwrap());

        assert_eq!(report.count(OperationResult::Pruned), 0);
        assert!(
            store
                .object(ResourceKind::Deployment, "ns", "cache1-redis-replica")
                .await
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_prune_removes_owned_resources() {
        let store = InMemoryStore::new();
        let key = RedisKey::new("ns", "cache1");
        let mut r = redis("cache1");
        r.spec.replica.count = 2;
        store.insert_redis(r.clone()).await;
        let engine = Engine::new(&store);
        let cancel = CancellationToken::new();
        engine.reconcile(&key, &cancel).await.unwrap();

        r.spec.replica.count = 0;
        store.insert_redis(r).await;
        let report = converged(engine.reconcile(&key, &cancel).await.unwrap());

        let pruned: Vec<&str> = report
            .with_result(OperationResult::Pruned)
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(pruned, vec!["cache1-redis-replica", "cache1-redis-replica"]);
        assert!(
            store
                .object(ResourceKind::Service, "ns", "cache1-redis-replica")
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_unwanted_resources_skip_identity_when_not_pruning() {
        let store = InMemoryStore::new();
        // No name, so every build_identity call would fail
        let mut r = redis("");
        r.spec.master.count = 0;
        r.spec.common.auth.existing_secret = "ext-creds".to_string();
        store.insert_redis(r).await;
        store.inject(StoreOp::Get, None, Fault::Fail(500)).await;

        let report = converged(
            Engine::new(&store)
                .with_prune(false)
                .reconcile(&RedisKey::new("ns", ""), &CancellationToken::new())
                .await
                .unwrap(),
        );

        assert_eq!(report.count(OperationResult::Skipped), 5);
        assert_eq!(report.resources[0].name, "-auth-secret");
        assert!(store.writes().await.is_empty());
    }

    #[tokio::test]
    async fn test_unwanted_secret_is_not_read() {
        let store = InMemoryStore::new();
        let mut r = redis("cache1");
        r.spec.common.auth.existing_secret = "ext-creds".to_string();
        store.insert_redis(r).await;
        store
            .inject(StoreOp::Get, Some(ResourceKind::Secret), Fault::Fail(500))
            .await;

        let report = converged(
            Engine::new(&store)
                .reconcile(&RedisKey::new("ns", "cache1"), &CancellationToken::new())
                .await
                .unwrap(),
        );

        assert_eq!(report.resources[0].result, OperationResult::Skipped);
        assert_eq!(report.resources[0].name, "cache1-auth-secret");
        assert_eq!(report.count(OperationResult::Created), 2);
    }
}
