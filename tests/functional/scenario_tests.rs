//! Multi-cycle scenarios: idempotence, spec edits, failures and shutdown.

use std::time::Duration;

use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use redis_operator::controller::engine::{OperationResult, Outcome};
use redis_operator::controller::error::Error;
use redis_operator::resources::{ManagedResource, ResourceKind};
use redis_operator::store::{ClusterStore, Fault, InMemoryStore, RedisKey, StoreOp};
use tokio_util::sync::CancellationToken;

use crate::fixtures::*;

#[tokio::test]
async fn test_second_cycle_writes_nothing() {
    let h = Harness::new(RedisBuilder::new("demo").replicas(2).build()).await;
    h.converge().await;
    let before = h.store.objects().await;
    h.store.clear_writes().await;

    let report = h.converge().await;

    assert!(!report.changed());
    assert_eq!(report.count(OperationResult::Preserved), 1);
    assert_eq!(report.count(OperationResult::Unchanged), 4);
    assert!(h.store.writes().await.is_empty());
    assert_eq!(h.store.objects().await, before);
}

#[tokio::test]
async fn test_password_survives_spec_changes() {
    let h = Harness::new(RedisBuilder::new("cache1").build()).await;
    h.converge().await;
    let original = password(&h.secret("cache1-auth-secret").await.unwrap());

    h.update(
        RedisBuilder::new("cache1")
            .image("bitnami/redis", "7.4.0")
            .replicas(3)
            .build(),
    )
    .await;
    let report = h.converge().await;

    assert_eq!(report.resources[0].result, OperationResult::Preserved);
    assert_eq!(report.resources[2].result, OperationResult::Updated);
    assert_eq!(
        password(&h.secret("cache1-auth-secret").await.unwrap()),
        original
    );
    assert_eq!(
        container(&h.deployment("cache1-redis-master").await.unwrap())
            .image
            .as_deref(),
        Some("bitnami/redis:7.4.0")
    );
}

#[tokio::test]
async fn test_generated_secret_kept_after_switching_to_existing() {
    let h = Harness::new(RedisBuilder::new("cache1").build()).await;
    h.converge().await;
    let original = password(&h.secret("cache1-auth-secret").await.unwrap());

    h.update(RedisBuilder::new("cache1").existing_secret("ext-creds").build())
        .await;
    let report = h.converge().await;

    assert_eq!(report.resources[0].result, OperationResult::Skipped);
    assert_eq!(
        password(&h.secret("cache1-auth-secret").await.unwrap()),
        original
    );
    let deployment = h.deployment("cache1-redis-master").await.unwrap();
    assert_eq!(
        container(&deployment).env_from.as_ref().unwrap()[0]
            .secret_ref
            .as_ref()
            .unwrap()
            .name,
        "ext-creds"
    );
}

#[tokio::test]
async fn test_drift_is_repaired() {
    let h = Harness::new(RedisBuilder::new("cache1").build()).await;
    h.converge().await;

    let Some(ManagedResource::Deployment(mut drifted)) = h
        .store
        .object(ResourceKind::Deployment, NAMESPACE, "cache1-redis-master")
        .await
    else {
        panic!("master deployment missing");
    };
    drifted.spec.as_mut().unwrap().replicas = Some(5);
    h.store
        .update(&ManagedResource::Deployment(drifted))
        .await
        .unwrap();

    let report = h.converge().await;
    assert_eq!(report.resources[2].result, OperationResult::Updated);
    let repaired = h.deployment("cache1-redis-master").await.unwrap();
    assert_eq!(repaired.spec.unwrap().replicas, Some(1));
}

#[tokio::test]
async fn test_cluster_ip_is_preserved() {
    let h = Harness::new(RedisBuilder::new("cache1").build()).await;
    h.converge().await;

    let mut service = h.service("cache1-redis-master").await.unwrap();
    service.spec.as_mut().unwrap().cluster_ip = Some("10.96.0.12".to_string());
    h.store
        .update(&ManagedResource::Service(service))
        .await
        .unwrap();

    let report = h.converge().await;
    assert_eq!(report.resources[1].result, OperationResult::Unchanged);
    let service = h.service("cache1-redis-master").await.unwrap();
    assert_eq!(
        service.spec.unwrap().cluster_ip.as_deref(),
        Some("10.96.0.12")
    );
}

#[tokio::test]
async fn test_failure_aborts_and_next_cycle_resumes() {
    let h = Harness::new(RedisBuilder::new("demo").replicas(2).build()).await;
    h.store
        .inject(
            StoreOp::Create,
            Some(ResourceKind::Deployment),
            Fault::Fail(503),
        )
        .await;

    let err = h.run().await.unwrap_err();
    assert!(matches!(
        &err,
        Error::StoreWrite { kind: "Deployment", name, .. } if name == "demo-redis-master"
    ));
    assert!(err.is_retryable());
    assert_eq!(h.names(ResourceKind::Secret).await.len(), 1);
    assert_eq!(
        h.names(ResourceKind::Service).await,
        vec!["demo-redis-master"]
    );
    assert!(h.names(ResourceKind::Deployment).await.is_empty());
    let password_before = password(&h.secret("demo-auth-secret").await.unwrap());

    let report = h.converge().await;
    assert_eq!(report.resources[0].result, OperationResult::Preserved);
    assert_eq!(report.resources[1].result, OperationResult::Unchanged);
    assert_eq!(report.count(OperationResult::Created), 3);
    assert_eq!(h.store.objects().await.len(), 5);
    assert_eq!(
        password(&h.secret("demo-auth-secret").await.unwrap()),
        password_before
    );
}

#[tokio::test]
async fn test_permission_error_is_not_retryable() {
    let h = Harness::new(RedisBuilder::new("cache1").build()).await;
    h.store
        .inject(StoreOp::Get, Some(ResourceKind::Secret), Fault::Fail(403))
        .await;

    let err = h.run().await.unwrap_err();
    assert!(matches!(err, Error::StoreRead { kind: "Secret", .. }));
    assert!(!err.is_retryable());
    assert!(h.store.objects().await.is_empty());
}

#[tokio::test]
async fn test_cancelled_token_stops_before_any_write() {
    let h = Harness::new(RedisBuilder::new("cache1").build()).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = h.run_with(&cancel, true).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert!(h.store.writes().await.is_empty());
}

#[tokio::test]
async fn test_cancel_during_stalled_write() {
    let h = Harness::new(RedisBuilder::new("cache1").build()).await;
    h.store
        .inject(StoreOp::Create, Some(ResourceKind::Deployment), Fault::Stall)
        .await;
    let cancel = CancellationToken::new();

    let result = tokio::time::timeout(Duration::from_secs(5), async {
        let (result, ()) = tokio::join!(h.run_with(&cancel, true), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });
        result
    })
    .await
    .expect("cancellation did not interrupt the stalled call");

    let err = result.unwrap_err();
    assert!(err.is_cancelled());
    assert!(!err.is_retryable());
    assert_eq!(h.store.objects().await.len(), 2);
}

#[tokio::test]
async fn test_scale_down_prunes_owned_resources() {
    let h = Harness::new(RedisBuilder::new("cache1").replicas(2).build()).await;
    h.converge().await;

    h.update(RedisBuilder::new("cache1").replicas(0).build()).await;
    let report = h.converge().await;

    assert_eq!(report.count(OperationResult::Pruned), 2);
    assert!(h.service("cache1-redis-replica").await.is_none());
    assert!(h.deployment("cache1-redis-replica").await.is_none());
    assert!(h.deployment("cache1-redis-master").await.is_some());

    let again = h.converge().await;
    assert_eq!(again.count(OperationResult::Pruned), 0);
    assert_eq!(again.count(OperationResult::Skipped), 2);
}

#[tokio::test]
async fn test_scale_down_without_pruning_leaves_resources() {
    let h = Harness::new(RedisBuilder::new("cache1").replicas(2).build()).await;
    h.converge().await;

    h.update(RedisBuilder::new("cache1").replicas(0).build()).await;
    let outcome = h.run_with(&CancellationToken::new(), false).await.unwrap();
    let Outcome::Converged(report) = outcome else {
        panic!("expected convergence");
    };

    assert_eq!(report.count(OperationResult::Skipped), 2);
    assert!(h.service("cache1-redis-replica").await.is_some());
    assert!(h.deployment("cache1-redis-replica").await.is_some());
}

#[tokio::test]
async fn test_foreign_resources_are_not_pruned() {
    let h = Harness::new(RedisBuilder::new("cache1").build()).await;
    h.store
        .insert_object(ManagedResource::Service(Service {
            metadata: ObjectMeta {
                name: Some("cache1-redis-replica".to_string()),
                namespace: Some(NAMESPACE.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }))
        .await;

    let report = h.converge().await;
    assert_eq!(report.count(OperationResult::Pruned), 0);
    assert!(h.service("cache1-redis-replica").await.is_some());
}

#[tokio::test]
async fn test_resource_controlled_by_another_owner_is_an_error() {
    let h = Harness::new(RedisBuilder::new("cache1").build()).await;
    h.store
        .insert_object(ManagedResource::Service(Service {
            metadata: ObjectMeta {
                name: Some("cache1-redis-master".to_string()),
                namespace: Some(NAMESPACE.to_string()),
                owner_references: Some(vec![OwnerReference {
                    api_version: "apps/v1".to_string(),
                    kind: "Deployment".to_string(),
                    name: "someone-else".to_string(),
                    uid: "uid-foreign".to_string(),
                    controller: Some(true),
                    ..Default::default()
                }]),
                ..Default::default()
            },
            ..Default::default()
        }))
        .await;

    let err = h.run().await.unwrap_err();
    assert!(matches!(err, Error::InvariantViolation(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_missing_redis_is_noop() {
    let store = InMemoryStore::new();
    let h = Harness {
        store,
        key: RedisKey::new(NAMESPACE, "absent"),
    };
    assert!(matches!(h.run().await.unwrap(), Outcome::NoOp));
    assert!(h.store.writes().await.is_empty());
}

#[tokio::test]
async fn test_deleted_redis_stops_reconciling() {
    let h = Harness::new(RedisBuilder::new("cache1").build()).await;
    h.converge().await;
    h.store.remove_redis(&h.key).await;
    h.store.clear_writes().await;

    assert!(matches!(h.run().await.unwrap(), Outcome::NoOp));
    assert!(h.store.writes().await.is_empty());
}
