//! Which resources a spec produces and how they are wired together.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE;
use redis_operator::controller::engine::OperationResult;
use redis_operator::resources::ResourceKind;

use crate::fixtures::*;

#[tokio::test]
async fn test_demo_topology() {
    let h = Harness::new(RedisBuilder::new("demo").masters(1).replicas(2).build()).await;
    let report = h.converge().await;

    assert_eq!(report.count(OperationResult::Created), 5);
    assert_eq!(h.names(ResourceKind::Secret).await, vec!["demo-auth-secret"]);
    assert_eq!(
        h.names(ResourceKind::Service).await,
        vec!["demo-redis-master", "demo-redis-replica"]
    );
    assert_eq!(
        h.names(ResourceKind::Deployment).await,
        vec!["demo-redis-master", "demo-redis-replica"]
    );

    let master = h.deployment("demo-redis-master").await.unwrap();
    let replica = h.deployment("demo-redis-replica").await.unwrap();
    assert_eq!(master.spec.as_ref().unwrap().replicas, Some(1));
    assert_eq!(replica.spec.as_ref().unwrap().replicas, Some(2));

    let uid = h.store.redis(&h.key).await.unwrap().metadata.uid.unwrap();
    for object in h.store.objects().await {
        let owners = object.metadata().owner_references.as_ref().unwrap();
        assert_eq!(owners.len(), 1, "{} has one owner", object.name());
        assert_eq!(owners[0].kind, "Redis");
        assert_eq!(owners[0].name, "demo");
        assert_eq!(owners[0].uid, uid);
        assert_eq!(owners[0].controller, Some(true));
    }
}

#[tokio::test]
async fn test_default_spec_runs_master_only() {
    let h = Harness::new(RedisBuilder::new("cache1").build()).await;
    let report = h.converge().await;

    assert_eq!(report.count(OperationResult::Created), 3);
    assert_eq!(report.count(OperationResult::Skipped), 2);
    assert!(h.service("cache1-redis-replica").await.is_none());
    assert!(h.deployment("cache1-redis-replica").await.is_none());
}

#[tokio::test]
async fn test_master_count_zero_gates_master_resources() {
    let h = Harness::new(RedisBuilder::new("cache1").masters(0).replicas(1).build()).await;
    h.converge().await;

    assert!(h.service("cache1-redis-master").await.is_none());
    assert!(h.deployment("cache1-redis-master").await.is_none());
    assert!(h.service("cache1-redis-replica").await.is_some());
    assert!(h.deployment("cache1-redis-replica").await.is_some());
}

#[tokio::test]
async fn test_replica_wiring() {
    let h = Harness::new(RedisBuilder::new("cache1").replicas(1).build()).await;
    h.converge().await;

    let replica = h.deployment("cache1-redis-replica").await.unwrap();
    let c = container(&replica);
    assert_eq!(env_value(c, "REDIS_REPLICATION_MODE"), Some("slave"));
    assert_eq!(env_value(c, "REDIS_MASTER_HOST"), Some("cache1-redis-master"));
    assert_eq!(env_value(c, "REDIS_MASTER_PORT_NUMBER"), Some("6379"));

    let password = c
        .env
        .as_ref()
        .unwrap()
        .iter()
        .find(|e| e.name == "REDIS_MASTER_PASSWORD")
        .unwrap();
    assert!(password.value.is_none());
    let selector = password
        .value_from
        .as_ref()
        .unwrap()
        .secret_key_ref
        .as_ref()
        .unwrap();
    assert_eq!(selector.name, "cache1-auth-secret");
    assert_eq!(selector.key, "REDIS_PASSWORD");

    let env_from = c.env_from.as_ref().unwrap();
    assert_eq!(
        env_from[0].secret_ref.as_ref().unwrap().name,
        "cache1-auth-secret"
    );

    let master = h.deployment("cache1-redis-master").await.unwrap();
    assert_eq!(
        env_value(container(&master), "REDIS_REPLICATION_MODE"),
        Some("master")
    );
}

#[tokio::test]
async fn test_existing_secret_override() {
    let h = Harness::new(
        RedisBuilder::new("cache1")
            .replicas(1)
            .existing_secret("ext-creds")
            .build(),
    )
    .await;
    let report = h.converge().await;

    assert_eq!(report.resources[0].result, OperationResult::Skipped);
    assert!(h.names(ResourceKind::Secret).await.is_empty());

    for name in ["cache1-redis-master", "cache1-redis-replica"] {
        let deployment = h.deployment(name).await.unwrap();
        let c = container(&deployment);
        assert_eq!(
            c.env_from.as_ref().unwrap()[0]
                .secret_ref
                .as_ref()
                .unwrap()
                .name,
            "ext-creds"
        );
    }

    let replica = h.deployment("cache1-redis-replica").await.unwrap();
    let password = container(&replica)
        .env
        .as_ref()
        .unwrap()
        .iter()
        .find(|e| e.name == "REDIS_MASTER_PASSWORD")
        .unwrap()
        .clone();
    let selector = password.value_from.unwrap().secret_key_ref.unwrap();
    assert_eq!(selector.name, "ext-creds");
}

#[tokio::test]
async fn test_generated_password_shape() {
    let h = Harness::new(RedisBuilder::new("cache1").build()).await;
    h.converge().await;

    let secret = h.secret("cache1-auth-secret").await.unwrap();
    assert_eq!(secret.type_.as_deref(), Some("Opaque"));
    let password = password(&secret);
    assert_eq!(password.len(), 32);
    let decoded = URL_SAFE.decode(&password).unwrap();
    assert_eq!(decoded.len(), 24);

    let labels = secret.metadata.labels.unwrap();
    assert_eq!(labels["app.kubernetes.io/name"], "cache1");
    assert_eq!(labels["app.kubernetes.io/part-of"], "redis");
    assert_eq!(labels["app.kubernetes.io/component"], "redis");
}

#[tokio::test]
async fn test_services_select_their_pods() {
    let h = Harness::new(RedisBuilder::new("cache1").replicas(1).build()).await;
    h.converge().await;

    for name in ["cache1-redis-master", "cache1-redis-replica"] {
        let service = h.service(name).await.unwrap();
        let deployment = h.deployment(name).await.unwrap();
        let svc_spec = service.spec.unwrap();
        let selector = svc_spec.selector.unwrap();
        let pod_labels = deployment
            .spec
            .as_ref()
            .unwrap()
            .template
            .metadata
            .as_ref()
            .unwrap()
            .labels
            .clone()
            .unwrap();

        for (k, v) in &selector {
            assert_eq!(pod_labels.get(k), Some(v), "{name}: pod label {k}");
        }
        assert_eq!(svc_spec.type_.as_deref(), Some("ClusterIP"));
        let port = &svc_spec.ports.unwrap()[0];
        assert_eq!(port.port, 6379);
        assert_eq!(port.name.as_deref(), Some("redis"));
    }

    let master = h.service("cache1-redis-master").await.unwrap();
    let replica = h.service("cache1-redis-replica").await.unwrap();
    assert_ne!(
        master.spec.unwrap().selector,
        replica.spec.unwrap().selector
    );
}

#[tokio::test]
async fn test_image_and_pull_secrets() {
    let h = Harness::new(
        RedisBuilder::new("cache1")
            .image("registry.example.com/redis", "7.4.0")
            .pull_secret("regcred")
            .build(),
    )
    .await;
    h.converge().await;

    let deployment = h.deployment("cache1-redis-master").await.unwrap();
    assert_eq!(
        container(&deployment).image.as_deref(),
        Some("registry.example.com/redis:7.4.0")
    );
    let pull_secrets = deployment
        .spec
        .unwrap()
        .template
        .spec
        .unwrap()
        .image_pull_secrets
        .unwrap();
    assert_eq!(pull_secrets[0].name, "regcred");
}

#[tokio::test]
async fn test_names_are_scoped_to_parent() {
    let a = Harness::new(RedisBuilder::new("cache1").replicas(1).build()).await;
    let b = Harness::new(RedisBuilder::new("cache2").replicas(1).build()).await;
    a.converge().await;
    b.converge().await;

    let mut names_a = a.names(ResourceKind::Deployment).await;
    names_a.extend(a.names(ResourceKind::Service).await);
    let names_b = b.names(ResourceKind::Deployment).await;

    assert!(names_a.iter().all(|n| n.starts_with("cache1-")));
    assert!(names_b.iter().all(|n| n.starts_with("cache2-")));
    assert_eq!(
        names_b,
        vec!["cache2-redis-master", "cache2-redis-replica"]
    );
}
