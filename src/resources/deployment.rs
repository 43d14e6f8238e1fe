//! Deployment generation for Redis roles.
//!
//! Both roles run a single `redis` container on port 6379 and read the
//! password from a Secret, never from a literal value:
//! - **Master**: `REDIS_REPLICATION_MODE=master`
//! - **Replica**: `REDIS_REPLICATION_MODE=slave` plus the master service
//!   address, port and password so it can attach to the master at start

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvFromSource, EnvVar, EnvVarSource, LocalObjectReference, PodSpec,
    SecretEnvSource, SecretKeySelector,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::ResourceExt;

use crate::controller::error::Error;
use crate::crd::{PullSecretRef, Redis};
use crate::resources::common::{
    PASSWORD_KEY, REDIS_PORT, REDIS_PORT_NAME, Role, component_labels,
    credential_secret_name, identity_meta, parent_name, resource_name, selector_labels,
};

/// Name of the Redis container in every pod.
pub const CONTAINER_NAME: &str = "redis";

/// Builder for the Deployment of one role.
#[derive(Clone, Copy, Debug)]
pub struct DeploymentBuilder<'a> {
    redis: &'a Redis,
    role: Role,
}

impl<'a> DeploymentBuilder<'a> {
    pub fn new(redis: &'a Redis, role: Role) -> Self {
        Self { redis, role }
    }

    pub fn name(&self) -> String {
        resource_name(&self.redis.name_any(), self.role.component())
    }

    pub fn should_exist(&self) -> bool {
        self.role.count(self.redis) >= 1
    }

    pub fn build_identity(&self) -> Result<Deployment, Error> {
        let name = resource_name(parent_name(self.redis)?, self.role.component());
        Ok(Deployment {
            metadata: identity_meta(self.redis, name)?,
            ..Default::default()
        })
    }

    /// Set replicas, selector, pod labels and the `redis` container.
    ///
    /// The container is rebuilt from the spec on every call while fields the
    /// API server defaults (termination message path, restart policy, ...)
    /// carry over from the existing object.
    pub fn apply_desired_state(&self, deployment: &mut Deployment) -> Result<(), Error> {
        let parent = self.redis.name_any();
        let component = self.role.component();
        let labels = component_labels(&parent, component);

        deployment.metadata.labels = Some(labels.clone());

        let spec = deployment.spec.get_or_insert_with(DeploymentSpec::default);
        spec.replicas = Some(self.role.count(self.redis));
        spec.selector = LabelSelector {
            match_labels: Some(selector_labels(&parent, component)),
            ..Default::default()
        };

        let template_meta = spec.template.metadata.get_or_insert_with(ObjectMeta::default);
        template_meta.labels = Some(labels);

        let pod = spec.template.spec.get_or_insert_with(PodSpec::default);
        let existing = pod
            .containers
            .iter()
            .find(|c| c.name == CONTAINER_NAME)
            .cloned()
            .unwrap_or_default();
        pod.containers = vec![self.redis_container(existing)];
        pod.image_pull_secrets = convert_pull_secrets(&self.redis.spec.common.image.pull_secrets);
        Ok(())
    }

    fn redis_container(&self, mut container: Container) -> Container {
        let image = &self.redis.spec.common.image;
        let secret_name = credential_secret_name(self.redis);

        container.name = CONTAINER_NAME.to_string();
        container.image = Some(image.reference());
        container.image_pull_policy = Some(image.pull_policy.clone());
        container.ports = Some(vec![ContainerPort {
            container_port: REDIS_PORT,
            name: Some(REDIS_PORT_NAME.to_string()),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]);
        container.env_from = Some(vec![EnvFromSource {
            secret_ref: Some(SecretEnvSource {
                name: secret_name.clone(),
                ..Default::default()
            }),
            ..Default::default()
        }]);
        container.env = Some(self.env(&secret_name));
        container
    }

    fn env(&self, secret_name: &str) -> Vec<EnvVar> {
        match self.role {
            Role::Master => vec![literal_env("REDIS_REPLICATION_MODE", "master")],
            Role::Replica => vec![
                literal_env("REDIS_REPLICATION_MODE", "slave"),
                literal_env(
                    "REDIS_MASTER_HOST",
                    &resource_name(&self.redis.name_any(), Role::Master.component()),
                ),
                EnvVar {
                    name: "REDIS_MASTER_PASSWORD".to_string(),
                    value_from: Some(EnvVarSource {
                        secret_key_ref: Some(SecretKeySelector {
                            name: secret_name.to_string(),
                            key: PASSWORD_KEY.to_string(),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                literal_env("REDIS_MASTER_PORT_NUMBER", &REDIS_PORT.to_string()),
            ],
        }
    }
}

fn literal_env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

/// Convert pull secret references to LocalObjectReference list.
fn convert_pull_secrets(pull_secrets: &[PullSecretRef]) -> Option<Vec<LocalObjectReference>> {
    if pull_secrets.is_empty() {
        return None;
    }

    Some(
        pull_secrets
            .iter()
            .map(|s| LocalObjectReference {
                name: s.name.clone(),
            })
            .collect(),
    )
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::get_unwrap
)]
mod tests {
    use super::*;
    use crate::crd::RedisSpec;

    fn test_redis(masters: i32, replicas: i32) -> Redis {
        let mut redis = Redis::new("cache1", RedisSpec::default());
        redis.metadata.namespace = Some("ns".to_string());
        redis.metadata.uid = Some("uid-1".to_string());
        redis.spec.master.count = masters;
        redis.spec.replica.count = replicas;
        redis
    }

    fn built(redis: &Redis, role: Role) -> Deployment {
        let builder = DeploymentBuilder::new(redis, role);
        let mut deployment = builder.build_identity().unwrap();
        builder.apply_desired_state(&mut deployment).unwrap();
        deployment
    }

    fn container(deployment: &Deployment) -> &Container {
        let pod = deployment
            .spec
            .as_ref()
            .unwrap()
            .template
            .spec
            .as_ref()
            .unwrap();
        assert_eq!(pod.containers.len(), 1);
        &pod.containers[0]
    }

    fn env_value<'a>(container: &'a Container, name: &str) -> Option<&'a EnvVar> {
        container.env.as_ref().unwrap().iter().find(|e| e.name == name)
    }

    #[test]
    fn test_should_exist_follows_count() {
        let redis = test_redis(0, 3);
        assert!(!DeploymentBuilder::new(&redis, Role::Master).should_exist());
        assert!(DeploymentBuilder::new(&redis, Role::Replica).should_exist());
    }

    #[test]
    fn test_master_deployment() {
        let redis = test_redis(2, 0);
        let deployment = built(&redis, Role::Master);

        assert_eq!(
            deployment.metadata.name.as_deref(),
            Some("cache1-redis-master")
        );
        let spec = deployment.spec.as_ref().unwrap();
        assert_eq!(spec.replicas, Some(2));
        assert_eq!(
            spec.selector
                .match_labels
                .as_ref()
                .unwrap()
                .get("app.kubernetes.io/component")
                .unwrap(),
            "redis-master"
        );

        let c = container(&deployment);
        assert_eq!(c.name, "redis");
        assert_eq!(c.image.as_deref(), Some("bitnami/redis:7.2.5"));
        assert_eq!(c.image_pull_policy.as_deref(), Some("IfNotPresent"));
        let port = &c.ports.as_ref().unwrap()[0];
        assert_eq!(port.container_port, 6379);
        assert_eq!(port.name.as_deref(), Some("redis"));

        let env_from = c.env_from.as_ref().unwrap();
        assert_eq!(
            env_from[0].secret_ref.as_ref().unwrap().name,
            "cache1-auth-secret"
        );
        assert_eq!(
            env_value(c, "REDIS_REPLICATION_MODE").unwrap().value.as_deref(),
            Some("master")
        );
        assert_eq!(c.env.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn test_replica_deployment_wiring() {
        let redis = test_redis(1, 2);
        let deployment = built(&redis, Role::Replica);
        assert_eq!(deployment.spec.as_ref().unwrap().replicas, Some(2));

        let c = container(&deployment);
        assert_eq!(
            env_value(c, "REDIS_REPLICATION_MODE").unwrap().value.as_deref(),
            Some("slave")
        );
        assert_eq!(
            env_value(c, "REDIS_MASTER_HOST").unwrap().value.as_deref(),
            Some("cache1-redis-master")
        );
        assert_eq!(
            env_value(c, "REDIS_MASTER_PORT_NUMBER").unwrap().value.as_deref(),
            Some("6379")
        );

        let password = env_value(c, "REDIS_MASTER_PASSWORD").unwrap();
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
    }

    #[test]
    fn test_existing_secret_override() {
        let mut redis = test_redis(1, 1);
        redis.spec.common.auth.existing_secret = "ext-creds".to_string();

        for role in [Role::Master, Role::Replica] {
            let deployment = built(&redis, role);
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

        let replica = built(&redis, Role::Replica);
        let password = env_value(container(&replica), "REDIS_MASTER_PASSWORD").unwrap();
        assert_eq!(
            password
                .value_from
                .as_ref()
                .unwrap()
                .secret_key_ref
                .as_ref()
                .unwrap()
                .name,
            "ext-creds"
        );
    }

    #[test]
    fn test_apply_twice_does_not_accumulate() {
        let redis = test_redis(1, 2);
        let builder = DeploymentBuilder::new(&redis, Role::Replica);
        let mut deployment = builder.build_identity().unwrap();
        builder.apply_desired_state(&mut deployment).unwrap();
        let once = deployment.clone();
        builder.apply_desired_state(&mut deployment).unwrap();

        assert_eq!(once, deployment);
        assert_eq!(container(&deployment).env.as_ref().unwrap().len(), 4);
    }

    #[test]
    fn test_apply_keeps_server_defaults_and_drops_foreign_containers() {
        let redis = test_redis(1, 0);
        let builder = DeploymentBuilder::new(&redis, Role::Master);
        let mut deployment = built(&redis, Role::Master);
        {
            let pod = deployment
                .spec
                .as_mut()
                .unwrap()
                .template
                .spec
                .as_mut()
                .unwrap();
            pod.restart_policy = Some("Always".to_string());
            pod.containers[0].termination_message_path = Some("/dev/termination-log".to_string());
            pod.containers.push(Container {
                name: "sidecar".to_string(),
                ..Default::default()
            });
        }

        builder.apply_desired_state(&mut deployment).unwrap();

        let pod = deployment.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("Always"));
        assert_eq!(pod.containers.len(), 1);
        assert_eq!(
            pod.containers[0].termination_message_path.as_deref(),
            Some("/dev/termination-log")
        );
    }

    #[test]
    fn test_image_and_pull_secrets() {
        let mut redis = test_redis(1, 0);
        redis.spec.common.image.repository = "registry.local/redis".to_string();
        redis.spec.common.image.tag = "7.4.1".to_string();
        redis.spec.common.image.pull_policy = "Always".to_string();
        redis.spec.common.image.pull_secrets = vec![PullSecretRef {
            name: "regcred".to_string(),
        }];

        let deployment = built(&redis, Role::Master);
        let c = container(&deployment);
        assert_eq!(c.image.as_deref(), Some("registry.local/redis:7.4.1"));
        assert_eq!(c.image_pull_policy.as_deref(), Some("Always"));

        let pod = deployment.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        assert_eq!(pod.image_pull_secrets.as_ref().unwrap()[0].name, "regcred");
    }
}
