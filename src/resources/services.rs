//! Service generation for Redis roles.
//!
//! Creates one cluster-internal Service per role:
//! - **Master Service** (`<name>-redis-master`): the address replicas follow
//! - **Replica Service** (`<name>-redis-replica`): read traffic

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use crate::controller::error::Error;
use crate::crd::Redis;
use crate::resources::common::{
    REDIS_PORT, REDIS_PORT_NAME, Role, component_labels, identity_meta, parent_name,
    resource_name, selector_labels,
};

/// Builder for the Service of one role.
#[derive(Clone, Copy, Debug)]
pub struct ServiceBuilder<'a> {
    redis: &'a Redis,
    role: Role,
}

impl<'a> ServiceBuilder<'a> {
    pub fn new(redis: &'a Redis, role: Role) -> Self {
        Self { redis, role }
    }

    /// Object name, derived from the parent and role.
    pub fn name(&self) -> String {
        resource_name(&self.redis.name_any(), self.role.component())
    }

    pub fn should_exist(&self) -> bool {
        self.role.count(self.redis) > 0
    }

    pub fn build_identity(&self) -> Result<Service, Error> {
        let name = resource_name(parent_name(self.redis)?, self.role.component());
        Ok(Service {
            metadata: identity_meta(self.redis, name)?,
            ..Default::default()
        })
    }

    /// Set labels, selector, port and type.
    ///
    /// Fields the API server assigns (cluster IP, IP families, session
    /// affinity defaults) are left as found.
    pub fn apply_desired_state(&self, svc: &mut Service) -> Result<(), Error> {
        let parent = self.redis.name_any();
        let component = self.role.component();

        svc.metadata.labels = Some(component_labels(&parent, component));

        let spec = svc.spec.get_or_insert_with(ServiceSpec::default);
        spec.type_ = Some("ClusterIP".to_string());
        spec.selector = Some(selector_labels(&parent, component));
        spec.ports = Some(vec![ServicePort {
            name: Some(REDIS_PORT_NAME.to_string()),
            port: REDIS_PORT,
            target_port: Some(IntOrString::String(REDIS_PORT_NAME.to_string())),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]);
        Ok(())
    }
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

    #[test]
    fn test_should_exist_follows_count() {
        let redis = test_redis(1, 0);
        assert!(ServiceBuilder::new(&redis, Role::Master).should_exist());
        assert!(!ServiceBuilder::new(&redis, Role::Replica).should_exist());

        let redis = test_redis(0, 2);
        assert!(!ServiceBuilder::new(&redis, Role::Master).should_exist());
        assert!(ServiceBuilder::new(&redis, Role::Replica).should_exist());
    }

    #[test]
    fn test_build_identity() {
        let redis = test_redis(1, 1);
        let svc = ServiceBuilder::new(&redis, Role::Replica)
            .build_identity()
            .unwrap();
        assert_eq!(svc.metadata.name.as_deref(), Some("cache1-redis-replica"));
        assert_eq!(svc.metadata.namespace.as_deref(), Some("ns"));
        assert!(svc.spec.is_none());
    }

    #[test]
    fn test_apply_desired_state() {
        let redis = test_redis(1, 1);
        let builder = ServiceBuilder::new(&redis, Role::Master);
        let mut svc = builder.build_identity().unwrap();
        builder.apply_desired_state(&mut svc).unwrap();

        let spec = svc.spec.unwrap();
        assert_eq!(spec.type_.as_deref(), Some("ClusterIP"));
        let selector = spec.selector.unwrap();
        assert_eq!(selector.get("app.kubernetes.io/name").unwrap(), "cache1");
        assert_eq!(
            selector.get("app.kubernetes.io/component").unwrap(),
            "redis-master"
        );

        let ports = spec.ports.unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].port, 6379);
        assert_eq!(ports[0].protocol.as_deref(), Some("TCP"));

        let labels = svc.metadata.labels.unwrap();
        assert_eq!(labels.get("app.kubernetes.io/part-of").unwrap(), "redis");
    }

    #[test]
    fn test_apply_preserves_cluster_ip() {
        let redis = test_redis(1, 0);
        let builder = ServiceBuilder::new(&redis, Role::Master);
        let mut svc = builder.build_identity().unwrap();
        svc.spec = Some(ServiceSpec {
            cluster_ip: Some("10.0.0.12".to_string()),
            ..Default::default()
        });

        builder.apply_desired_state(&mut svc).unwrap();
        let once = svc.clone();
        builder.apply_desired_state(&mut svc).unwrap();

        assert_eq!(once, svc);
        assert_eq!(
            svc.spec.unwrap().cluster_ip.as_deref(),
            Some("10.0.0.12")
        );
    }
}
