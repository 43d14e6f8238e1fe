// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Property-based tests for redis-operator.
//!
//! Uses proptest to generate random inputs and verify invariants.

use std::collections::BTreeMap;

use proptest::prelude::*;

use redis_operator::crd::{Redis, RedisSpec};
use redis_operator::resources::common::{
    auth_secret_name, common_labels, resource_labels, resource_name, selector_labels,
};
use redis_operator::resources::{ManagedResource, Role, resource_builders, set_owner};

/// Strategy for DNS-label style object names.
fn object_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9]{0,20}(-[a-z0-9]{1,8}){0,2}"
}

/// Strategy for component tags.
fn component() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("redis".to_string()),
        Just("redis-master".to_string()),
        Just("redis-replica".to_string()),
        "[a-z]{1,12}",
    ]
}

/// Strategy for arbitrary extra labels.
fn extra_labels() -> impl Strategy<Value = BTreeMap<String, String>> {
    prop::collection::btree_map(
        prop_oneof![
            Just("app.kubernetes.io/name".to_string()),
            Just("app.kubernetes.io/part-of".to_string()),
            Just("app.kubernetes.io/component".to_string()),
            "[a-z]{1,10}",
        ],
        "[a-z0-9]{0,10}",
        0..6,
    )
}

fn redis(name: &str, masters: i32, replicas: i32, existing_secret: bool) -> Redis {
    let mut redis = Redis::new(name, RedisSpec::default());
    redis.metadata.namespace = Some("ns".to_string());
    redis.metadata.uid = Some(format!("uid-{name}"));
    redis.spec.master.count = masters;
    redis.spec.replica.count = replicas;
    if existing_secret {
        redis.spec.common.auth.existing_secret = "ext-creds".to_string();
    }
    redis
}

proptest! {
    /// Names are a pure function of parent and component.
    #[test]
    fn resource_name_is_deterministic(parent in object_name(), component in component()) {
        let a = resource_name(&parent, &component);
        let b = resource_name(&parent, &component);
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(a, format!("{parent}-{component}"));
    }

    /// Master and replica resources of one parent never share a name with
    /// the auth secret, and differ from each other.
    #[test]
    fn component_names_do_not_collide(parent in object_name()) {
        let master = resource_name(&parent, Role::Master.component());
        let replica = resource_name(&parent, Role::Replica.component());
        let secret = auth_secret_name(&parent);
        prop_assert_ne!(&master, &replica);
        prop_assert_ne!(&master, &secret);
        prop_assert_ne!(&replica, &secret);
    }

    /// Selector labels are always a subset of the component's resource labels.
    #[test]
    fn selector_is_subset_of_labels(parent in object_name(), component in component()) {
        let selector = selector_labels(&parent, &component);
        let labels = resource_labels(
            &parent,
            BTreeMap::from([(
                "app.kubernetes.io/component".to_string(),
                component.clone(),
            )]),
        );
        for (key, value) in &selector {
            prop_assert_eq!(labels.get(key), Some(value));
        }
    }

    /// Common labels win over conflicting extras.
    #[test]
    fn common_labels_win(parent in object_name(), extra in extra_labels()) {
        let merged = resource_labels(&parent, extra.clone());
        for (key, value) in common_labels(&parent) {
            prop_assert_eq!(merged.get(&key), Some(&value));
        }
        for key in extra.keys() {
            prop_assert!(merged.contains_key(key));
        }
    }

    /// Applying the desired state twice yields the same object as applying
    /// it once (the generated secret excepted, it is never re-applied).
    #[test]
    fn apply_is_idempotent(
        parent in object_name(),
        masters in 0..4i32,
        replicas in 0..6i32,
        existing_secret in any::<bool>(),
    ) {
        let redis = redis(&parent, masters, replicas, existing_secret);
        for builder in resource_builders(&redis) {
            if builder.preserves_existing() {
                continue;
            }
            let mut once = builder.build_identity().unwrap();
            builder.apply_desired_state(&mut once).unwrap();
            set_owner(&redis, once.metadata_mut()).unwrap();

            let mut twice = once.clone();
            builder.apply_desired_state(&mut twice).unwrap();
            set_owner(&redis, twice.metadata_mut()).unwrap();

            prop_assert_eq!(&once, &twice);
            prop_assert_eq!(
                once.metadata().owner_references.as_ref().map(Vec::len),
                Some(1)
            );
        }
    }

    /// Deployment replica counts follow the role counts.
    #[test]
    fn deployment_replicas_follow_spec(masters in 1..4i32, replicas in 1..6i32) {
        let redis = redis("cache1", masters, replicas, false);
        let counts: Vec<i32> = resource_builders(&redis)
            .iter()
            .filter_map(|builder| {
                let mut resource = builder.build_identity().ok()?;
                builder.apply_desired_state(&mut resource).ok()?;
                match resource {
                    ManagedResource::Deployment(d) => d.spec?.replicas,
                    _ => None,
                }
            })
            .collect();
        prop_assert_eq!(counts, vec![masters, replicas]);
    }

    /// Every builder's identity is derived from the parent name only.
    #[test]
    fn identities_are_prefixed_by_parent(parent in object_name()) {
        let redis = redis(&parent, 1, 1, false);
        let prefix = format!("{parent}-");
        for builder in resource_builders(&redis) {
            let identity = builder.build_identity().unwrap();
            prop_assert!(identity.name().starts_with(&prefix));
            prop_assert_eq!(identity.namespace(), Some("ns"));
        }
    }
}
