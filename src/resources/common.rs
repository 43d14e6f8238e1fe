//! Naming, labeling and ownership helpers.
//!
//! Every name and label the operator writes is a pure function of the
//! parent `Redis` identity and a component tag, so two reconciliations of the
//! same object always address the same resources.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};

use crate::controller::error::Error;
use crate::crd::Redis;

/// Port Redis listens on, in every container and service.
pub const REDIS_PORT: i32 = 6379;
/// Name of the container port and service port.
pub const REDIS_PORT_NAME: &str = "redis";
/// Key holding the password in the credential secret.
pub const PASSWORD_KEY: &str = "REDIS_PASSWORD";
/// Component tag for resources shared by both roles.
pub const SHARED_COMPONENT: &str = "redis";
/// Suffix of the generated credential secret.
pub const AUTH_SECRET_SUFFIX: &str = "auth-secret";

pub const LABEL_NAME: &str = "app.kubernetes.io/name";
pub const LABEL_PART_OF: &str = "app.kubernetes.io/part-of";
pub const LABEL_COMPONENT: &str = "app.kubernetes.io/component";

/// Replication role of a group of Redis pods.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Master,
    Replica,
}

impl Role {
    /// Component tag of the role.
    pub fn component(self) -> &'static str {
        match self {
            Role::Master => "redis-master",
            Role::Replica => "redis-replica",
        }
    }

    /// Desired pod count of the role.
    pub fn count(self, redis: &Redis) -> i32 {
        match self {
            Role::Master => redis.spec.master.count,
            Role::Replica => redis.spec.replica.count,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Master => write!(f, "master"),
            Role::Replica => write!(f, "replica"),
        }
    }
}

/// Name of a resource belonging to `parent`: `<parent>-<component>`.
pub fn resource_name(parent: &str, component: &str) -> String {
    format!("{parent}-{component}")
}

/// Name of the generated credential secret.
pub fn auth_secret_name(parent: &str) -> String {
    resource_name(parent, AUTH_SECRET_SUFFIX)
}

/// Secret the pods read the password from: the configured existing secret,
/// or the generated one.
pub fn credential_secret_name(redis: &Redis) -> String {
    match redis.spec.common.auth.existing_secret() {
        Some(existing) => existing.to_string(),
        None => auth_secret_name(&redis.name_any()),
    }
}

/// Labels shared by every resource of one `Redis`.
pub fn common_labels(parent: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_NAME.to_string(), parent.to_string()),
        (LABEL_PART_OF.to_string(), "redis".to_string()),
    ])
}

/// Merge `extra` with the common labels. Common keys cannot be overridden.
pub fn resource_labels(
    parent: &str,
    extra: BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut labels = extra;
    labels.extend(common_labels(parent));
    labels
}

/// Resource labels tagged with a component.
pub fn component_labels(parent: &str, component: &str) -> BTreeMap<String, String> {
    resource_labels(
        parent,
        BTreeMap::from([(LABEL_COMPONENT.to_string(), component.to_string())]),
    )
}

/// Labels used to select the pods of a component.
pub fn selector_labels(parent: &str, component: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_NAME.to_string(), parent.to_string()),
        (LABEL_COMPONENT.to_string(), component.to_string()),
    ])
}

/// Lookup metadata (name + namespace only) for a child of `redis`.
pub fn identity_meta(redis: &Redis, name: String) -> Result<ObjectMeta, Error> {
    let namespace = redis.namespace().ok_or_else(|| {
        Error::InvariantViolation(format!("Redis {} has no namespace", redis.name_any()))
    })?;
    Ok(ObjectMeta {
        name: Some(name),
        namespace: Some(namespace),
        ..Default::default()
    })
}

/// Name of `redis`, failing when the object carries none.
pub fn parent_name(redis: &Redis) -> Result<&str, Error> {
    redis
        .metadata
        .name
        .as_deref()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| Error::InvariantViolation("Redis has no name".to_string()))
}

/// Make `parent` the controlling owner of `child`.
///
/// Replaces a previous reference to the same parent in place, so repeated
/// calls never grow the list. Fails when the parent has no uid or when the
/// child is already controlled by another object.
pub fn set_owner(parent: &Redis, child: &mut ObjectMeta) -> Result<(), Error> {
    let owner = parent.controller_owner_ref(&()).ok_or_else(|| {
        Error::InvariantViolation(format!(
            "Redis {} has no uid, cannot reference it as owner",
            parent.name_any()
        ))
    })?;

    let refs = child.owner_references.get_or_insert_with(Vec::new);
    if let Some(other) = refs
        .iter()
        .find(|r| r.controller == Some(true) && r.uid != owner.uid)
    {
        return Err(Error::InvariantViolation(format!(
            "{} is already controlled by {} {}",
            child.name.as_deref().unwrap_or_default(),
            other.kind,
            other.name
        )));
    }

    match refs.iter_mut().find(|r| r.uid == owner.uid) {
        Some(existing) => *existing = owner,
        None => refs.push(owner),
    }
    Ok(())
}

/// Whether `child` is controlled by `parent`.
pub fn is_controlled_by(parent: &Redis, child: &ObjectMeta) -> bool {
    let Some(uid) = parent.uid() else {
        return false;
    };
    child
        .owner_references
        .iter()
        .flatten()
        .any(|r| r.controller == Some(true) && r.uid == uid)
}
