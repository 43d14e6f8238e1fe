//! The closed set of resource builders.
//!
//! Each builder is bound to one `Redis` and one resource variant and is
//! rebuilt from the current spec every cycle. Dispatch is a plain `match`
//! over the variants; there is no dynamic typing between builder and
//! resource.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::controller::error::Error;
use crate::crd::Redis;
use crate::resources::common::Role;
use crate::resources::deployment::DeploymentBuilder;
use crate::resources::secret::AuthSecretBuilder;
use crate::resources::services::ServiceBuilder;

/// Kind of a managed resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    Secret,
    Service,
    Deployment,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Secret => "Secret",
            ResourceKind::Service => "Service",
            ResourceKind::Deployment => "Deployment",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cluster object created and maintained on behalf of a `Redis`.
#[derive(Clone, Debug, PartialEq)]
pub enum ManagedResource {
    Secret(Secret),
    Service(Service),
    Deployment(Deployment),
}

impl ManagedResource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ManagedResource::Secret(_) => ResourceKind::Secret,
            ManagedResource::Service(_) => ResourceKind::Service,
            ManagedResource::Deployment(_) => ResourceKind::Deployment,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            ManagedResource::Secret(s) => &s.metadata,
            ManagedResource::Service(s) => &s.metadata,
            ManagedResource::Deployment(d) => &d.metadata,
        }
    }

    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            ManagedResource::Secret(s) => &mut s.metadata,
            ManagedResource::Service(s) => &mut s.metadata,
            ManagedResource::Deployment(d) => &mut d.metadata,
        }
    }

    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata().namespace.as_deref()
    }
}

/// One builder per managed resource of a `Redis`.
#[derive(Clone, Copy, Debug)]
pub enum ResourceBuilder<'a> {
    AuthSecret(AuthSecretBuilder<'a>),
    Service(ServiceBuilder<'a>),
    Deployment(DeploymentBuilder<'a>),
}

impl<'a> ResourceBuilder<'a> {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceBuilder::AuthSecret(_) => ResourceKind::Secret,
            ResourceBuilder::Service(_) => ResourceKind::Service,
            ResourceBuilder::Deployment(_) => ResourceKind::Deployment,
        }
    }

    /// Name of the managed object. Unlike `build_identity` this never fails.
    pub fn name(&self) -> String {
        match self {
            ResourceBuilder::AuthSecret(b) => b.name(),
            ResourceBuilder::Service(b) => b.name(),
            ResourceBuilder::Deployment(b) => b.name(),
        }
    }

    /// Whether the resource belongs in the cluster for the current spec.
    pub fn should_exist(&self) -> bool {
        match self {
            ResourceBuilder::AuthSecret(b) => b.should_exist(),
            ResourceBuilder::Service(b) => b.should_exist(),
            ResourceBuilder::Deployment(b) => b.should_exist(),
        }
    }

    /// Name and namespace only, usable as a lookup key.
    pub fn build_identity(&self) -> Result<ManagedResource, Error> {
        Ok(match self {
            ResourceBuilder::AuthSecret(b) => ManagedResource::Secret(b.build_identity()?),
            ResourceBuilder::Service(b) => ManagedResource::Service(b.build_identity()?),
            ResourceBuilder::Deployment(b) => ManagedResource::Deployment(b.build_identity()?),
        })
    }

    /// Mutate `resource` in place to the desired state.
    pub fn apply_desired_state(&self, resource: &mut ManagedResource) -> Result<(), Error> {
        match (self, resource) {
            (ResourceBuilder::AuthSecret(b), ManagedResource::Secret(s)) => {
                b.apply_desired_state(s)
            }
            (ResourceBuilder::Service(b), ManagedResource::Service(s)) => b.apply_desired_state(s),
            (ResourceBuilder::Deployment(b), ManagedResource::Deployment(d)) => {
                b.apply_desired_state(d)
            }
            (builder, resource) => Err(Error::InvariantViolation(format!(
                "{} builder cannot apply to {} {}",
                builder.kind(),
                resource.kind(),
                resource.name()
            ))),
        }
    }

    /// An existing resource is kept untouched instead of being updated.
    ///
    /// Only the generated secret: re-applying it would rotate the password.
    pub fn preserves_existing(&self) -> bool {
        matches!(self, ResourceBuilder::AuthSecret(_))
    }

    /// The resource may be deleted once its predicate turns false.
    pub fn prunable(&self) -> bool {
        !self.preserves_existing()
    }
}

/// Builders for every resource of `redis`, in reconciliation order.
pub fn resource_builders(redis: &Redis) -> Vec<ResourceBuilder<'_>> {
    vec![
        ResourceBuilder::AuthSecret(AuthSecretBuilder::new(redis)),
        ResourceBuilder::Service(ServiceBuilder::new(redis, Role::Master)),
        ResourceBuilder::Deployment(DeploymentBuilder::new(redis, Role::Master)),
        ResourceBuilder::Service(ServiceBuilder::new(redis, Role::Replica)),
        ResourceBuilder::Deployment(DeploymentBuilder::new(redis, Role::Replica)),
    ]
}
