//! Resource generation module.
//!
//! Contains the builders for every Kubernetes resource owned by a Redis.
//!
//! ## Resources Generated
//!
//! | Resource | Name | Exists when |
//! |----------|------|-------------|
//! | Secret | `<name>-auth-secret` | no `existingSecret` is set |
//! | Service | `<name>-redis-master` | `master.count > 0` |
//! | Deployment | `<name>-redis-master` | `master.count >= 1` |
//! | Service | `<name>-redis-replica` | `replica.count > 0` |
//! | Deployment | `<name>-redis-replica` | `replica.count >= 1` |

pub mod builder;
pub mod common;
pub mod deployment;
pub mod secret;
pub mod services;

pub use builder::{ManagedResource, ResourceBuilder, ResourceKind, resource_builders};
pub use common::{Role, set_owner};
