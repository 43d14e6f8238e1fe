//! Custom Resource Definitions (CRDs) for redis-operator.
//!
//! - `Redis`: desired master/replica topology, image and auth policy

mod redis;

pub use redis::*;
