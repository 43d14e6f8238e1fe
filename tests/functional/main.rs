// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Functional tests for the Redis convergence engine.
//!
//! These tests drive full reconciliation cycles against the in-memory store
//! WITHOUT requiring a live Kubernetes cluster.
//!
//! ```bash
//! # Run all functional tests
//! cargo test --test functional
//!
//! # Run specific test
//! cargo test --test functional test_demo_topology
//! ```
//!
//! ## Test Categories
//!
//! - **Topology tests**: which resources exist for a given spec and how they
//!   are wired together
//! - **Scenario tests**: multi-cycle behaviour (idempotence, spec changes,
//!   failures, cancellation, pruning)

mod scenario_tests;
mod topology_tests;

pub use fixtures::*;
