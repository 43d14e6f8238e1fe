//! Controller module for redis-operator.
//!
//! Contains the convergence engine, the kube-runtime reconcile entry point,
//! error handling and status management.

pub mod context;
pub mod engine;
pub mod error;
pub mod reconciler;
pub mod status;
