//! redis-operator library crate
//!
//! This module exports the controller, CRD definitions, resource builders and
//! the cluster store abstraction.

pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod resources;
pub mod store;

pub use config::OperatorConfig;
pub use health::HealthState;

use std::sync::Arc;

use futures::{Stream, StreamExt};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{Controller, WatchStreamExt, metadata_watcher, predicates, reflector, watcher};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use controller::{context::Context, reconciler::reconcile};
use crd::Redis;

/// Create namespaced or cluster-wide API based on scope
pub fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Create the default watcher configuration.
///
/// - `any_semantic()`: More reliable resource discovery in test environments
fn default_watcher_config() -> WatcherConfig {
    WatcherConfig::default().any_semantic()
}

/// Create a filtered stream for a resource type with standard optimizations.
///
/// This creates a reflector-backed stream that:
/// - Maintains an in-memory cache via reflector
/// - Uses automatic retry with exponential backoff on errors
/// - Converts watch events to objects (Added/Modified only)
/// - Filters out status-only updates via generation predicate
///
/// Returns the reflector store (for cache lookups) and the filtered stream.
fn create_filtered_stream<K>(
    api: Api<K>,
    watcher_config: WatcherConfig,
) -> (
    reflector::Store<K>,
    impl Stream<Item = Result<K, watcher::Error>>,
)
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug + Send + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    let (reader, writer) = reflector::store();
    let stream = reflector(writer, watcher(api, watcher_config))
        .default_backoff()
        .applied_objects()
        .predicate_filter(predicates::generation);
    (reader, stream)
}

/// Run the Redis controller.
///
/// Watches `Redis` objects in `config.watch_namespace` (or cluster-wide) and
/// the Deployments, Services and Secrets they own. In-flight cycles stop at
/// their next store call once `shutdown` is cancelled. If health_state is
/// provided, metrics are recorded for reconciliations.
pub async fn run_controller(
    client: Client,
    config: OperatorConfig,
    health_state: Option<Arc<HealthState>>,
    shutdown: CancellationToken,
) {
    let namespace = config.watch_namespace.clone();
    let scope = namespace.as_deref();
    info!(
        "Starting controller for Redis resources (scope: {})",
        scope.unwrap_or("cluster-wide")
    );

    // Mark as ready once we start the controller
    if let Some(ref state) = health_state {
        state.set_ready(true).await;
    }

    let ctx = Arc::new(Context::new(
        client.clone(),
        config.clone(),
        health_state,
        shutdown.clone(),
    ));

    let redis: Api<Redis> = scoped_api(client.clone(), scope);
    let deployments: Api<Deployment> = scoped_api(client.clone(), scope);
    let services: Api<Service> = scoped_api(client.clone(), scope);
    let secrets: Api<Secret> = scoped_api(client.clone(), scope);

    let watcher_config = default_watcher_config();
    let (reader, redis_stream) = create_filtered_stream(redis, watcher_config.clone());

    // Owned objects are only watched for their existence and changes, so the
    // metadata watcher is enough for all of them.
    Controller::for_stream(redis_stream, reader)
        .owns_stream(metadata_watcher(deployments, watcher_config.clone()).touched_objects())
        .owns_stream(metadata_watcher(services, watcher_config.clone()).touched_objects())
        .owns_stream(metadata_watcher(secrets, watcher_config).touched_objects())
        .run(reconcile, controller::reconciler::error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    debug!("Reconciled: {}", obj.name);
                }
                Err(e) => {
                    // Events for a deleted Redis can still arrive from owned objects
                    let expected = match &e {
                        kube::runtime::controller::Error::ObjectNotFound(_) => true,
                        kube::runtime::controller::Error::ReconcilerFailed(err, _) => {
                            err.is_not_found() || err.is_cancelled()
                        }
                        _ => false,
                    };
                    if expected {
                        debug!("Reconciliation skipped: {:?}", e);
                    } else {
                        error!("Reconciliation error: {:?}", e);
                    }
                }
            }
        })
        .await;

    // This should never complete in normal operation
    error!("Controller stream ended unexpectedly");
}
