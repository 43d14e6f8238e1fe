//! Shared context for the controller.
//!
//! The Context struct holds shared state that is passed to the reconciler:
//! the cluster store, the event recorder, configuration and the shutdown
//! token.

use std::sync::Arc;

use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};
use tokio_util::sync::CancellationToken;

use crate::config::OperatorConfig;
use crate::crd::Redis;
use crate::health::HealthState;
use crate::store::{ClusterStore, FIELD_MANAGER, KubeStore};

/// Shared context for the controller
pub struct Context {
    /// Cluster state the engine converges against
    pub store: Arc<dyn ClusterStore>,
    /// Event recorder, absent when running without an API server
    recorder: Option<Recorder>,
    /// Optional health state for metrics and readiness
    pub health_state: Option<Arc<HealthState>>,
    pub config: OperatorConfig,
    /// Cancelled when the operator shuts down
    pub shutdown: CancellationToken,
}

impl Context {
    /// Create a context backed by the API server
    pub fn new(
        client: Client,
        config: OperatorConfig,
        health_state: Option<Arc<HealthState>>,
        shutdown: CancellationToken,
    ) -> Self {
        let reporter = Reporter {
            controller: FIELD_MANAGER.into(),
            instance: config.pod_name.clone(),
        };
        Self {
            store: Arc::new(KubeStore::new(client.clone())),
            recorder: Some(Recorder::new(client, reporter)),
            health_state,
            config,
            shutdown,
        }
    }

    /// Create a context over an arbitrary store, without event publishing
    pub fn with_store(store: Arc<dyn ClusterStore>, config: OperatorConfig) -> Self {
        Self {
            store,
            recorder: None,
            health_state: None,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Publish a normal event for a resource
    pub async fn publish_normal_event(
        &self,
        resource: &Redis,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.publish(resource, EventType::Normal, reason, action, note)
            .await;
    }

    /// Publish a warning event for a resource
    pub async fn publish_warning_event(
        &self,
        resource: &Redis,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.publish(resource, EventType::Warning, reason, action, note)
            .await;
    }

    async fn publish(
        &self,
        resource: &Redis,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let Some(recorder) = &self.recorder else {
            return;
        };
        let object_ref = resource.object_ref(&());
        if let Err(e) = recorder
            .publish(
                &Event {
                    type_,
                    reason: reason.into(),
                    note,
                    action: action.into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            tracing::warn!(reason = %reason, error = %e, "Failed to publish event");
        }
    }
}
