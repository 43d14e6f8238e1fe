//! Reconciliation loop for Redis.
//!
//! Wraps one engine cycle with status conditions, events and metrics for the
//! kube-runtime controller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::ResourceExt;
use kube::runtime::controller::Action;
use tracing::{debug, error, info, warn};

use crate::controller::context::Context;
use crate::controller::engine::{Engine, OperationResult, Outcome};
use crate::controller::error::Error;
use crate::controller::status::{ConditionBuilder, same_conditions};
use crate::crd::{Redis, RedisStatus};
use crate::store::RedisKey;

/// Requeue interval after a converged cycle
pub const RESYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Reconcile a Redis
///
/// Runs one convergence cycle and records its result on the `Ready`
/// condition.
pub async fn reconcile(obj: Arc<Redis>, ctx: Arc<Context>) -> Result<Action, Error> {
    let start_time = Instant::now();
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    let key = RedisKey::new(namespace.clone(), name.clone());

    debug!(name = %name, namespace = %namespace, "Reconciling Redis");

    let engine = Engine::new(ctx.store.as_ref()).with_prune(ctx.config.prune_disabled_resources);
    let outcome = match engine.reconcile(&key, &ctx.shutdown).await {
        Ok(outcome) => outcome,
        Err(e) if e.is_cancelled() => return Err(e),
        Err(e) => {
            ctx.publish_warning_event(&obj, "ReconcileFailed", "Reconciling", Some(e.to_string()))
                .await;
            if let Err(status_err) =
                write_ready(&ctx, &key, &obj, false, "ReconcileFailed", &e.to_string()).await
            {
                warn!(name = %name, error = %status_err, "Failed to record failure status");
            }
            return Err(e);
        }
    };

    let convergence = match outcome {
        Outcome::NoOp => {
            debug!(name = %name, namespace = %namespace, "Redis no longer exists");
            return Ok(Action::await_change());
        }
        Outcome::Converged(convergence) => convergence,
    };

    for report in convergence.with_result(OperationResult::Created) {
        ctx.publish_normal_event(
            &convergence.redis,
            "Created",
            "Reconciling",
            Some(format!("Created {} {}", report.kind, report.name)),
        )
        .await;
    }

    if convergence.changed() {
        info!(
            name = %name,
            namespace = %namespace,
            created = convergence.count(OperationResult::Created),
            updated = convergence.count(OperationResult::Updated),
            pruned = convergence.count(OperationResult::Pruned),
            "Redis converged"
        );
    }

    write_ready(
        &ctx,
        &key,
        &convergence.redis,
        true,
        "Converged",
        "All managed resources converged",
    )
    .await?;

    // Record metrics
    if let Some(ref health_state) = ctx.health_state {
        let duration = start_time.elapsed().as_secs_f64();
        health_state
            .metrics
            .record_reconcile(&namespace, &name, duration);
        for report in &convergence.resources {
            health_state
                .metrics
                .record_operation(report.kind.as_str(), report.result.as_str());
        }
        health_state.mark_reconciled();
    }

    Ok(Action::requeue(RESYNC_INTERVAL))
}

/// Upsert the `Ready` condition, skipping the write when nothing changed.
async fn write_ready(
    ctx: &Context,
    key: &RedisKey,
    redis: &Redis,
    ready: bool,
    reason: &str,
    message: &str,
) -> Result<(), Error> {
    let generation = redis.metadata.generation;
    let current = redis.status.clone().unwrap_or_default();

    let mut builder = ConditionBuilder::from_existing(&current.conditions);
    builder.ready(ready, reason, message, generation);
    let status = RedisStatus {
        conditions: builder.build(),
        observed_generation: if ready {
            generation
        } else {
            current.observed_generation
        },
    };

    if same_conditions(&status.conditions, &current.conditions)
        && status.observed_generation == current.observed_generation
    {
        return Ok(());
    }

    ctx.store
        .update_status(key, &status)
        .await
        .map_err(|source| Error::StoreWrite {
            kind: "Redis",
            name: key.to_string(),
            source,
        })
}

/// Error policy for the controller
pub fn error_policy(obj: Arc<Redis>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    if error.is_cancelled() {
        debug!(name = %name, "Reconciliation cancelled by shutdown");
        return Action::await_change();
    }

    // Record error metric
    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_error(&namespace, &name);
    }

    if error.is_not_found() {
        debug!(name = %name, "Resource not found (likely deleted)");
        return Action::await_change();
    }

    if error.is_retryable() {
        warn!(name = %name, error = %error, "Retryable error, will retry");
    } else {
        error!(name = %name, error = %error, "Non-retryable error");
    }
    Action::requeue(error.requeue_after())
}
