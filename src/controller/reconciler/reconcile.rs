//! # Reconcile
//!
//! Entry point invoked by the controller runtime for one instance.

use super::pipeline;
use super::teardown;
use super::types::{Reconciler, ReconcilerError};
use crate::cluster::{from_dynamic, Kind, ObjectKey};
use crate::controller::labels::InstanceRef;
use crate::crd::ArgoCD;
use crate::observability;
use anyhow::Context;
use kube::runtime::controller::Action;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

async fn fetch(ctx: &Reconciler, instance: &InstanceRef) -> anyhow::Result<Option<ArgoCD>> {
    let key = ObjectKey::namespaced(Kind::ArgoCD, &instance.namespace, &instance.name);
    let Some(obj) = ctx
        .cluster
        .get(&key)
        .await
        .with_context(|| format!("Failed to get {key}"))?
    else {
        return Ok(None);
    };
    let cr = from_dynamic(&obj).with_context(|| format!("Failed to decode {key}"))?;
    Ok(Some(cr))
}

/// Drive one instance towards its desired state
///
/// The object handed in by the runtime may be stale, so the current version is
/// read first. Deleted instances are torn down once; live ones get the
/// finalizer and then the full pipeline.
pub async fn reconcile(cr: Arc<ArgoCD>, ctx: Arc<Reconciler>) -> Result<Action, ReconcilerError> {
    let start = Instant::now();
    let instance = InstanceRef::of(&cr);
    observability::increment_reconciliations();

    let Some(mut current) = fetch(&ctx, &instance).await? else {
        debug!("{} no longer exists, nothing to do", instance);
        ctx.forget(&instance.key());
        return Ok(Action::await_change());
    };

    if current.metadata.deletion_timestamp.is_some() {
        if teardown::has_finalizer(&current) {
            teardown::finalize(&ctx, &current).await?;
        } else {
            debug!("{} is being deleted without our finalizer", instance);
        }
        return Ok(Action::await_change());
    }

    if !teardown::has_finalizer(&current) {
        teardown::add_finalizer(ctx.cluster.as_ref(), &current).await?;
        // pick up the resourceVersion of our own write; `current` is otherwise live
        match fetch(&ctx, &instance).await? {
            Some(refreshed) => current = refreshed,
            None => return Ok(Action::await_change()),
        }
    }

    pipeline::run(&ctx, &current).await?;

    if ctx.reset_backoff(&instance.key()) {
        info!("Backoff reset for {} after successful reconciliation", instance);
    }
    observability::observe_reconciliation_duration(start.elapsed().as_secs_f64());
    info!(
        "✅ Reconciliation complete for {} in {:.2}s, next resync in {}s",
        instance,
        start.elapsed().as_secs_f64(),
        ctx.resync_interval.as_secs()
    );
    observability::increment_requeues_total("timer-based");
    Ok(Action::requeue(ctx.resync_interval))
}
