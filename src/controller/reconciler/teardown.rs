//! # Teardown
//!
//! Runs while the finalizer holds a deleted instance. Namespaced objects in
//! the instance namespace are garbage collected through owner references;
//! everything else is removed here:
//!
//! 1. cluster roles and bindings selected by back-reference labels
//! 2. RBAC placed in managed and source namespaces, source namespace claims,
//!    and optionally the `managed-by` labels
//! 3. the finalizer
//!
//! Any failure leaves the finalizer in place so the next attempt repeats the
//! cleanup.

use crate::cluster::{ClusterApi, ClusterError, Kind, ObjectKey};
use crate::constants::FINALIZER;
use crate::controller::labels::InstanceRef;
use crate::controller::reconciler::types::Reconciler;
use crate::controller::tenancy::Tenancy;
use crate::crd::ArgoCD;
use anyhow::{Context, Result};
use serde_json::json;
use tracing::{debug, info};

#[must_use]
pub fn has_finalizer(cr: &ArgoCD) -> bool {
    cr.metadata
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|x| x == FINALIZER))
}

fn instance_key(cr: &ArgoCD) -> ObjectKey {
    let instance = InstanceRef::of(cr);
    ObjectKey::namespaced(Kind::ArgoCD, instance.namespace, instance.name)
}

/// Edit the finalizer list of the stored instance
///
/// The list is read fresh and written back with the resourceVersion it was
/// read at, so finalizers owned by other controllers survive and a concurrent
/// change fails with a conflict. Returns whether a write happened.
async fn update_finalizers(
    cluster: &dyn ClusterApi,
    cr: &ArgoCD,
    edit: impl FnOnce(&mut Vec<String>),
) -> Result<bool, ClusterError> {
    let key = instance_key(cr);
    let Some(current) = cluster.get(&key).await? else {
        return Ok(false);
    };
    let before = current.metadata.finalizers.unwrap_or_default();
    let mut finalizers = before.clone();
    edit(&mut finalizers);
    if finalizers == before {
        return Ok(false);
    }
    let patch = json!({
        "metadata": {
            "resourceVersion": current.metadata.resource_version,
            "finalizers": finalizers,
        }
    });
    cluster.patch(&key, &patch).await?;
    Ok(true)
}

/// Persist the finalizer on a live instance
pub async fn add_finalizer(cluster: &dyn ClusterApi, cr: &ArgoCD) -> Result<()> {
    let added = update_finalizers(cluster, cr, |finalizers| {
        if !finalizers.iter().any(|f| f == FINALIZER) {
            finalizers.push(FINALIZER.to_string());
        }
    })
    .await
    .context("Failed to add finalizer")?;
    if added {
        info!("Added finalizer to {}", InstanceRef::of(cr));
    }
    Ok(())
}

async fn remove_finalizer(cluster: &dyn ClusterApi, cr: &ArgoCD) -> Result<()> {
    update_finalizers(cluster, cr, |finalizers| finalizers.retain(|f| f != FINALIZER))
        .await
        .context("Failed to remove finalizer")?;
    Ok(())
}

/// Delete cluster-scoped objects carrying the instance back-reference
async fn delete_cluster_scoped(cluster: &dyn ClusterApi, instance: &InstanceRef) -> Result<usize> {
    let selector = instance.selector();
    let mut deleted = 0;
    for kind in [Kind::ClusterRoleBinding, Kind::ClusterRole] {
        let objects = cluster
            .list(kind, None, Some(&selector))
            .await
            .with_context(|| format!("Failed to list {kind}s of {instance}"))?;
        for obj in objects {
            let key = ObjectKey::of(kind, &obj);
            if cluster
                .delete(&key)
                .await
                .with_context(|| format!("Failed to delete {key}"))?
            {
                debug!("Deleted {}", key);
                deleted += 1;
            }
        }
    }
    Ok(deleted)
}

/// Clean up everything owner references do not cover, then release the instance
pub async fn finalize(ctx: &Reconciler, cr: &ArgoCD) -> Result<()> {
    let instance = InstanceRef::of(cr);
    let cluster = ctx.cluster.as_ref();
    info!("🧹 Tearing down {}", instance);

    let deleted = delete_cluster_scoped(cluster, &instance).await?;
    Tenancy::new(cluster, cr)
        .release_all(ctx.settings.remove_managed_by_label_on_deletion)
        .await
        .context("Failed to release managed namespaces")?;
    remove_finalizer(cluster, cr).await?;
    ctx.forget(&instance.key());

    info!(
        "✅ Teardown complete for {} ({} cluster-scoped objects deleted)",
        instance, deleted
    );
    Ok(())
}
