//! # Error Policy
//!
//! Retry policy for failed reconciliations and classification of watch
//! stream errors.

use crate::controller::labels::InstanceRef;
use crate::controller::reconciler::{BackoffState, Reconciler, ReconcilerError};
use crate::crd::ArgoCD;
use crate::observability;
use kube_runtime::controller::Action;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Requeue a failed instance with its own Fibonacci backoff
///
/// Backoff state is keyed by instance so one failing instance never delays
/// another. A successful cycle resets it.
pub fn handle_reconciliation_error(
    obj: Arc<ArgoCD>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    let instance = InstanceRef::of(&obj);

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        resource.name = instance.name.as_str(),
        resource.namespace = instance.namespace.as_str(),
        error = %error
    );
    let _error_guard = error_span.enter();

    error!("Reconciliation error for {}: {}", instance, error);
    observability::metrics::increment_reconciliation_errors();

    let (backoff_seconds, error_count) = match ctx.backoff_states.lock() {
        Ok(mut states) => {
            let state = states
                .entry(instance.key())
                .or_insert_with(BackoffState::new);
            state.increment_error();
            (state.backoff.next_backoff_seconds(), state.error_count)
        }
        Err(e) => {
            warn!("Failed to lock backoff_states: {}, using default backoff", e);
            (60, 0)
        }
    };

    let next_trigger_time = chrono::Utc::now()
        + chrono::Duration::seconds(i64::try_from(backoff_seconds).unwrap_or(i64::MAX));

    info!(
        "🔄 Retrying with Fibonacci backoff: {}s (error count: {}, trigger source: error-backoff)",
        backoff_seconds, error_count
    );
    info!(
        "📅 Next retry scheduled: {} (in {}s, trigger source: error-backoff)",
        next_trigger_time.to_rfc3339(),
        backoff_seconds
    );

    observability::metrics::increment_requeues_total("error-backoff");
    Action::requeue(Duration::from_secs(backoff_seconds))
}

/// Kind of failure reported by the controller stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorClass {
    /// Credentials rejected; RBAC may have been revoked
    Unauthorized,
    /// Resource version too old; the watch relists
    Expired,
    /// API server throttling or storage reinitializing
    Throttled,
    /// Object or CRD missing
    NotFound,
    Other,
}

impl WatchErrorClass {
    /// Classify a debug-formatted controller error
    ///
    /// Not-found is checked first: a plain-text 404 body surfaces as a
    /// decoding error that also mentions `WatchFailed`.
    #[must_use]
    pub fn classify(error: &str) -> Self {
        let is_not_found = error.contains("ObjectNotFound")
            || error.contains("404")
            || error.contains("not found");
        if (error.contains("401") || error.contains("Unauthorized")) && !is_not_found {
            Self::Unauthorized
        } else if error.contains("410")
            || error.contains("too old resource version")
            || error.contains("Expired")
            || error.contains("Gone")
        {
            Self::Expired
        } else if error.contains("429")
            || error.contains("storage is (re)initializing")
            || error.contains("TooManyRequests")
        {
            Self::Throttled
        } else if is_not_found {
            Self::NotFound
        } else {
            Self::Other
        }
    }

    /// Whether the controller stream keeps running after this error
    #[must_use]
    pub fn continues_stream(self) -> bool {
        self == Self::NotFound
    }
}

/// Handle a watch stream error
///
/// Returns `None` to drop the item and let the stream restart, or `Some(())`
/// to keep going.
pub async fn handle_watch_stream_error(
    error_string: &str,
    backoff: &Arc<AtomicU64>,
    max_backoff_ms: u64,
    watch_restart_delay: Duration,
) -> Option<()> {
    let error_span = tracing::span!(
        tracing::Level::WARN,
        "controller.watch.error",
        error = %error_string
    );
    let _error_guard = error_span.enter();

    let class = WatchErrorClass::classify(error_string);
    match class {
        WatchErrorClass::Unauthorized => {
            error!("❌ Watch authentication failed (401 Unauthorized) - RBAC may have been revoked or token expired");
            error!("🔍 Diagnostics:");
            error!("   1. Verify the operator ClusterRole and ClusterRoleBinding still exist:");
            error!("      kubectl get clusterrole,clusterrolebinding -l app.kubernetes.io/name=argocd-operator");
            error!("   2. Verify the operator may list ArgoCD instances:");
            error!("      kubectl auth can-i list argocds.argoproj.io --all-namespaces --as=system:serviceaccount:<namespace>:argocd-operator");
            error!("   3. If RBAC was recently changed, restart the operator pod");
            warn!(
                "⏳ Waiting {}s before retrying watch (RBAC may need time to propagate)...",
                watch_restart_delay.as_secs()
            );
            tokio::time::sleep(watch_restart_delay).await;
        }
        WatchErrorClass::Expired => {
            warn!("Watch resource version expired (410), watch will restart");
            warn!(error_type = "410", "watch.error.resource_version_expired");
        }
        WatchErrorClass::Throttled => {
            let current_backoff = backoff.load(Ordering::Relaxed);
            warn!(
                "API server throttling or reinitializing (429), backing off for {}ms before restart...",
                current_backoff
            );
            tokio::time::sleep(Duration::from_millis(current_backoff)).await;
            backoff.store(current_backoff.saturating_mul(2).min(max_backoff_ms), Ordering::Relaxed);
        }
        WatchErrorClass::NotFound => {
            warn!(
                "Resource not found (404) - normal after deletions, or the ArgoCD CRD is missing. Error: {}",
                error_string
            );
        }
        WatchErrorClass::Other => {
            error!("Controller stream error: {}", error_string);
            tokio::time::sleep(watch_restart_delay).await;
        }
    }
    class.continues_stream().then_some(())
}
