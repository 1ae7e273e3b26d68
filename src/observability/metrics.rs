//! # Metrics
//!
//! Prometheus metrics for monitoring the operator.
//!
//! ## Metrics Exposed
//!
//! - `argocd_operator_reconciliations_total` - Total number of reconciliations
//! - `argocd_operator_reconciliation_errors_total` - Total number of reconciliation errors
//! - `argocd_operator_reconciliation_duration_seconds` - Duration of reconciliation operations
//! - `argocd_operator_requeues_total` - Requeues by reason (timer-based, error-backoff)
//! - `argocd_operator_resource_operations_total` - Managed object operations by kind and outcome
//! - `argocd_operator_sso_validation_errors_total` - Contradictory SSO provider requests
//! - `argocd_operator_namespace_claims_lost_total` - Source namespaces already claimed elsewhere

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, Registry};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "argocd_operator_reconciliations_total",
        "Total number of reconciliations",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "argocd_operator_reconciliation_errors_total",
        "Total number of reconciliation errors",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "argocd_operator_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "argocd_operator_requeues_total",
            "Total number of requeues by trigger reason",
        ),
        &["reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

static RESOURCE_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "argocd_operator_resource_operations_total",
            "Total number of managed object operations by kind and outcome",
        ),
        &["kind", "outcome"],
    )
    .expect("Failed to create RESOURCE_OPERATIONS_TOTAL metric - this should never happen")
});

static SSO_VALIDATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "argocd_operator_sso_validation_errors_total",
        "Total number of rejected SSO provider configurations",
    )
    .expect("Failed to create SSO_VALIDATION_ERRORS_TOTAL metric - this should never happen")
});

static NAMESPACE_CLAIMS_LOST_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "argocd_operator_namespace_claims_lost_total",
        "Total number of source namespaces found claimed by another instance",
    )
    .expect("Failed to create NAMESPACE_CLAIMS_LOST_TOTAL metric - this should never happen")
});

pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RESOURCE_OPERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SSO_VALIDATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(NAMESPACE_CLAIMS_LOST_TOTAL.clone()))?;

    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_requeues_total(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}

pub fn increment_resource_operations(kind: &str, outcome: &str) {
    RESOURCE_OPERATIONS_TOTAL
        .with_label_values(&[kind, outcome])
        .inc();
}

pub fn increment_sso_validation_errors() {
    SSO_VALIDATION_ERRORS_TOTAL.inc();
}

pub fn increment_namespace_claims_lost(count: usize) {
    NAMESPACE_CLAIMS_LOST_TOTAL.inc_by(u64::try_from(count).unwrap_or(u64::MAX));
}
