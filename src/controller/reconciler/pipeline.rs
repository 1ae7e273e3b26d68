//! # Resource Pipeline
//!
//! The fixed stage order for a live instance. Each stage carries its failure
//! policy:
//!
//! | Stage | On failure |
//! |---|---|
//! | provider | rejected or unbuildable requests stay local to the stage, API errors abort |
//! | status | logged |
//! | rbac, trust, configuration, network, workloads, optional components | abort the cycle |
//! | monitoring | logged |
//!
//! RBAC for namespaces that left the instance is pruned after the last stage.

use super::status::{self, ProviderOutcome, CONDITION_SOURCE_NAMESPACES_CLAIMED};
use super::types::Reconciler;
use crate::controller::apply::Applier;
use crate::controller::labels::InstanceRef;
use crate::controller::resources::applicationset::ApplicationSet;
use crate::controller::resources::config::Configuration;
use crate::controller::resources::monitoring::Monitoring;
use crate::controller::resources::network::Network;
use crate::controller::resources::notifications::Notifications;
use crate::controller::resources::rbac::Rbac;
use crate::controller::resources::rollouts::Rollouts;
use crate::controller::resources::trust::Trust;
use crate::controller::resources::workloads::Workloads;
use crate::controller::resources::{BuildContext, ManagedKind};
use crate::controller::sso::{deprecated_fields, ProviderError, ProviderMachine};
use crate::controller::tenancy::{NamespaceSets, Tenancy};
use crate::crd::{ArgoCD, ConditionStatus};
use crate::observability;
use crate::observability::events::{actions, reasons};
use anyhow::{Context, Result};
use kube::runtime::events::EventType;
use kube::Resource;
use tracing::{debug, error, info, warn, Instrument};

/// What a stage failure does to the rest of the cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Rejected requests are logged and reflected in status while later
    /// stages still run; API errors abort the cycle
    StageLocal,
    /// The cycle stops and the error is returned for retry
    Fatal,
    /// Logged only
    BestEffort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Provider,
    Status,
    Rbac,
    Trust,
    Configuration,
    Network,
    Workloads,
    Optional,
    Monitoring,
}

const RBAC: &[&dyn ManagedKind] = &[&Rbac];
const TRUST: &[&dyn ManagedKind] = &[&Trust];
const CONFIGURATION: &[&dyn ManagedKind] = &[&Configuration];
const NETWORK: &[&dyn ManagedKind] = &[&Network];
const WORKLOADS: &[&dyn ManagedKind] = &[&Workloads];
const OPTIONAL: &[&dyn ManagedKind] = &[&ApplicationSet, &Notifications, &Rollouts];
const MONITORING: &[&dyn ManagedKind] = &[&Monitoring];

impl Stage {
    pub const ORDER: [Stage; 9] = [
        Stage::Provider,
        Stage::Status,
        Stage::Rbac,
        Stage::Trust,
        Stage::Configuration,
        Stage::Network,
        Stage::Workloads,
        Stage::Optional,
        Stage::Monitoring,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Provider => "provider",
            Stage::Status => "status",
            Stage::Rbac => "rbac",
            Stage::Trust => "trust",
            Stage::Configuration => "configuration",
            Stage::Network => "network",
            Stage::Workloads => "workloads",
            Stage::Optional => "optional-components",
            Stage::Monitoring => "monitoring",
        }
    }

    #[must_use]
    pub fn policy(self) -> FailurePolicy {
        match self {
            Stage::Provider => FailurePolicy::StageLocal,
            Stage::Status | Stage::Monitoring => FailurePolicy::BestEffort,
            _ => FailurePolicy::Fatal,
        }
    }

    /// Resource groups applied by this stage; provider and status run their own logic
    #[must_use]
    pub fn handlers(self) -> &'static [&'static dyn ManagedKind] {
        match self {
            Stage::Provider | Stage::Status => &[],
            Stage::Rbac => RBAC,
            Stage::Trust => TRUST,
            Stage::Configuration => CONFIGURATION,
            Stage::Network => NETWORK,
            Stage::Workloads => WORKLOADS,
            Stage::Optional => OPTIONAL,
            Stage::Monitoring => MONITORING,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Apply every handler of a stage in order
async fn apply_stage(
    applier: &Applier<'_>,
    stage: Stage,
    cr: &ArgoCD,
    build: &BuildContext,
) -> Result<()> {
    for handler in stage.handlers() {
        let intents = handler
            .intents(cr, build)
            .with_context(|| format!("Failed to build {} resources", handler.component()))?;
        let outcomes = applier
            .apply_all(intents, handler.component())
            .await
            .with_context(|| format!("Failed to apply {} resources", handler.component()))?;
        let writes = outcomes.iter().filter(|(_, o)| o.is_write()).count();
        debug!(
            component = handler.component(),
            "{} objects converged, {} written",
            outcomes.len(),
            writes
        );
    }
    Ok(())
}

/// Warn once per instance about each deprecated field in use
async fn warn_deprecations(ctx: &Reconciler, cr: &ArgoCD, instance: &InstanceRef) {
    for (field, replacement) in deprecated_fields(cr, &ctx.settings) {
        if !ctx.deprecations.warn_once(&instance.key(), field) {
            continue;
        }
        let note = format!("{field} is deprecated, use {replacement}");
        warn!("⚠️  {}: {}", instance, note);
        ctx.events
            .publish(
                &cr.object_ref(&()),
                EventType::Warning,
                reasons::DEPRECATED_FIELD,
                actions::RECONCILE,
                Some(note),
            )
            .await;
    }
}

/// Surface source namespaces claimed by another instance
///
/// The event is only published when the contested set changes.
async fn report_lost_claims(ctx: &Reconciler, cr: &ArgoCD, namespaces: &NamespaceSets) {
    if namespaces.lost.is_empty() {
        return;
    }
    observability::metrics::increment_namespace_claims_lost(namespaces.lost.len());
    let message = status::lost_claims_message(namespaces);
    let already_reported = cr
        .status
        .as_ref()
        .and_then(|s| s.condition(CONDITION_SOURCE_NAMESPACES_CLAIMED))
        .is_some_and(|c| {
            c.status == ConditionStatus::False && c.message.as_deref() == Some(message.as_str())
        });
    if already_reported {
        return;
    }
    ctx.events
        .publish(
            &cr.object_ref(&()),
            EventType::Warning,
            reasons::NAMESPACE_CLAIM_LOST,
            actions::RECONCILE,
            Some(message),
        )
        .await;
}

async fn provider_stage(
    ctx: &Reconciler,
    applier: &Applier<'_>,
    cr: &ArgoCD,
    build: &BuildContext,
) -> Result<ProviderOutcome> {
    let result = ProviderMachine::new(ctx.cluster.as_ref(), applier, cr, build)
        .reconcile()
        .await;
    let outcome = ProviderOutcome::from(&result);
    match result {
        Ok(provider) => {
            debug!(
                "SSO provider: {}",
                provider.map_or("none", |p| p.as_str())
            );
        }
        Err(ProviderError::Validation(e)) => {
            ctx.events
                .publish(
                    &cr.object_ref(&()),
                    EventType::Warning,
                    reasons::SSO_VALIDATION_FAILED,
                    actions::RECONCILE,
                    Some(e.to_string()),
                )
                .await;
        }
        Err(e @ ProviderError::Build { .. }) => {
            error!("❌ SSO provider stage failed: {}", e);
        }
        Err(e) => return Err(anyhow::Error::new(e).context("SSO provider stage failed")),
    }
    Ok(outcome)
}

/// Run every stage for a live instance, then prune RBAC from namespaces that left it
pub async fn run(ctx: &Reconciler, cr: &ArgoCD) -> Result<()> {
    let instance = InstanceRef::of(cr);
    let cluster = ctx.cluster.as_ref();

    let tenancy = Tenancy::new(cluster, cr);
    let namespaces = tenancy
        .compute()
        .await
        .context("Failed to compute managed namespaces")?;
    report_lost_claims(ctx, cr, &namespaces).await;

    let build = BuildContext::load(
        cluster,
        cr,
        ctx.settings.clone(),
        ctx.features.snapshot(),
        namespaces,
    )
    .await?;
    warn_deprecations(ctx, cr, &instance).await;

    let applier = Applier::new(cluster, &ctx.hooks, cr);
    let mut provider = ProviderOutcome::Active(None);
    let mut projected = None;

    for stage in Stage::ORDER {
        let span = tracing::span!(
            tracing::Level::INFO,
            "controller.reconcile.stage",
            stage = stage.as_str()
        );
        let result = match stage {
            Stage::Provider => provider_stage(ctx, &applier, cr, &build)
                .instrument(span)
                .await
                .map(|outcome| provider = outcome),
            Stage::Status => {
                async {
                    let status = status::project(cluster, cr, &provider, &build.namespaces).await?;
                    status::write(cluster, cr, &status).await?;
                    Ok::<_, anyhow::Error>(status)
                }
                .instrument(span)
                .await
                .map(|status| projected = Some(status))
            }
            _ => apply_stage(&applier, stage, cr, &build).instrument(span).await,
        };

        let Err(e) = result else {
            continue;
        };
        if stage.policy() == FailurePolicy::BestEffort {
            warn!("⚠️  Stage {} failed for {}, continuing: {:#}", stage, instance, e);
            continue;
        }
        error!("❌ Stage {} failed for {}: {:#}", stage, instance, e);
        let marked = status::mark_failed(cluster, cr, projected.as_ref(), stage.as_str(), &e).await;
        if let Err(status_err) = marked {
            warn!("Failed to record failure in status: {}", status_err);
        }
        return Err(e.context(format!("{stage} stage failed")));
    }

    let pruned = tenancy
        .prune(&build.namespaces)
        .await
        .context("Failed to prune namespace RBAC")?;
    if pruned > 0 {
        info!("Pruned {} RBAC objects for {}", pruned, instance);
    }
    Ok(())
}
