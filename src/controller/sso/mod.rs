//! # SSO Provider State Machine
//!
//! An instance runs at most one single sign-on provider: none, Dex or
//! Keycloak. Every cycle the requested provider is derived from the spec and
//! validated, the resources of any other provider still present in the
//! cluster are deleted, and the requested provider's resources are ensured.
//!
//! A contradictory request is rejected before anything is touched, so a bad
//! edit never tears down a working provider.
//!
//! ## Module Structure
//!
//! - `dex.rs` - Dex service account, role, service and deployment
//! - `keycloak.rs` - Keycloak credentials, service, deployment and exposure

mod dex;
mod keycloak;

pub use dex::DexResources;
pub use keycloak::KeycloakResources;

use crate::cluster::{ClusterApi, ClusterError, ObjectKey};
use crate::config::OperatorSettings;
use crate::controller::apply::{Applier, ApplyError, Intent};
use crate::controller::resources::{BuildContext, ManagedKind};
use crate::crd::{ArgoCD, SsoProviderType};
use crate::observability;
use std::collections::HashSet;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{error, info};

/// Contradictory or unsatisfiable provider selection
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SsoValidationError {
    #[error("multiple SSO providers configured: spec.sso.provider is keycloak but spec.sso.dex is set")]
    KeycloakWithDexConfig,
    #[error("multiple SSO providers configured: spec.sso.provider is dex but spec.sso.keycloak is set")]
    DexWithKeycloakConfig,
    #[error("multiple SSO providers configured: both spec.sso and the deprecated spec.dex are set")]
    LegacyDexWithSso,
    #[error("spec.sso is set but spec.sso.provider is empty")]
    MissingProvider,
    #[error("dex is requested but disabled by DISABLE_DEX")]
    DexDisabled,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Validation(#[from] SsoValidationError),
    #[error("Failed to build {provider} resources: {source:#}")]
    Build {
        provider: SsoProviderType,
        #[source]
        source: anyhow::Error,
    },
    #[error(transparent)]
    Apply(#[from] ApplyError),
    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

/// Whether the deprecated top-level `spec.dex` block asks for Dex
#[must_use]
pub fn legacy_dex_requested(cr: &ArgoCD, settings: &OperatorSettings) -> bool {
    !settings.disable_dex && cr.spec.dex.as_ref().is_some_and(|d| d.is_configured())
}

/// The provider the spec asks for, or why the request cannot be honoured
pub fn requested_provider(
    cr: &ArgoCD,
    settings: &OperatorSettings,
) -> Result<Option<SsoProviderType>, SsoValidationError> {
    let legacy = legacy_dex_requested(cr, settings);
    let Some(sso) = &cr.spec.sso else {
        return Ok(legacy.then_some(SsoProviderType::Dex));
    };
    if legacy {
        return Err(SsoValidationError::LegacyDexWithSso);
    }
    match sso.provider {
        None => Err(SsoValidationError::MissingProvider),
        Some(SsoProviderType::Keycloak) if sso.dex.is_some() => {
            Err(SsoValidationError::KeycloakWithDexConfig)
        }
        Some(SsoProviderType::Keycloak) => Ok(Some(SsoProviderType::Keycloak)),
        Some(SsoProviderType::Dex) if sso.keycloak.is_some() => {
            Err(SsoValidationError::DexWithKeycloakConfig)
        }
        Some(SsoProviderType::Dex) if settings.disable_dex => Err(SsoValidationError::DexDisabled),
        Some(SsoProviderType::Dex) => Ok(Some(SsoProviderType::Dex)),
    }
}

/// Deprecated fields the instance still uses, as `(field, replacement)`
#[must_use]
pub fn deprecated_fields(
    cr: &ArgoCD,
    settings: &OperatorSettings,
) -> Vec<(&'static str, &'static str)> {
    let mut fields = Vec::new();
    if legacy_dex_requested(cr, settings) {
        fields.push(("spec.dex", "spec.sso.provider: dex with spec.sso.dex"));
    }
    if let Some(sso) = &cr.spec.sso {
        if sso.image.is_some() || sso.version.is_some() {
            fields.push((
                "spec.sso.image",
                "spec.sso.keycloak.image and spec.sso.keycloak.version",
            ));
        }
        if sso.verify_tls.is_some() {
            fields.push(("spec.sso.verifyTLS", "spec.sso.keycloak.verifyTLS"));
        }
        if sso.resources.is_some() {
            fields.push(("spec.sso.resources", "spec.sso.keycloak.resources"));
        }
    }
    fields
}

/// Remembers which deprecation warnings were already emitted per instance
#[derive(Debug, Default)]
pub struct DeprecationTracker {
    warned: Mutex<HashSet<(String, &'static str)>>,
}

impl DeprecationTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true the first time `field` is seen for `instance`
    pub fn warn_once(&self, instance: &str, field: &'static str) -> bool {
        let entry = (instance.to_string(), field);
        match self.warned.lock() {
            Ok(mut warned) => warned.insert(entry),
            Err(poisoned) => poisoned.into_inner().insert(entry),
        }
    }

    /// Drop all state for a deleted instance
    pub fn forget(&self, instance: &str) {
        match self.warned.lock() {
            Ok(mut warned) => warned.retain(|(key, _)| key != instance),
            Err(poisoned) => poisoned.into_inner().retain(|(key, _)| key != instance),
        }
    }
}

const PROVIDERS: [SsoProviderType; 2] = [SsoProviderType::Dex, SsoProviderType::Keycloak];

fn handler(provider: SsoProviderType) -> &'static dyn ManagedKind {
    match provider {
        SsoProviderType::Dex => &DexResources,
        SsoProviderType::Keycloak => &KeycloakResources,
    }
}

/// Object keys a provider may own, derived from names alone
fn provider_keys(provider: SsoProviderType, cr: &ArgoCD, ctx: &BuildContext) -> Vec<ObjectKey> {
    match provider {
        SsoProviderType::Dex => dex::keys(cr),
        SsoProviderType::Keycloak => keycloak::keys(cr, ctx),
    }
}

fn intents(
    provider: SsoProviderType,
    cr: &ArgoCD,
    ctx: &BuildContext,
) -> Result<Vec<Intent>, ProviderError> {
    handler(provider)
        .intents(cr, ctx)
        .map_err(|source| ProviderError::Build { provider, source })
}

/// Drives one instance between None, Dex and Keycloak
pub struct ProviderMachine<'a> {
    cluster: &'a dyn ClusterApi,
    applier: &'a Applier<'a>,
    cr: &'a ArgoCD,
    ctx: &'a BuildContext,
}

impl std::fmt::Debug for ProviderMachine<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderMachine")
            .field("applier", &self.applier)
            .finish_non_exhaustive()
    }
}

impl<'a> ProviderMachine<'a> {
    #[must_use]
    pub fn new(
        cluster: &'a dyn ClusterApi,
        applier: &'a Applier<'a>,
        cr: &'a ArgoCD,
        ctx: &'a BuildContext,
    ) -> Self {
        Self {
            cluster,
            applier,
            cr,
            ctx,
        }
    }

    /// Providers with at least one object left in the cluster
    pub async fn active(&self) -> Result<Vec<SsoProviderType>, ProviderError> {
        let mut active = Vec::new();
        for provider in PROVIDERS {
            for key in provider_keys(provider, self.cr, self.ctx) {
                if self.cluster.get(&key).await?.is_some() {
                    active.push(provider);
                    break;
                }
            }
        }
        Ok(active)
    }

    /// Validate, tear down other providers, then ensure the requested one
    pub async fn reconcile(&self) -> Result<Option<SsoProviderType>, ProviderError> {
        let requested = match requested_provider(self.cr, &self.ctx.settings) {
            Ok(requested) => requested,
            Err(e) => {
                observability::metrics::increment_sso_validation_errors();
                error!("❌ SSO validation failed, provider resources left untouched: {}", e);
                return Err(e.into());
            }
        };

        for provider in self.active().await? {
            if Some(provider) == requested {
                continue;
            }
            info!(
                "Removing {} resources (requested provider: {})",
                provider,
                requested.map_or("none", |p| p.as_str())
            );
            let removal = provider_keys(provider, self.cr, self.ctx)
                .into_iter()
                .map(Intent::Absent)
                .collect();
            self.applier.apply_all(removal, provider.as_str()).await?;
        }

        if let Some(provider) = requested {
            let desired = intents(provider, self.cr, self.ctx)?;
            self.applier.apply_all(desired, provider.as_str()).await?;
        }
        Ok(requested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::FakeCluster;
    use crate::cluster::{Kind, ObjectKey};
    use crate::cluster::FeatureSnapshot;
    use crate::controller::hooks::HookRegistry;
    use crate::controller::resources::absent;
    use crate::controller::resources::testing::instance;
    use crate::crd::{ArgoCDSpec, DexSpec, KeycloakSpec, SsoSpec};

    fn sso(provider: Option<SsoProviderType>, dex: bool, keycloak: bool) -> ArgoCD {
        instance(ArgoCDSpec {
            sso: Some(SsoSpec {
                provider,
                dex: dex.then(|| DexSpec {
                    open_shift_oauth: true,
                    ..DexSpec::default()
                }),
                keycloak: keycloak.then(KeycloakSpec::default),
                ..SsoSpec::default()
            }),
            ..ArgoCDSpec::default()
        })
    }

    fn legacy_dex() -> ArgoCD {
        instance(ArgoCDSpec {
            dex: Some(DexSpec {
                config: Some("connectors: []".into()),
                ..DexSpec::default()
            }),
            ..ArgoCDSpec::default()
        })
    }

    fn dex_deployment() -> ObjectKey {
        ObjectKey::namespaced(Kind::Deployment, "argocd", "example-dex-server")
    }

    fn keycloak_deployment() -> ObjectKey {
        ObjectKey::namespaced(Kind::Deployment, "argocd", "example-keycloak")
    }

    #[test]
    fn test_requested_provider_validation() {
        let settings = OperatorSettings::default();
        assert_eq!(
            requested_provider(&instance(ArgoCDSpec::default()), &settings),
            Ok(None)
        );
        assert_eq!(
            requested_provider(&sso(Some(SsoProviderType::Dex), true, false), &settings),
            Ok(Some(SsoProviderType::Dex))
        );
        assert_eq!(
            requested_provider(&sso(Some(SsoProviderType::Keycloak), true, false), &settings),
            Err(SsoValidationError::KeycloakWithDexConfig)
        );
        assert_eq!(
            requested_provider(&sso(Some(SsoProviderType::Dex), false, true), &settings),
            Err(SsoValidationError::DexWithKeycloakConfig)
        );
        assert_eq!(
            requested_provider(&sso(None, false, false), &settings),
            Err(SsoValidationError::MissingProvider)
        );

        let mut both = legacy_dex();
        both.spec.sso = Some(SsoSpec {
            provider: Some(SsoProviderType::Keycloak),
            ..SsoSpec::default()
        });
        assert_eq!(
            requested_provider(&both, &settings),
            Err(SsoValidationError::LegacyDexWithSso)
        );
    }

    #[test]
    fn test_disable_dex() {
        let settings = OperatorSettings {
            disable_dex: true,
            ..OperatorSettings::default()
        };
        assert_eq!(requested_provider(&legacy_dex(), &settings), Ok(None));
        assert_eq!(
            requested_provider(&sso(Some(SsoProviderType::Dex), false, false), &settings),
            Err(SsoValidationError::DexDisabled)
        );
    }

    #[test]
    fn test_legacy_dex_counts_only_when_configured() {
        let settings = OperatorSettings::default();
        assert_eq!(
            requested_provider(&legacy_dex(), &settings),
            Ok(Some(SsoProviderType::Dex))
        );
        let empty = instance(ArgoCDSpec {
            dex: Some(DexSpec::default()),
            ..ArgoCDSpec::default()
        });
        assert_eq!(requested_provider(&empty, &settings), Ok(None));
        assert_eq!(deprecated_fields(&legacy_dex(), &settings)[0].0, "spec.dex");
    }

    #[test]
    fn test_deprecation_tracker_warns_once_per_instance() {
        let tracker = DeprecationTracker::new();
        assert!(tracker.warn_once("argocd/example", "spec.dex"));
        assert!(!tracker.warn_once("argocd/example", "spec.dex"));
        assert!(tracker.warn_once("argocd/other", "spec.dex"));
        tracker.forget("argocd/example");
        assert!(tracker.warn_once("argocd/example", "spec.dex"));
        assert!(!tracker.warn_once("argocd/other", "spec.dex"));
    }

    #[tokio::test]
    async fn test_conflict_mutates_nothing() {
        let cluster = FakeCluster::new();
        let hooks = HookRegistry::new();
        let ctx = BuildContext::default();

        let dex = sso(Some(SsoProviderType::Dex), true, false);
        let applier = Applier::new(&cluster, &hooks, &dex);
        ProviderMachine::new(&cluster, &applier, &dex, &ctx)
            .reconcile()
            .await
            .unwrap();
        assert!(cluster.contains(&dex_deployment()));
        cluster.clear_writes();

        let conflicting = sso(Some(SsoProviderType::Keycloak), true, false);
        let applier = Applier::new(&cluster, &hooks, &conflicting);
        let err = ProviderMachine::new(&cluster, &applier, &conflicting, &ctx)
            .reconcile()
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProviderError::Validation(SsoValidationError::KeycloakWithDexConfig)
        ));
        assert_eq!(cluster.write_count(), 0);
        assert!(cluster.contains(&dex_deployment()));
    }

    #[test]
    fn test_provider_keys_cover_every_built_object() {
        let cr = sso(Some(SsoProviderType::Keycloak), false, false);
        for routes in [false, true] {
            let ctx = BuildContext {
                features: FeatureSnapshot {
                    routes,
                    ..FeatureSnapshot::default()
                },
                ..BuildContext::default()
            };
            for provider in PROVIDERS {
                let keys = provider_keys(provider, &cr, &ctx);
                for intent in intents(provider, &cr, &ctx).unwrap() {
                    assert!(
                        keys.contains(intent.key()),
                        "{provider} keys miss {:?} (routes: {routes})",
                        intent.key()
                    );
                }
            }
        }
    }

    #[tokio::test]
    async fn test_switch_dex_to_keycloak_in_one_cycle() {
        let cluster = FakeCluster::new();
        let hooks = HookRegistry::new();
        let ctx = BuildContext::default();

        let dex = sso(Some(SsoProviderType::Dex), true, false);
        let applier = Applier::new(&cluster, &hooks, &dex);
        ProviderMachine::new(&cluster, &applier, &dex, &ctx)
            .reconcile()
            .await
            .unwrap();
        let dex_keys = absent(DexResources.intents(&dex, &ctx).unwrap());
        assert!(dex_keys.iter().all(|i| cluster.contains(i.key())));

        let keycloak = sso(Some(SsoProviderType::Keycloak), false, false);
        let applier = Applier::new(&cluster, &hooks, &keycloak);
        let machine = ProviderMachine::new(&cluster, &applier, &keycloak, &ctx);
        assert_eq!(machine.reconcile().await.unwrap(), Some(SsoProviderType::Keycloak));

        assert!(dex_keys.iter().all(|i| !cluster.contains(i.key())));
        assert!(cluster.contains(&keycloak_deployment()));
        assert_eq!(machine.active().await.unwrap(), vec![SsoProviderType::Keycloak]);
    }

    #[tokio::test]
    async fn test_none_removes_partial_provider_state() {
        let cluster = FakeCluster::new();
        let hooks = HookRegistry::new();
        let ctx = BuildContext::default();

        let dex = sso(Some(SsoProviderType::Dex), true, false);
        let applier = Applier::new(&cluster, &hooks, &dex);
        ProviderMachine::new(&cluster, &applier, &dex, &ctx)
            .reconcile()
            .await
            .unwrap();
        // deployment already gone, the rest must still be cleaned up
        ClusterApi::delete(&cluster, &dex_deployment()).await.unwrap();

        let none = instance(ArgoCDSpec::default());
        let applier = Applier::new(&cluster, &hooks, &none);
        let machine = ProviderMachine::new(&cluster, &applier, &none, &ctx);
        assert_eq!(machine.reconcile().await.unwrap(), None);
        assert!(machine.active().await.unwrap().is_empty());
        assert!(cluster.keys(Kind::ServiceAccount).is_empty());
    }
}
