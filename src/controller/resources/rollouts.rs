//! # Argo Rollouts
//!
//! Namespace-scoped Argo Rollouts controller, gated on
//! `spec.rollouts.enabled`. Names are fixed so one rollouts controller runs
//! per namespace.

use super::network::{port, service};
use super::rbac::{role, role_binding, role_ref, rule, sa_subject, service_account};
use super::workloads::{container, deployment, pod};
use super::{
    absent, image_ref, present, BuildContext, ManagedKind, ROLE, ROLE_BINDING, SERVICE,
    SERVICE_ACCOUNT, WORKLOAD,
};
use crate::cluster::Kind;
use crate::constants::{ROLLOUTS_DEFAULT_IMAGE, ROLLOUTS_DEFAULT_VERSION};
use crate::controller::apply::{Intent, LABELS_ONLY};
use crate::controller::labels::{object_meta, InstanceRef};
use crate::crd::ArgoCD;
use anyhow::Result;
use k8s_openapi::api::core::v1::Secret;
use std::collections::BTreeMap;

const COMPONENT: &str = "rollouts-controller";
pub const ROLLOUTS_NAME: &str = "argo-rollouts";
pub const ROLLOUTS_METRICS: &str = "argo-rollouts-metrics";
pub const ROLLOUTS_NOTIFICATION_SECRET: &str = "argo-rollouts-notification-secret";

#[derive(Debug, Default)]
pub struct Rollouts;

impl Rollouts {
    fn build(cr: &ArgoCD, ctx: &BuildContext) -> Result<Vec<Intent>> {
        let spec = &cr.spec.rollouts;
        let instance = InstanceRef::of(cr);
        let ns = instance.namespace.as_str();

        let rules = vec![
            rule(
                &["argoproj.io"],
                &[
                    "rollouts",
                    "rollouts/status",
                    "rollouts/finalizers",
                    "analysisruns",
                    "analysistemplates",
                    "experiments",
                ],
                &["*"],
            ),
            rule(&["apps"], &["replicasets", "deployments"], &["*"]),
            rule(&[""], &["services", "configmaps", "secrets", "pods", "events"], &["*"]),
        ];
        let image = image_ref(
            spec.image.as_deref(),
            spec.version.as_deref(),
            ctx.settings.images.rollouts.as_deref(),
            ROLLOUTS_DEFAULT_IMAGE,
            ROLLOUTS_DEFAULT_VERSION,
        );
        let workload = deployment(
            cr,
            ROLLOUTS_NAME,
            COMPONENT,
            Some(1),
            pod(
                Some(ROLLOUTS_NAME.to_string()),
                vec![container(
                    ROLLOUTS_NAME,
                    image,
                    vec!["--namespaced".to_string()],
                    &[("metrics", 8090), ("healthz", 8080)],
                    spec.resources.as_ref(),
                )],
            ),
            BTreeMap::new(),
        );
        let secret = Secret {
            metadata: object_meta(&instance, ROLLOUTS_NOTIFICATION_SECRET, Some(ns), COMPONENT),
            type_: Some("Opaque".to_string()),
            ..Secret::default()
        };

        Ok(vec![
            present(
                Kind::ServiceAccount,
                &service_account(&instance, ROLLOUTS_NAME, COMPONENT),
                SERVICE_ACCOUNT,
            )?,
            present(
                Kind::Role,
                &role(&instance, ROLLOUTS_NAME, ns, COMPONENT, rules),
                ROLE,
            )?,
            present(
                Kind::RoleBinding,
                &role_binding(
                    &instance,
                    ROLLOUTS_NAME,
                    ns,
                    COMPONENT,
                    role_ref("Role", ROLLOUTS_NAME),
                    vec![sa_subject(ns, ROLLOUTS_NAME)],
                ),
                ROLE_BINDING,
            )?,
            present(Kind::Secret, &secret, LABELS_ONLY)?,
            present(Kind::Deployment, &workload, WORKLOAD)?,
            present(
                Kind::Service,
                &service(
                    &instance,
                    ROLLOUTS_METRICS,
                    COMPONENT,
                    ROLLOUTS_NAME,
                    vec![port("metrics", 8090, 8090)],
                ),
                SERVICE,
            )?,
        ])
    }
}

impl ManagedKind for Rollouts {
    fn component(&self) -> &'static str {
        COMPONENT
    }

    fn intents(&self, cr: &ArgoCD, ctx: &BuildContext) -> Result<Vec<Intent>> {
        let intents = Self::build(cr, ctx)?;
        if cr.spec.rollouts.enabled {
            Ok(intents)
        } else {
            Ok(absent(intents))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ImageOverrides, OperatorSettings};
    use crate::controller::resources::testing::instance;
    use crate::crd::{ArgoCDSpec, RolloutsSpec};
    use k8s_openapi::api::apps::v1::Deployment;

    #[test]
    fn test_env_image_used_when_enabled() {
        let cr = instance(ArgoCDSpec {
            rollouts: RolloutsSpec {
                enabled: true,
                ..RolloutsSpec::default()
            },
            ..ArgoCDSpec::default()
        });
        let ctx = BuildContext {
            settings: OperatorSettings {
                images: ImageOverrides {
                    rollouts: Some("mirror.local/rollouts:v1".into()),
                    ..ImageOverrides::default()
                },
                ..OperatorSettings::default()
            },
            ..BuildContext::default()
        };
        let intents = Rollouts.intents(&cr, &ctx).unwrap();
        let Some(Intent::Present(desired)) =
            intents.iter().find(|i| i.key().kind == Kind::Deployment)
        else {
            panic!("deployment must be present");
        };
        let deploy: Deployment = crate::cluster::from_dynamic(&desired.object).unwrap();
        assert_eq!(
            deploy.spec.unwrap().template.spec.unwrap().containers[0].image.as_deref(),
            Some("mirror.local/rollouts:v1")
        );
    }

    #[test]
    fn test_disabled_deletes() {
        let cr = instance(ArgoCDSpec::default());
        let intents = Rollouts.intents(&cr, &BuildContext::default()).unwrap();
        assert!(intents.iter().all(|i| matches!(i, Intent::Absent(_))));
        assert!(intents.iter().any(|i| i.key().name == ROLLOUTS_METRICS));
    }
}
