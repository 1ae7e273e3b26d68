//! # Notifications Controller
//!
//! Gated on `spec.notifications.enabled`. The config map and secret are
//! seeded empty and left to users; they are removed with the controller.

use super::rbac::{role, role_binding, role_ref, rule, sa_subject, service_account};
use super::workloads::{container, deployment, pod};
use super::{
    absent, component_name, image_ref, present, BuildContext, ManagedKind, ROLE, ROLE_BINDING,
    SERVICE_ACCOUNT, WORKLOAD,
};
use crate::cluster::Kind;
use crate::constants::{ARGOCD_DEFAULT_IMAGE, ARGOCD_DEFAULT_VERSION};
use crate::controller::apply::{Intent, LABELS_ONLY};
use crate::controller::labels::{object_meta, InstanceRef};
use crate::crd::ArgoCD;
use anyhow::Result;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use std::collections::BTreeMap;

const COMPONENT: &str = "notifications-controller";
pub const NOTIFICATIONS_CM: &str = "argocd-notifications-cm";
pub const NOTIFICATIONS_SECRET: &str = "argocd-notifications-secret";

#[derive(Debug, Default)]
pub struct Notifications;

impl Notifications {
    fn build(cr: &ArgoCD, ctx: &BuildContext) -> Result<Vec<Intent>> {
        let spec = &cr.spec.notifications;
        let instance = InstanceRef::of(cr);
        let name = component_name(cr, COMPONENT);
        let ns = instance.namespace.as_str();

        let rules = vec![
            rule(
                &["argoproj.io"],
                &["applications", "appprojects"],
                &["get", "list", "watch", "update", "patch"],
            ),
            rule(&[""], &["configmaps", "secrets"], &["get", "list", "watch"]),
        ];
        let image = image_ref(
            spec.image.as_deref(),
            spec.version.as_deref(),
            ctx.settings.images.argocd.as_deref(),
            ARGOCD_DEFAULT_IMAGE,
            ARGOCD_DEFAULT_VERSION,
        );
        let args = vec![
            "argocd-notifications".to_string(),
            "--loglevel".to_string(),
            spec.log_level.clone().unwrap_or_else(|| "info".to_string()),
            "--argocd-repo-server".to_string(),
            format!("{}:8081", component_name(cr, "repo-server")),
        ];
        let workload = deployment(
            cr,
            &name,
            COMPONENT,
            Some(1),
            pod(
                Some(name.clone()),
                vec![container(
                    "argocd-notifications-controller",
                    image,
                    args,
                    &[("metrics", 9001)],
                    spec.resources.as_ref(),
                )],
            ),
            BTreeMap::new(),
        );

        let config = ConfigMap {
            metadata: object_meta(&instance, NOTIFICATIONS_CM, Some(ns), COMPONENT),
            ..ConfigMap::default()
        };
        let secret = Secret {
            metadata: object_meta(&instance, NOTIFICATIONS_SECRET, Some(ns), COMPONENT),
            type_: Some("Opaque".to_string()),
            ..Secret::default()
        };

        Ok(vec![
            present(
                Kind::ServiceAccount,
                &service_account(&instance, &name, COMPONENT),
                SERVICE_ACCOUNT,
            )?,
            present(Kind::Role, &role(&instance, &name, ns, COMPONENT, rules), ROLE)?,
            present(
                Kind::RoleBinding,
                &role_binding(
                    &instance,
                    &name,
                    ns,
                    COMPONENT,
                    role_ref("Role", &name),
                    vec![sa_subject(ns, &name)],
                ),
                ROLE_BINDING,
            )?,
            present(Kind::ConfigMap, &config, LABELS_ONLY)?,
            present(Kind::Secret, &secret, LABELS_ONLY)?,
            present(Kind::Deployment, &workload, WORKLOAD)?,
        ])
    }
}

impl ManagedKind for Notifications {
    fn component(&self) -> &'static str {
        COMPONENT
    }

    fn intents(&self, cr: &ArgoCD, ctx: &BuildContext) -> Result<Vec<Intent>> {
        let intents = Self::build(cr, ctx)?;
        if cr.spec.notifications.enabled {
            Ok(intents)
        } else {
            Ok(absent(intents))
        }
    }
}
