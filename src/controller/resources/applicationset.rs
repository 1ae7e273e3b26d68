//! # ApplicationSet Controller
//!
//! Present while `spec.applicationSet` is set; every object is deleted when
//! the block is removed. A configured SCM root CA ConfigMap is mounted once it
//! exists, and its content hash rolls the controller pods.

use super::network::{port, service};
use super::rbac::{role, role_binding, role_ref, rule, sa_subject, service_account};
use super::workloads::{container, deployment, mount_config_map, pod};
use super::{
    absent, component_name, image_ref, present, BuildContext, ManagedKind, ROLE, ROLE_BINDING,
    SERVICE, SERVICE_ACCOUNT, WORKLOAD,
};
use crate::cluster::Kind;
use crate::constants::{ARGOCD_DEFAULT_IMAGE, ARGOCD_DEFAULT_VERSION};
use crate::controller::apply::Intent;
use crate::controller::labels::{InstanceRef, SCM_ROOT_CA_HASH};
use crate::crd::{ApplicationSetSpec, ArgoCD};
use anyhow::Result;
use std::collections::BTreeMap;

const COMPONENT: &str = "applicationset-controller";
const SCM_ROOT_CA_VOLUME: &str = "appset-gitlab-scm-tls-cert";
const SCM_ROOT_CA_MOUNT: &str = "/app/tls/scm";

#[derive(Debug, Default)]
pub struct ApplicationSet;

impl ApplicationSet {
    fn build(cr: &ArgoCD, ctx: &BuildContext, spec: &ApplicationSetSpec) -> Result<Vec<Intent>> {
        let instance = InstanceRef::of(cr);
        let name = component_name(cr, COMPONENT);
        let ns = instance.namespace.as_str();

        let rules = vec![
            rule(
                &["argoproj.io"],
                &["applications", "applicationsets", "applicationsets/finalizers", "appprojects"],
                &["create", "delete", "get", "list", "patch", "update", "watch"],
            ),
            rule(&["argoproj.io"], &["applicationsets/status"], &["get", "patch", "update"]),
            rule(&[""], &["secrets", "configmaps"], &["get", "list", "watch"]),
            rule(&[""], &["events"], &["create", "get", "list", "patch", "watch"]),
        ];

        let image = image_ref(
            spec.image.as_deref(),
            spec.version.as_deref(),
            ctx.settings.images.argocd.as_deref(),
            ARGOCD_DEFAULT_IMAGE,
            ARGOCD_DEFAULT_VERSION,
        );
        let mut args = vec![
            "entrypoint.sh".to_string(),
            "argocd-applicationset-controller".to_string(),
            "--argocd-repo-server".to_string(),
            format!("{}:8081", component_name(cr, "repo-server")),
            "--loglevel".to_string(),
            spec.log_level.clone().unwrap_or_else(|| "info".to_string()),
        ];
        let mut annotations = BTreeMap::new();
        let scm_root_ca = spec
            .scm_root_ca_config_map
            .as_deref()
            .filter(|name| !name.is_empty())
            .zip(ctx.tls.scm_root_ca.as_ref());
        if let Some((_, hash)) = scm_root_ca {
            args.push("--scm-root-ca-path".to_string());
            args.push(format!("{SCM_ROOT_CA_MOUNT}/cert"));
            annotations.insert(SCM_ROOT_CA_HASH.to_string(), hash.clone());
        }
        args.extend(spec.extra_command_args.iter().cloned());

        let mut pod_spec = pod(
            Some(name.clone()),
            vec![container(
                "argocd-applicationset-controller",
                image,
                args,
                &[("webhook", 7000), ("metrics", 8080)],
                spec.resources.as_ref(),
            )],
        );
        if let Some((config_map, _)) = scm_root_ca {
            mount_config_map(&mut pod_spec, SCM_ROOT_CA_VOLUME, config_map, SCM_ROOT_CA_MOUNT);
        }
        let workload = deployment(cr, &name, COMPONENT, Some(1), pod_spec, annotations);

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
            present(Kind::Deployment, &workload, WORKLOAD)?,
            present(
                Kind::Service,
                &service(
                    &instance,
                    &name,
                    COMPONENT,
                    &name,
                    vec![port("webhook", 7000, 7000), port("metrics", 8080, 8080)],
                ),
                SERVICE,
            )?,
        ])
    }
}

impl ManagedKind for ApplicationSet {
    fn component(&self) -> &'static str {
        COMPONENT
    }

    fn intents(&self, cr: &ArgoCD, ctx: &BuildContext) -> Result<Vec<Intent>> {
        match &cr.spec.application_set {
            Some(spec) => Self::build(cr, ctx, spec),
            None => Ok(absent(Self::build(cr, ctx, &ApplicationSetSpec::default())?)),
        }
    }
}
