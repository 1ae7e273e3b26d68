//! # RBAC
//!
//! Service accounts, roles and bindings for the application controller and
//! the server:
//!
//! - `resource-management` Role/RoleBinding per managed namespace
//! - `app-management` Role/RoleBinding `<cr>_<ns>` per claimed source namespace
//! - ClusterRole/ClusterRoleBinding `<cr>-<ns>-<component>` when the instance
//!   namespace is allowed cluster configuration, deleted otherwise
//!
//! `CONTROLLER_CLUSTER_ROLE` / `SERVER_CLUSTER_ROLE` bind the component to an
//! existing ClusterRole instead; the namespaced Role is then removed.

use super::{
    instance_namespace, present, BuildContext, ManagedKind, ROLE, ROLE_BINDING, SERVICE_ACCOUNT,
};
use crate::cluster::{Kind, ObjectKey};
use crate::controller::apply::Intent;
use crate::controller::labels::{
    object_meta, InstanceRef, RBAC_APP_MANAGEMENT, RBAC_RESOURCE_MANAGEMENT, RBAC_TYPE,
};
use crate::crd::ArgoCD;
use anyhow::Result;
use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject,
};
use kube::ResourceExt;

pub const APPLICATION_CONTROLLER: &str = "argocd-application-controller";
pub const SERVER: &str = "argocd-server";

const RBAC_GROUP: &str = "rbac.authorization.k8s.io";

#[must_use]
pub fn rule(groups: &[&str], resources: &[&str], verbs: &[&str]) -> PolicyRule {
    let owned = |items: &[&str]| Some(items.iter().map(ToString::to_string).collect());
    PolicyRule {
        api_groups: owned(groups),
        resources: owned(resources),
        verbs: verbs.iter().map(ToString::to_string).collect(),
        ..PolicyRule::default()
    }
}

fn controller_rules() -> Vec<PolicyRule> {
    vec![rule(&["*"], &["*"], &["*"])]
}

fn server_rules() -> Vec<PolicyRule> {
    vec![
        rule(&["*"], &["*"], &["get", "delete", "patch"]),
        rule(
            &["argoproj.io"],
            &["applications", "applicationsets", "appprojects"],
            &["create", "get", "list", "watch", "update", "patch", "delete"],
        ),
        rule(&[""], &["events"], &["create", "list"]),
    ]
}

fn cluster_controller_rules() -> Vec<PolicyRule> {
    vec![
        rule(&["*"], &["*"], &["*"]),
        PolicyRule {
            non_resource_urls: Some(vec!["*".to_string()]),
            verbs: vec!["*".to_string()],
            ..PolicyRule::default()
        },
    ]
}

fn cluster_server_rules() -> Vec<PolicyRule> {
    vec![
        rule(&["*"], &["*"], &["get", "list", "watch", "delete", "patch"]),
        rule(&[""], &["events"], &["list"]),
        rule(&[""], &["pods", "pods/log"], &["get"]),
    ]
}

fn source_namespace_rules() -> Vec<PolicyRule> {
    vec![
        rule(
            &["argoproj.io"],
            &["applications"],
            &["create", "get", "list", "watch", "update", "patch", "delete"],
        ),
        rule(&[""], &["events"], &["create", "list"]),
    ]
}

#[must_use]
pub fn service_account(instance: &InstanceRef, name: &str, component: &str) -> ServiceAccount {
    ServiceAccount {
        metadata: object_meta(instance, name, Some(&instance.namespace), component),
        ..ServiceAccount::default()
    }
}

#[must_use]
pub fn sa_subject(namespace: &str, name: &str) -> Subject {
    Subject {
        kind: "ServiceAccount".to_string(),
        name: name.to_string(),
        namespace: Some(namespace.to_string()),
        api_group: None,
    }
}

#[must_use]
pub fn role(
    instance: &InstanceRef,
    name: &str,
    namespace: &str,
    component: &str,
    rules: Vec<PolicyRule>,
) -> Role {
    Role {
        metadata: object_meta(instance, name, Some(namespace), component),
        rules: Some(rules),
    }
}

#[must_use]
pub fn role_binding(
    instance: &InstanceRef,
    name: &str,
    namespace: &str,
    component: &str,
    role_ref: RoleRef,
    subjects: Vec<Subject>,
) -> RoleBinding {
    RoleBinding {
        metadata: object_meta(instance, name, Some(namespace), component),
        role_ref,
        subjects: Some(subjects),
    }
}

#[must_use]
pub fn role_ref(kind: &str, name: &str) -> RoleRef {
    RoleRef {
        api_group: RBAC_GROUP.to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
    }
}

fn typed<M: kube::Resource>(mut obj: M, rbac_type: &str) -> M {
    obj.labels_mut()
        .insert(RBAC_TYPE.to_string(), rbac_type.to_string());
    obj
}

/// Name of the cluster-scoped RBAC objects for a component
#[must_use]
pub fn cluster_name(cr: &ArgoCD, component: &str) -> String {
    format!("{}-{}-{}", cr.name_any(), instance_namespace(cr), component)
}

/// Name of the app-management RBAC objects in a source namespace
#[must_use]
pub fn source_name(cr: &ArgoCD, namespace: &str) -> String {
    format!("{}_{}", cr.name_any(), namespace)
}

/// Service accounts and roles of the application controller and server
#[derive(Debug, Default)]
pub struct Rbac;

impl Rbac {
    fn component_rbac(
        cr: &ArgoCD,
        ctx: &BuildContext,
        component: &str,
        rules: fn() -> Vec<PolicyRule>,
        cluster_rules: fn() -> Vec<PolicyRule>,
        override_role: Option<&str>,
    ) -> Result<Vec<Intent>> {
        let instance = InstanceRef::of(cr);
        let home = instance.namespace.clone();
        let name = format!("{}-{component}", cr.name_any());
        let mut intents = vec![present(
            Kind::ServiceAccount,
            &service_account(&instance, &name, component),
            SERVICE_ACCOUNT,
        )?];

        for ns in &ctx.namespaces.managed {
            let role_obj = typed(
                role(&instance, &name, ns, component, rules()),
                RBAC_RESOURCE_MANAGEMENT,
            );
            let binding_ref = match override_role {
                Some(cluster_role) => {
                    intents.push(Intent::Absent(ObjectKey::namespaced(Kind::Role, ns, &name)));
                    role_ref("ClusterRole", cluster_role)
                }
                None => {
                    intents.push(present(Kind::Role, &role_obj, ROLE)?);
                    role_ref("Role", &name)
                }
            };
            let binding = typed(
                role_binding(
                    &instance,
                    &name,
                    ns,
                    component,
                    binding_ref,
                    vec![sa_subject(&home, &name)],
                ),
                RBAC_RESOURCE_MANAGEMENT,
            );
            intents.push(present(Kind::RoleBinding, &binding, ROLE_BINDING)?);
        }

        let cluster = cluster_name(cr, component);
        if ctx.settings.cluster_config_namespaces.allows(&home) {
            let cluster_role = ClusterRole {
                metadata: object_meta(&instance, &cluster, None, component),
                rules: Some(cluster_rules()),
                ..ClusterRole::default()
            };
            let binding = ClusterRoleBinding {
                metadata: object_meta(&instance, &cluster, None, component),
                role_ref: role_ref("ClusterRole", override_role.unwrap_or(&cluster)),
                subjects: Some(vec![sa_subject(&home, &name)]),
            };
            intents.push(present(Kind::ClusterRole, &cluster_role, ROLE)?);
            intents.push(present(Kind::ClusterRoleBinding, &binding, ROLE_BINDING)?);
        } else {
            intents.push(Intent::Absent(ObjectKey::cluster(Kind::ClusterRoleBinding, &cluster)));
            intents.push(Intent::Absent(ObjectKey::cluster(Kind::ClusterRole, &cluster)));
        }
        Ok(intents)
    }
}

impl ManagedKind for Rbac {
    fn component(&self) -> &'static str {
        "rbac"
    }

    fn intents(&self, cr: &ArgoCD, ctx: &BuildContext) -> Result<Vec<Intent>> {
        let mut intents = Self::component_rbac(
            cr,
            ctx,
            APPLICATION_CONTROLLER,
            controller_rules,
            cluster_controller_rules,
            ctx.settings.controller_cluster_role.as_deref(),
        )?;
        intents.extend(Self::component_rbac(
            cr,
            ctx,
            SERVER,
            server_rules,
            cluster_server_rules,
            ctx.settings.server_cluster_role.as_deref(),
        )?);

        let instance = InstanceRef::of(cr);
        let home = instance.namespace.clone();
        let subjects = vec![
            sa_subject(&home, &format!("{}-{APPLICATION_CONTROLLER}", cr.name_any())),
            sa_subject(&home, &format!("{}-{SERVER}", cr.name_any())),
        ];
        for ns in ctx.namespaces.source.iter().filter(|ns| **ns != home) {
            let name = source_name(cr, ns);
            let role_obj = typed(
                role(&instance, &name, ns, SERVER, source_namespace_rules()),
                RBAC_APP_MANAGEMENT,
            );
            let binding = typed(
                role_binding(
                    &instance,
                    &name,
                    ns,
                    SERVER,
                    role_ref("Role", &name),
                    subjects.clone(),
                ),
                RBAC_APP_MANAGEMENT,
            );
            intents.push(present(Kind::Role, &role_obj, ROLE)?);
            intents.push(present(Kind::RoleBinding, &binding, ROLE_BINDING)?);
        }
        Ok(intents)
    }
}
