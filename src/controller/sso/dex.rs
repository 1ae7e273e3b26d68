//! Dex resources. The Dex binary is copied out of the Argo CD image by an
//! init container and started as `argocd-dex rundex`.

use crate::cluster::{Kind, ObjectKey};
use crate::constants::{DEX_DEFAULT_IMAGE, DEX_DEFAULT_VERSION};
use crate::controller::apply::Intent;
use crate::controller::labels::InstanceRef;
use crate::controller::resources::network::{port, service};
use crate::controller::resources::rbac::{
    role, role_binding, role_ref, rule, sa_subject, service_account,
};
use crate::controller::resources::workloads::{argocd_image, container, deployment, pod};
use crate::controller::resources::{
    component_name, image_ref, present, BuildContext, ManagedKind, ROLE, ROLE_BINDING, SERVICE,
    SERVICE_ACCOUNT, WORKLOAD,
};
use crate::crd::{ArgoCD, DexSpec};
use anyhow::Result;
use k8s_openapi::api::core::v1::{Container, EmptyDirVolumeSource, Volume, VolumeMount};
use std::collections::BTreeMap;

const COMPONENT: &str = "dex-server";
const SHARED_VOLUME: &str = "static-files";

/// `spec.sso.dex`, falling back to the legacy `spec.dex`
fn dex_spec(cr: &ArgoCD) -> Option<&DexSpec> {
    cr.spec
        .sso
        .as_ref()
        .and_then(|s| s.dex.as_ref())
        .or(cr.spec.dex.as_ref())
}

fn shared_mount() -> VolumeMount {
    VolumeMount {
        name: SHARED_VOLUME.to_string(),
        mount_path: "/shared".to_string(),
        ..VolumeMount::default()
    }
}

/// Keys of every object the Dex resource set may hold
#[must_use]
pub fn keys(cr: &ArgoCD) -> Vec<ObjectKey> {
    let ns = InstanceRef::of(cr).namespace;
    let account = component_name(cr, "argocd-dex-server");
    let name = component_name(cr, COMPONENT);
    vec![
        ObjectKey::namespaced(Kind::ServiceAccount, &ns, &account),
        ObjectKey::namespaced(Kind::Role, &ns, &account),
        ObjectKey::namespaced(Kind::RoleBinding, &ns, &account),
        ObjectKey::namespaced(Kind::Service, &ns, &name),
        ObjectKey::namespaced(Kind::Deployment, &ns, &name),
    ]
}

#[derive(Debug, Default)]
pub struct DexResources;

impl ManagedKind for DexResources {
    fn component(&self) -> &'static str {
        "dex"
    }

    fn intents(&self, cr: &ArgoCD, ctx: &BuildContext) -> Result<Vec<Intent>> {
        let instance = InstanceRef::of(cr);
        let ns = instance.namespace.as_str();
        let account = component_name(cr, "argocd-dex-server");
        let name = component_name(cr, COMPONENT);
        let spec = dex_spec(cr);

        let image = image_ref(
            spec.and_then(|d| d.image.as_deref()),
            spec.and_then(|d| d.version.as_deref()),
            ctx.settings.images.dex.as_deref(),
            DEX_DEFAULT_IMAGE,
            DEX_DEFAULT_VERSION,
        );
        let mut dex = container(
            "dex",
            image,
            vec!["rundex".to_string()],
            &[("http", 5556), ("grpc", 5557), ("metrics", 5558)],
            spec.and_then(|d| d.resources.as_ref()),
        );
        dex.command = Some(vec!["/shared/argocd-dex".to_string()]);
        dex.volume_mounts = Some(vec![shared_mount()]);

        let mut workload = pod(Some(account.clone()), vec![dex]);
        workload.init_containers = Some(vec![Container {
            name: "copyutil".to_string(),
            image: Some(argocd_image(cr, ctx)),
            command: Some(
                ["cp", "-n", "/usr/local/bin/argocd", "/shared/argocd-dex"]
                    .iter()
                    .map(ToString::to_string)
                    .collect(),
            ),
            volume_mounts: Some(vec![shared_mount()]),
            ..Container::default()
        }]);
        workload.volumes = Some(vec![Volume {
            name: SHARED_VOLUME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Volume::default()
        }]);

        Ok(vec![
            present(
                Kind::ServiceAccount,
                &service_account(&instance, &account, COMPONENT),
                SERVICE_ACCOUNT,
            )?,
            present(
                Kind::Role,
                &role(
                    &instance,
                    &account,
                    ns,
                    COMPONENT,
                    vec![rule(&[""], &["secrets", "configmaps"], &["get", "list", "watch"])],
                ),
                ROLE,
            )?,
            present(
                Kind::RoleBinding,
                &role_binding(
                    &instance,
                    &account,
                    ns,
                    COMPONENT,
                    role_ref("Role", &account),
                    vec![sa_subject(ns, &account)],
                ),
                ROLE_BINDING,
            )?,
            present(
                Kind::Service,
                &service(
                    &instance,
                    &name,
                    COMPONENT,
                    &name,
                    vec![port("http", 5556, 5556), port("grpc", 5557, 5557)],
                ),
                SERVICE,
            )?,
            present(
                Kind::Deployment,
                &deployment(cr, &name, COMPONENT, Some(1), workload, BTreeMap::new()),
                WORKLOAD,
            )?,
        ])
    }
}
