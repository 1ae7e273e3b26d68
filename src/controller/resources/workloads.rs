//! # Workloads
//!
//! Deployments for the server, repo server and redis, the application
//! controller stateful set, and the optional server autoscaler.
//!
//! Pod templates of TLS clients carry a hash of the externally provisioned
//! certificate so a rotation rolls the pods.

use super::{
    apply_node_placement, component_name, image_ref, instance_namespace, present,
    resource_requirements, BuildContext, ManagedKind, SPEC_SUBSET, WORKLOAD,
};
use crate::cluster::{Kind, ObjectKey};
use crate::constants::{
    ARGOCD_DEFAULT_IMAGE, ARGOCD_DEFAULT_VERSION, REDIS_DEFAULT_IMAGE, REDIS_DEFAULT_VERSION,
    REDIS_TLS_SECRET, REPO_SERVER_TLS_SECRET,
};
use crate::controller::apply::Intent;
use crate::controller::labels::{
    common_labels, object_meta, selector_labels, InstanceRef, REDIS_TLS_HASH, REPO_SERVER_TLS_HASH,
};
use crate::controller::resources::rbac::{APPLICATION_CONTROLLER, SERVER};
use crate::controller::sso;
use crate::crd::{ArgoCD, ResourceRequirementsSpec, SsoProviderType};
use anyhow::Result;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, StatefulSet, StatefulSetSpec};
use k8s_openapi::api::autoscaling::v2::{
    CrossVersionObjectReference, HorizontalPodAutoscaler, HorizontalPodAutoscalerSpec,
    MetricSpec, MetricTarget, ResourceMetricSource,
};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, PodSpec, PodTemplateSpec, SecretVolumeSource,
    Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::ResourceExt;
use std::collections::BTreeMap;

const REDIS_TLS_MOUNT: &str = "/app/config/redis/tls";
const REPO_TLS_MOUNT: &str = "/app/config/reposerver/tls";
const DEFAULT_PROCESSORS: i32 = 10;

#[must_use]
pub fn container(
    name: &str,
    image: String,
    args: Vec<String>,
    ports: &[(&str, i32)],
    resources: Option<&ResourceRequirementsSpec>,
) -> Container {
    Container {
        name: name.to_string(),
        image: Some(image),
        image_pull_policy: Some("Always".to_string()),
        args: (!args.is_empty()).then_some(args),
        ports: (!ports.is_empty()).then(|| {
            ports
                .iter()
                .map(|(name, port)| ContainerPort {
                    name: Some((*name).to_string()),
                    container_port: *port,
                    protocol: Some("TCP".to_string()),
                    ..ContainerPort::default()
                })
                .collect()
        }),
        resources: resource_requirements(resources),
        ..Container::default()
    }
}

/// Pod template with the common labels and instance-wide node placement
#[must_use]
pub fn pod_template(
    cr: &ArgoCD,
    name: &str,
    component: &str,
    mut pod: PodSpec,
    annotations: BTreeMap<String, String>,
) -> PodTemplateSpec {
    apply_node_placement(&mut pod, cr.spec.node_placement.as_ref());
    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(common_labels(&InstanceRef::of(cr), name, component)),
            annotations: (!annotations.is_empty()).then_some(annotations),
            ..ObjectMeta::default()
        }),
        spec: Some(pod),
    }
}

#[must_use]
pub fn deployment(
    cr: &ArgoCD,
    name: &str,
    component: &str,
    replicas: Option<i32>,
    pod: PodSpec,
    annotations: BTreeMap<String, String>,
) -> Deployment {
    let instance = InstanceRef::of(cr);
    Deployment {
        metadata: object_meta(&instance, name, Some(&instance.namespace), component),
        spec: Some(DeploymentSpec {
            replicas,
            selector: LabelSelector {
                match_labels: Some(selector_labels(name)),
                ..LabelSelector::default()
            },
            template: pod_template(cr, name, component, pod, annotations),
            ..DeploymentSpec::default()
        }),
        ..Deployment::default()
    }
}

/// Pod running one container under a service account
#[must_use]
pub fn pod(service_account: Option<String>, containers: Vec<Container>) -> PodSpec {
    PodSpec {
        service_account_name: service_account,
        containers,
        ..PodSpec::default()
    }
}

/// Argo CD image for this instance
#[must_use]
pub fn argocd_image(cr: &ArgoCD, ctx: &BuildContext) -> String {
    image_ref(
        cr.spec.image.as_deref(),
        cr.spec.version.as_deref(),
        ctx.settings.images.argocd.as_deref(),
        ARGOCD_DEFAULT_IMAGE,
        ARGOCD_DEFAULT_VERSION,
    )
}

fn secret_volume(name: &str, secret: &str) -> Volume {
    Volume {
        name: name.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret.to_string()),
            optional: Some(true),
            ..SecretVolumeSource::default()
        }),
        ..Volume::default()
    }
}

fn mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        ..VolumeMount::default()
    }
}

fn config_map_volume(name: &str, config_map: &str) -> Volume {
    Volume {
        name: name.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: config_map.to_string(),
            ..ConfigMapVolumeSource::default()
        }),
        ..Volume::default()
    }
}

/// Add a volume to the pod and mount it into the first container
fn mount_volume(pod: &mut PodSpec, volume: Volume, path: &str) {
    if let Some(container) = pod.containers.first_mut() {
        container
            .volume_mounts
            .get_or_insert_with(Vec::new)
            .push(mount(&volume.name, path));
    }
    pod.volumes.get_or_insert_with(Vec::new).push(volume);
}

/// Mount a TLS secret into the first container of the pod
fn mount_tls(pod: &mut PodSpec, volume: &str, secret: &str, path: &str) {
    mount_volume(pod, secret_volume(volume, secret), path);
}

/// Mount a ConfigMap into the first container of the pod
pub fn mount_config_map(pod: &mut PodSpec, volume: &str, config_map: &str, path: &str) {
    mount_volume(pod, config_map_volume(volume, config_map), path);
}

/// Hash annotations for the TLS secrets a component consumes
fn tls_annotations(ctx: &BuildContext, redis: bool, repo: bool) -> BTreeMap<String, String> {
    let mut annotations = BTreeMap::new();
    if let (true, Some(hash)) = (redis, &ctx.tls.redis) {
        annotations.insert(REDIS_TLS_HASH.to_string(), hash.clone());
    }
    if let (true, Some(hash)) = (repo, &ctx.tls.repo_server) {
        annotations.insert(REPO_SERVER_TLS_HASH.to_string(), hash.clone());
    }
    annotations
}

/// Redis client arguments, and the CA mount when redis serves TLS
fn redis_client(cr: &ArgoCD, ctx: &BuildContext, args: &mut Vec<String>, pod: &mut PodSpec) {
    args.push("--redis".to_string());
    args.push(format!("{}:6379", component_name(cr, "redis")));
    if ctx.tls.redis.is_some() {
        args.push("--redis-use-tls".to_string());
        args.push("--redis-ca-certificate".to_string());
        args.push(format!("{REDIS_TLS_MOUNT}/tls.crt"));
        mount_tls(pod, "redis-tls", REDIS_TLS_SECRET, REDIS_TLS_MOUNT);
    }
}

fn repo_client(cr: &ArgoCD, ctx: &BuildContext, args: &mut Vec<String>, pod: &mut PodSpec) {
    args.push("--repo-server".to_string());
    args.push(format!("{}:8081", component_name(cr, "repo-server")));
    if ctx.tls.repo_server.is_some() {
        args.push("--repo-server-strict-tls".to_string());
        mount_tls(pod, "argocd-repo-server-tls", REPO_SERVER_TLS_SECRET, REPO_TLS_MOUNT);
    }
}

fn with_args(mut pod: PodSpec, args: Vec<String>) -> PodSpec {
    if let Some(container) = pod.containers.first_mut() {
        container.args = Some(args);
    }
    pod
}

/// Core Argo CD workloads
#[derive(Debug, Default)]
pub struct Workloads;

impl Workloads {
    fn server(cr: &ArgoCD, ctx: &BuildContext) -> Deployment {
        let name = component_name(cr, "server");
        let spec = &cr.spec.server;
        let mut pod = pod(
            Some(format!("{}-{SERVER}", cr.name_any())),
            vec![container(
                "argocd-server",
                argocd_image(cr, ctx),
                Vec::new(),
                &[("http", 8080), ("metrics", 8083)],
                spec.resources.as_ref(),
            )],
        );
        let mut args = vec![
            "argocd-server".to_string(),
            "--staticassets".to_string(),
            "/shared/app".to_string(),
        ];
        if matches!(
            sso::requested_provider(cr, &ctx.settings),
            Ok(Some(SsoProviderType::Dex))
        ) {
            args.push("--dex-server".to_string());
            args.push(format!("https://{}:5556", component_name(cr, "dex-server")));
        }
        repo_client(cr, ctx, &mut args, &mut pod);
        redis_client(cr, ctx, &mut args, &mut pod);
        if spec.insecure {
            args.push("--insecure".to_string());
        }
        let replicas = if spec.autoscale.enabled {
            None
        } else {
            Some(spec.replicas.unwrap_or(1))
        };
        deployment(
            cr,
            &name,
            "server",
            replicas,
            with_args(pod, args),
            tls_annotations(ctx, true, true),
        )
    }

    fn repo_server(cr: &ArgoCD, ctx: &BuildContext) -> Deployment {
        let name = component_name(cr, "repo-server");
        let mut pod = pod(
            None,
            vec![container(
                "argocd-repo-server",
                argocd_image(cr, ctx),
                Vec::new(),
                &[("server", 8081), ("metrics", 8084)],
                cr.spec.repo.resources.as_ref(),
            )],
        );
        let mut args = vec![
            "uid_entrypoint.sh".to_string(),
            "argocd-repo-server".to_string(),
        ];
        redis_client(cr, ctx, &mut args, &mut pod);
        if ctx.tls.repo_server.is_some() {
            mount_tls(&mut pod, "argocd-repo-server-tls", REPO_SERVER_TLS_SECRET, REPO_TLS_MOUNT);
        }
        deployment(
            cr,
            &name,
            "repo-server",
            Some(cr.spec.repo.replicas.unwrap_or(1)),
            with_args(pod, args),
            tls_annotations(ctx, true, true),
        )
    }

    fn redis(cr: &ArgoCD, ctx: &BuildContext) -> Deployment {
        let name = component_name(cr, "redis");
        let spec = &cr.spec.redis;
        let image = image_ref(
            spec.image.as_deref(),
            spec.version.as_deref(),
            ctx.settings.images.redis.as_deref(),
            REDIS_DEFAULT_IMAGE,
            REDIS_DEFAULT_VERSION,
        );
        let mut args: Vec<String> = ["--save", "", "--appendonly", "no"]
            .iter()
            .map(ToString::to_string)
            .collect();
        let mut pod = pod(
            None,
            vec![container(
                "redis",
                image,
                Vec::new(),
                &[("redis", 6379)],
                spec.resources.as_ref(),
            )],
        );
        if ctx.tls.redis.is_some() {
            args.extend(
                [
                    "--tls-port",
                    "6379",
                    "--port",
                    "0",
                    "--tls-cert-file",
                    &format!("{REDIS_TLS_MOUNT}/tls.crt"),
                    "--tls-key-file",
                    &format!("{REDIS_TLS_MOUNT}/tls.key"),
                    "--tls-auth-clients",
                    "no",
                ]
                .iter()
                .map(ToString::to_string),
            );
            mount_tls(&mut pod, "redis-tls", REDIS_TLS_SECRET, REDIS_TLS_MOUNT);
        }
        deployment(
            cr,
            &name,
            "redis",
            Some(1),
            with_args(pod, args),
            tls_annotations(ctx, true, false),
        )
    }

    fn application_controller(cr: &ArgoCD, ctx: &BuildContext) -> StatefulSet {
        let instance = InstanceRef::of(cr);
        let name = component_name(cr, "application-controller");
        let processors = cr
            .spec
            .controller
            .processors
            .unwrap_or(DEFAULT_PROCESSORS)
            .to_string();
        let mut pod = pod(
            Some(format!("{}-{APPLICATION_CONTROLLER}", instance.name)),
            vec![container(
                "argocd-application-controller",
                argocd_image(cr, ctx),
                Vec::new(),
                &[("metrics", 8082)],
                cr.spec.controller.resources.as_ref(),
            )],
        );
        let mut args = vec![
            "argocd-application-controller".to_string(),
            "--operation-processors".to_string(),
            processors.clone(),
            "--status-processors".to_string(),
            processors,
        ];
        repo_client(cr, ctx, &mut args, &mut pod);
        redis_client(cr, ctx, &mut args, &mut pod);
        StatefulSet {
            metadata: object_meta(
                &instance,
                &name,
                Some(&instance.namespace),
                "application-controller",
            ),
            spec: Some(StatefulSetSpec {
                replicas: Some(1),
                selector: LabelSelector {
                    match_labels: Some(selector_labels(&name)),
                    ..LabelSelector::default()
                },
                template: pod_template(
                    cr,
                    &name,
                    "application-controller",
                    with_args(pod, args),
                    tls_annotations(ctx, true, true),
                ),
                ..StatefulSetSpec::default()
            }),
            ..StatefulSet::default()
        }
    }

    fn autoscaler(cr: &ArgoCD) -> HorizontalPodAutoscaler {
        let instance = InstanceRef::of(cr);
        let name = component_name(cr, "server");
        let spec = &cr.spec.server.autoscale;
        HorizontalPodAutoscaler {
            metadata: object_meta(&instance, &name, Some(&instance.namespace), "server"),
            spec: Some(HorizontalPodAutoscalerSpec {
                scale_target_ref: CrossVersionObjectReference {
                    api_version: Some("apps/v1".to_string()),
                    kind: "Deployment".to_string(),
                    name: name.clone(),
                },
                min_replicas: Some(spec.min_replicas.unwrap_or(1)),
                max_replicas: spec.max_replicas.unwrap_or(3),
                metrics: Some(vec![MetricSpec {
                    type_: "Resource".to_string(),
                    resource: Some(ResourceMetricSource {
                        name: "cpu".to_string(),
                        target: MetricTarget {
                            type_: "Utilization".to_string(),
                            average_utilization: Some(
                                spec.target_cpu_utilization_percentage.unwrap_or(50),
                            ),
                            ..MetricTarget::default()
                        },
                    }),
                    ..MetricSpec::default()
                }]),
                ..HorizontalPodAutoscalerSpec::default()
            }),
            ..HorizontalPodAutoscaler::default()
        }
    }
}

impl ManagedKind for Workloads {
    fn component(&self) -> &'static str {
        "workloads"
    }

    fn intents(&self, cr: &ArgoCD, ctx: &BuildContext) -> Result<Vec<Intent>> {
        let mut intents = vec![
            present(Kind::Deployment, &Self::redis(cr, ctx), WORKLOAD)?,
            present(Kind::Deployment, &Self::repo_server(cr, ctx), WORKLOAD)?,
            present(Kind::Deployment, &Self::server(cr, ctx), WORKLOAD)?,
            present(
                Kind::StatefulSet,
                &Self::application_controller(cr, ctx),
                WORKLOAD,
            )?,
        ];
        if cr.spec.server.autoscale.enabled {
            intents.push(present(
                Kind::HorizontalPodAutoscaler,
                &Self::autoscaler(cr),
                SPEC_SUBSET,
            )?);
        } else {
            intents.push(Intent::Absent(ObjectKey::namespaced(
                Kind::HorizontalPodAutoscaler,
                instance_namespace(cr),
                component_name(cr, "server"),
            )));
        }
        Ok(intents)
    }
}
