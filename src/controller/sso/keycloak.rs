//! Keycloak resources. Exposed through a route when the route API is served,
//! otherwise through an ingress.

use crate::cluster::{Kind, ObjectKey};
use crate::constants::{KEYCLOAK_DEFAULT_IMAGE, KEYCLOAK_DEFAULT_VERSION};
use crate::controller::apply::{Intent, LABELS_ONLY};
use crate::controller::labels::InstanceRef;
use crate::controller::resources::config::keycloak_host;
use crate::controller::resources::network::{ingress, port, route, service};
use crate::controller::resources::trust::{secret, KEYCLOAK_ADMIN_PASSWORD, KEYCLOAK_ADMIN_USER};
use crate::controller::resources::workloads::{container, deployment, pod};
use crate::controller::resources::{
    component_name, image_ref, present, present_json, BuildContext, ManagedKind, INGRESS, SERVICE,
    SPEC_SUBSET, WORKLOAD,
};
use crate::crd::ArgoCD;
use anyhow::Result;
use k8s_openapi::api::core::v1::{EnvVar, EnvVarSource, SecretKeySelector};
use k8s_openapi::api::networking::v1::IngressTLS;
use std::collections::BTreeMap;

const COMPONENT: &str = "keycloak";

fn secret_env(name: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.to_string(),
                key: key.to_string(),
                optional: None,
            }),
            ..EnvVarSource::default()
        }),
        ..EnvVar::default()
    }
}

fn env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..EnvVar::default()
    }
}

/// Image from `spec.sso.keycloak`, then the deprecated `spec.sso` fields
fn image(cr: &ArgoCD, ctx: &BuildContext) -> String {
    let sso = cr.spec.sso.as_ref();
    let keycloak = sso.and_then(|s| s.keycloak.as_ref());
    image_ref(
        keycloak
            .and_then(|k| k.image.as_deref())
            .or_else(|| sso.and_then(|s| s.image.as_deref())),
        keycloak
            .and_then(|k| k.version.as_deref())
            .or_else(|| sso.and_then(|s| s.version.as_deref())),
        ctx.settings.images.keycloak.as_deref(),
        KEYCLOAK_DEFAULT_IMAGE,
        KEYCLOAK_DEFAULT_VERSION,
    )
}

/// Keys of every object the Keycloak resource set may hold. The route is
/// only looked up while the route API is served.
#[must_use]
pub fn keys(cr: &ArgoCD, ctx: &BuildContext) -> Vec<ObjectKey> {
    let ns = InstanceRef::of(cr).namespace;
    let name = component_name(cr, COMPONENT);
    let mut keys = vec![
        ObjectKey::namespaced(Kind::Secret, &ns, component_name(cr, "keycloak-secret")),
        ObjectKey::namespaced(Kind::Service, &ns, &name),
        ObjectKey::namespaced(Kind::Deployment, &ns, &name),
        ObjectKey::namespaced(Kind::Ingress, &ns, &name),
    ];
    if ctx.features.routes {
        keys.push(ObjectKey::namespaced(Kind::Route, &ns, &name));
    }
    keys
}

#[derive(Debug, Default)]
pub struct KeycloakResources;

impl ManagedKind for KeycloakResources {
    fn component(&self) -> &'static str {
        "keycloak"
    }

    fn intents(&self, cr: &ArgoCD, ctx: &BuildContext) -> Result<Vec<Intent>> {
        let instance = InstanceRef::of(cr);
        let ns = instance.namespace.as_str();
        let name = component_name(cr, COMPONENT);
        let secret_name = component_name(cr, "keycloak-secret");
        let host = keycloak_host(cr);
        let sso = cr.spec.sso.as_ref();
        let resources = sso
            .and_then(|s| s.keycloak.as_ref())
            .and_then(|k| k.resources.as_ref())
            .or_else(|| sso.and_then(|s| s.resources.as_ref()));

        let mut keycloak = container(
            "keycloak",
            image(cr, ctx),
            vec!["start-dev".to_string()],
            &[("http", 8080), ("https", 8443)],
            resources,
        );
        keycloak.env = Some(vec![
            secret_env("KEYCLOAK_ADMIN", &secret_name, KEYCLOAK_ADMIN_USER),
            secret_env("KEYCLOAK_ADMIN_PASSWORD", &secret_name, KEYCLOAK_ADMIN_PASSWORD),
            env("KC_HOSTNAME", &host),
            env("KC_PROXY", "edge"),
        ]);

        let mut intents = vec![
            present(
                Kind::Secret,
                &secret(
                    &instance,
                    &secret_name,
                    COMPONENT,
                    "Opaque",
                    &[
                        (KEYCLOAK_ADMIN_USER, "admin"),
                        (KEYCLOAK_ADMIN_PASSWORD, &ctx.trust.keycloak_admin_password),
                    ],
                ),
                LABELS_ONLY,
            )?,
            present(
                Kind::Service,
                &service(
                    &instance,
                    &name,
                    COMPONENT,
                    &name,
                    vec![port("http", 8080, 8080), port("https", 8443, 8443)],
                ),
                SERVICE,
            )?,
            present(
                Kind::Deployment,
                &deployment(
                    cr,
                    &name,
                    COMPONENT,
                    Some(1),
                    pod(None, vec![keycloak]),
                    BTreeMap::new(),
                ),
                WORKLOAD,
            )?,
        ];

        if ctx.features.routes {
            intents.push(present_json(
                Kind::Route,
                route(&instance, &name, COMPONENT, None, &name, "https", "reencrypt")?,
                SPEC_SUBSET,
            )?);
            intents.push(Intent::Absent(ObjectKey::namespaced(Kind::Ingress, ns, &name)));
        } else {
            intents.push(present(
                Kind::Ingress,
                &ingress(
                    &instance,
                    &name,
                    COMPONENT,
                    &host,
                    &name,
                    "http",
                    None,
                    BTreeMap::new(),
                    vec![IngressTLS {
                        hosts: Some(vec![host.clone()]),
                        secret_name: None,
                    }],
                ),
                INGRESS,
            )?);
        }
        Ok(intents)
    }
}
