//! # Configuration Objects
//!
//! `argocd-cm` and `argocd-rbac-cm` are owned outright. The known-hosts, TLS
//! and GPG config maps are seeded once and then left to users.

use super::{component_name, instance_namespace, present, BuildContext, ManagedKind, CONFIG_MAP};
use crate::cluster::Kind;
use crate::controller::apply::{Intent, LABELS_ONLY};
use crate::controller::labels::{object_meta, InstanceRef};
use crate::controller::sso;
use crate::crd::{ArgoCD, SsoProviderType};
use anyhow::Result;
use k8s_openapi::api::core::v1::ConfigMap;
use std::collections::BTreeMap;

pub const ARGOCD_CM: &str = "argocd-cm";
pub const ARGOCD_RBAC_CM: &str = "argocd-rbac-cm";
pub const ARGOCD_KNOWN_HOSTS_CM: &str = "argocd-ssh-known-hosts-cm";
pub const ARGOCD_TLS_CERTS_CM: &str = "argocd-tls-certs-cm";
pub const ARGOCD_GPG_KEYS_CM: &str = "argocd-gpg-keys-cm";

const DEFAULT_KNOWN_HOSTS: &str = "\
bitbucket.org ssh-rsa AAAAB3NzaC1yc2EAAAABIwAAAQEAubiN81eDcafrgMeLzaFPsw2kNvEcqTKl/VqLat/MaB33pZy0y3rJZtnqwR2qOOvbwKZYKiEO1O6VqNEBxKvJJelCq0dTXWT5pbO2gDXC6h6QDXCaHo6pOHGPUy+YBaGQRGuSusMEASYiWunYN0vCAI8QaXnWMXNMdFP3jHAJH0eDsoiGnLPBlBp4TNm6rYI74nMzgz3B9IikW4WVK+dc8KZJZWYjAuORU3jc1c/NPskD2ASinf8v3xnfXeukU0sJ5N6m5E8VLjObPEO+mN2t/FZTMZLiFqPWc/ALSqnMnnhwrNi2rbfg/rd/IpL8Le3pSBne8+seeFVBoGqzHM9yXw==
github.com ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIOMqqnkVzrm0SdG6UOoqKLsabgH5C9okWi0dh2l9GKJl
gitlab.com ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIAfuCHKVTjquxvt6CM6tdG4SLp1Btn/nOeHHE5UOzRdf
ssh.dev.azure.com ssh-rsa AAAAB3NzaC1yc2EAAAADAQABAAABAQC7Hr1oTWqNqOlzGJOfGJ4NakVyIzf1rXYd4d7wo6jBlkLvCA4odBlL0mDUyZ0/QUfTTqeu+tm22gOsv+VrVTMk6vwRU75gY/y9ut5Mb3bR5BV58dKXyq9A9UeB5Cakehn5Zgm6x1mKoVyf+FFn26iYqXJRgzIZZcZ5V6hrE0Qg39kZm4az48o0AUbf6Sp4SLdvnuMa2sVNwHBboS7EJkm57XQPVU3/QpyNLHbWDdzwtrlS+ez30S3AdYhLKEOxAG8weOnyrtLJAUen9mTkol8oII1edf7mWWbWVf0nBmly21+nZcmCTISQBtdcyPaEno7fFQMDD26/s0lfKob4Kw8H
";

fn config_map(
    instance: &InstanceRef,
    name: &str,
    data: BTreeMap<String, String>,
) -> ConfigMap {
    ConfigMap {
        metadata: object_meta(instance, name, Some(&instance.namespace), "config"),
        data: (!data.is_empty()).then_some(data),
        ..ConfigMap::default()
    }
}

fn dex_config(cr: &ArgoCD) -> Option<String> {
    let dex = cr
        .spec
        .sso
        .as_ref()
        .and_then(|s| s.dex.as_ref())
        .or(cr.spec.dex.as_ref())?;
    if let Some(config) = dex.config.as_deref().filter(|c| !c.trim().is_empty()) {
        return Some(config.to_string());
    }
    dex.open_shift_oauth.then(|| {
        format!(
            "connectors:\n- config:\n    clientID: system:serviceaccount:{ns}:{cr}-argocd-dex-server\n    clientSecret: $oidc.dex.clientSecret\n    insecureCA: true\n    redirectURI: https://{host}/api/dex/callback\n  id: openshift\n  name: OpenShift\n  type: openshift\n",
            ns = instance_namespace(cr),
            cr = cr.metadata.name.as_deref().unwrap_or_default(),
            host = server_host(cr),
        )
    })
}

fn oidc_config(cr: &ArgoCD) -> String {
    let verify_tls = cr
        .spec
        .sso
        .as_ref()
        .and_then(|s| s.keycloak.as_ref().and_then(|k| k.verify_tls).or(s.verify_tls))
        .unwrap_or(true);
    let mut config = format!(
        "name: Keycloak\nissuer: https://{}/realms/argocd\nclientID: argocd\nclientSecret: $oidc.keycloak.clientSecret\nrequestedScopes: [\"openid\", \"profile\", \"email\", \"groups\"]\n",
        keycloak_host(cr)
    );
    if !verify_tls {
        config.push_str("insecureSkipVerify: true\n");
    }
    if let Some(root_ca) = cr
        .spec
        .sso
        .as_ref()
        .and_then(|s| s.keycloak.as_ref())
        .and_then(|k| k.root_ca.as_deref())
    {
        config.push_str("rootCA: |\n");
        for line in root_ca.lines() {
            config.push_str("  ");
            config.push_str(line);
            config.push('\n');
        }
    }
    config
}

/// External host of the Argo CD server
#[must_use]
pub fn server_host(cr: &ArgoCD) -> String {
    cr.spec
        .server
        .host
        .clone()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| component_name(cr, "server"))
}

/// External host of Keycloak
#[must_use]
pub fn keycloak_host(cr: &ArgoCD) -> String {
    format!("{}.{}", component_name(cr, "keycloak"), instance_namespace(cr))
}

/// Argo CD config maps
#[derive(Debug, Default)]
pub struct Configuration;

impl Configuration {
    fn argocd_cm(cr: &ArgoCD, ctx: &BuildContext) -> BTreeMap<String, String> {
        let mut data = BTreeMap::from([
            ("admin.enabled".to_string(), "true".to_string()),
            (
                "application.instanceLabelKey".to_string(),
                "app.kubernetes.io/instance".to_string(),
            ),
            ("url".to_string(), format!("https://{}", server_host(cr))),
        ]);
        match sso::requested_provider(cr, &ctx.settings) {
            Ok(Some(SsoProviderType::Dex)) => {
                if let Some(config) = dex_config(cr) {
                    data.insert("dex.config".to_string(), config);
                }
            }
            Ok(Some(SsoProviderType::Keycloak)) => {
                data.insert("oidc.config".to_string(), oidc_config(cr));
            }
            // provider errors are reported by the provider stage
            Ok(None) | Err(_) => {}
        }
        data.extend(cr.spec.extra_config.clone());
        data
    }

    fn rbac_cm(cr: &ArgoCD) -> BTreeMap<String, String> {
        let rbac = &cr.spec.rbac;
        let mut data = BTreeMap::new();
        if let Some(policy) = &rbac.policy {
            data.insert("policy.csv".to_string(), policy.clone());
        }
        data.insert(
            "policy.default".to_string(),
            rbac.default_policy.clone().unwrap_or_default(),
        );
        data.insert(
            "scopes".to_string(),
            rbac.scopes.clone().unwrap_or_else(|| "[groups]".to_string()),
        );
        data
    }
}

impl ManagedKind for Configuration {
    fn component(&self) -> &'static str {
        "config"
    }

    fn intents(&self, cr: &ArgoCD, ctx: &BuildContext) -> Result<Vec<Intent>> {
        let instance = InstanceRef::of(cr);
        Ok(vec![
            present(
                Kind::ConfigMap,
                &config_map(&instance, ARGOCD_CM, Self::argocd_cm(cr, ctx)),
                CONFIG_MAP,
            )?,
            present(
                Kind::ConfigMap,
                &config_map(&instance, ARGOCD_RBAC_CM, Self::rbac_cm(cr)),
                CONFIG_MAP,
            )?,
            present(
                Kind::ConfigMap,
                &config_map(
                    &instance,
                    ARGOCD_KNOWN_HOSTS_CM,
                    BTreeMap::from([(
                        "ssh_known_hosts".to_string(),
                        DEFAULT_KNOWN_HOSTS.to_string(),
                    )]),
                ),
                LABELS_ONLY,
            )?,
            present(
                Kind::ConfigMap,
                &config_map(&instance, ARGOCD_TLS_CERTS_CM, BTreeMap::new()),
                LABELS_ONLY,
            )?,
            present(
                Kind::ConfigMap,
                &config_map(&instance, ARGOCD_GPG_KEYS_CM, BTreeMap::new()),
                LABELS_ONLY,
            )?,
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::resources::testing::instance;
    use crate::crd::{ArgoCDSpec, DexSpec, KeycloakSpec, RbacSpec, SsoSpec};

    fn argocd_cm(cr: &ArgoCD) -> BTreeMap<String, String> {
        let intents = Configuration.intents(cr, &BuildContext::default()).unwrap();
        let Intent::Present(desired) = &intents[0] else {
            panic!("argocd-cm must be present");
        };
        assert_eq!(desired.key.name, ARGOCD_CM);
        let cm: ConfigMap = crate::cluster::from_dynamic(&desired.object).unwrap();
        cm.data.unwrap_or_default()
    }

    #[test]
    fn test_extra_config_and_url() {
        let cr = instance(ArgoCDSpec {
            extra_config: BTreeMap::from([("ui.bannercontent".to_string(), "hello".to_string())]),
            server: crate::crd::ServerSpec {
                host: Some("argocd.example.com".into()),
                ..Default::default()
            },
            ..ArgoCDSpec::default()
        });
        let data = argocd_cm(&cr);
        assert_eq!(data["url"], "https://argocd.example.com");
        assert_eq!(data["ui.bannercontent"], "hello");
        assert!(!data.contains_key("dex.config"));
    }

    #[test]
    fn test_dex_config_from_sso() {
        let cr = instance(ArgoCDSpec {
            sso: Some(SsoSpec {
                provider: Some(SsoProviderType::Dex),
                dex: Some(DexSpec {
                    open_shift_oauth: true,
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..ArgoCDSpec::default()
        });
        let data = argocd_cm(&cr);
        assert!(data["dex.config"].contains("type: openshift"));
        assert!(data["dex.config"].contains("example-argocd-dex-server"));
    }

    #[test]
    fn test_oidc_config_for_keycloak() {
        let cr = instance(ArgoCDSpec {
            sso: Some(SsoSpec {
                provider: Some(SsoProviderType::Keycloak),
                keycloak: Some(KeycloakSpec {
                    verify_tls: Some(false),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..ArgoCDSpec::default()
        });
        let data = argocd_cm(&cr);
        let oidc = &data["oidc.config"];
        assert!(oidc.contains("issuer: https://example-keycloak.argocd/realms/argocd"));
        assert!(oidc.contains("insecureSkipVerify: true"));
    }

    #[test]
    fn test_rbac_cm_defaults() {
        let cr = instance(ArgoCDSpec {
            rbac: RbacSpec {
                policy: Some("g, admins, role:admin".into()),
                ..Default::default()
            },
            ..ArgoCDSpec::default()
        });
        let data = Configuration::rbac_cm(&cr);
        assert_eq!(data["policy.csv"], "g, admins, role:admin");
        assert_eq!(data["policy.default"], "");
        assert_eq!(data["scopes"], "[groups]");
    }
}
