//! # Trust Material
//!
//! CA and server certificate, admin password and server secret key.
//!
//! Generated values are random, so they are read back from the cluster when
//! the secrets already exist and only generated for missing secrets. The
//! secrets compare labels only; their content is never overwritten.

use super::{component_name, instance_namespace, present, BuildContext, ManagedKind};
use crate::cluster::{from_dynamic, ClusterApi, Kind, ObjectKey};
use crate::constants::{REDIS_TLS_SECRET, REPO_SERVER_TLS_SECRET};
use crate::controller::apply::{Intent, LABELS_ONLY};
use crate::controller::labels::{object_meta, InstanceRef};
use crate::crd::ArgoCD;
use anyhow::{Context, Result};
use chrono::Datelike;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::ByteString;
use rand::{distributions::Alphanumeric, Rng};
use rcgen::{
    string::Ia5String, BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType,
};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::info;

const TLS_CERT: &str = "tls.crt";
const TLS_KEY: &str = "tls.key";
const CA_CERT: &str = "ca.crt";
const ADMIN_PASSWORD: &str = "admin.password";
const SERVER_SECRET_KEY: &str = "server.secretkey";

pub const ARGOCD_SECRET: &str = "argocd-secret";
/// Keys of `<cr>-keycloak-secret`
pub const KEYCLOAK_ADMIN_USER: &str = "ADMIN_USERNAME";
pub const KEYCLOAK_ADMIN_PASSWORD: &str = "ADMIN_PASSWORD";

const CA_VALIDITY_YEARS: i32 = 10;
const CERT_VALIDITY_YEARS: i32 = 1;

#[derive(Clone, Default)]
pub struct TrustMaterial {
    pub ca_cert_pem: String,
    pub ca_key_pem: String,
    pub tls_cert_pem: String,
    pub tls_key_pem: String,
    pub admin_password: String,
    pub server_secret_key: String,
    pub keycloak_admin_password: String,
}

impl std::fmt::Debug for TrustMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustMaterial")
            .field("ca_cert_pem", &(!self.ca_cert_pem.is_empty()))
            .field("tls_cert_pem", &(!self.tls_cert_pem.is_empty()))
            .field("secrets", &"***")
            .finish()
    }
}

async fn secret_data(
    cluster: &dyn ClusterApi,
    namespace: &str,
    name: &str,
) -> Result<BTreeMap<String, String>> {
    let key = ObjectKey::namespaced(Kind::Secret, namespace, name);
    let Some(obj) = cluster.get(&key).await? else {
        return Ok(BTreeMap::new());
    };
    let secret: Secret = from_dynamic(&obj)?;
    Ok(secret
        .data
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(k, v)| String::from_utf8(v.0).ok().map(|v| (k, v)))
        .filter(|(_, v)| !v.is_empty())
        .collect())
}

fn random_secret(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

impl TrustMaterial {
    pub async fn load_or_generate(cluster: &dyn ClusterApi, cr: &ArgoCD) -> Result<Self> {
        let ns = instance_namespace(cr);
        let ca = secret_data(cluster, &ns, &component_name(cr, "ca")).await?;
        let tls = secret_data(cluster, &ns, &component_name(cr, "tls")).await?;
        let cluster_secret = secret_data(cluster, &ns, &component_name(cr, "cluster")).await?;
        let argocd_secret = secret_data(cluster, &ns, ARGOCD_SECRET).await?;
        let keycloak = secret_data(cluster, &ns, &component_name(cr, "keycloak-secret")).await?;

        let (ca_cert_pem, ca_key_pem) = match (ca.get(TLS_CERT), ca.get(TLS_KEY)) {
            (Some(cert), Some(key)) => (cert.clone(), key.clone()),
            _ => {
                info!("Generating certificate authority for {}", InstanceRef::of(cr));
                generate_ca(&cr.metadata.name.clone().unwrap_or_default())?
            }
        };
        let (tls_cert_pem, tls_key_pem) = match (tls.get(TLS_CERT), tls.get(TLS_KEY)) {
            (Some(cert), Some(key)) => (cert.clone(), key.clone()),
            _ => generate_server_cert(&ca_cert_pem, &ca_key_pem, &server_names(cr))?,
        };

        Ok(Self {
            ca_cert_pem,
            ca_key_pem,
            tls_cert_pem,
            tls_key_pem,
            admin_password: cluster_secret
                .get(ADMIN_PASSWORD)
                .cloned()
                .unwrap_or_else(|| random_secret(32)),
            server_secret_key: argocd_secret
                .get(SERVER_SECRET_KEY)
                .cloned()
                .unwrap_or_else(|| random_secret(32)),
            keycloak_admin_password: keycloak
                .get(KEYCLOAK_ADMIN_PASSWORD)
                .cloned()
                .unwrap_or_else(|| random_secret(24)),
        })
    }
}

/// DNS names the server certificate is valid for
fn server_names(cr: &ArgoCD) -> Vec<String> {
    let service = component_name(cr, "server");
    let ns = instance_namespace(cr);
    let mut names = vec![
        "localhost".to_string(),
        service.clone(),
        format!("{service}.{ns}"),
        format!("{service}.{ns}.svc"),
        format!("{service}.{ns}.svc.cluster.local"),
    ];
    if let Some(host) = cr.spec.server.host.as_deref().filter(|h| !h.is_empty()) {
        names.push(host.to_string());
    }
    names
}

/// Valid from today for `years` years
fn set_validity(params: &mut CertificateParams, years: i32) {
    let today = chrono::Utc::now().date_naive();
    let month = u8::try_from(today.month()).unwrap_or(1);
    // day 29-31 does not exist in every month of the expiry year
    let day = u8::try_from(today.day()).unwrap_or(1).min(28);
    params.not_before = rcgen::date_time_ymd(today.year(), month, day);
    params.not_after = rcgen::date_time_ymd(today.year() + years, month, day);
}

fn generate_ca(instance: &str) -> Result<(String, String)> {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(
        DnType::CommonName,
        DnValue::Utf8String(format!("{instance} argocd ca")),
    );
    dn.push(
        DnType::OrganizationName,
        DnValue::Utf8String("Argo CD".to_string()),
    );
    params.distinguished_name = dn;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    set_validity(&mut params, CA_VALIDITY_YEARS);

    let key_pair = KeyPair::generate().context("Failed to generate CA key")?;
    let cert = params
        .self_signed(&key_pair)
        .context("Failed to self-sign CA certificate")?;
    Ok((cert.pem(), key_pair.serialize_pem()))
}

fn generate_server_cert(
    ca_cert_pem: &str,
    ca_key_pem: &str,
    names: &[String],
) -> Result<(String, String)> {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(
        DnType::CommonName,
        DnValue::Utf8String(names.get(1).cloned().unwrap_or_default()),
    );
    params.distinguished_name = dn;
    params.is_ca = IsCa::NoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![rcgen::ExtendedKeyUsagePurpose::ServerAuth];
    set_validity(&mut params, CERT_VALIDITY_YEARS);
    params.subject_alt_names = names
        .iter()
        .map(|name| {
            Ia5String::try_from(name.clone())
                .map(SanType::DnsName)
                .with_context(|| format!("Invalid DNS name '{name}'"))
        })
        .collect::<Result<Vec<_>>>()?;

    let server_key = KeyPair::generate().context("Failed to generate server key")?;
    let ca_key = KeyPair::from_pem(ca_key_pem).context("Failed to parse CA key")?;
    let issuer =
        Issuer::from_ca_cert_pem(ca_cert_pem, &ca_key).context("Failed to load CA certificate")?;
    let cert = params
        .signed_by(&server_key, &issuer)
        .context("Failed to sign server certificate")?;
    Ok((cert.pem(), server_key.serialize_pem()))
}

/// Rollout annotations for externally provisioned TLS material
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsHashes {
    pub redis: Option<String>,
    pub repo_server: Option<String>,
    /// Hash of the ApplicationSet SCM root CA, set while the named ConfigMap exists
    pub scm_root_ca: Option<String>,
}

impl TlsHashes {
    pub async fn load(cluster: &dyn ClusterApi, cr: &ArgoCD) -> Result<Self> {
        let ns = instance_namespace(cr);
        let hash = |data: BTreeMap<String, String>| {
            data.get(TLS_CERT).map(|c| sha256_hex(c.as_bytes()))
        };
        let scm_root_ca = match scm_root_ca_config_map(cr) {
            Some(name) => match config_map_data(cluster, &ns, name).await? {
                Some(data) => Some(sha256_hex(serde_json::to_string(&data)?.as_bytes())),
                None => None,
            },
            None => None,
        };
        Ok(Self {
            redis: hash(secret_data(cluster, &ns, REDIS_TLS_SECRET).await?),
            repo_server: hash(secret_data(cluster, &ns, REPO_SERVER_TLS_SECRET).await?),
            scm_root_ca,
        })
    }
}

/// ConfigMap named as the ApplicationSet SCM root CA, when one is configured
#[must_use]
pub fn scm_root_ca_config_map(cr: &ArgoCD) -> Option<&str> {
    cr.spec
        .application_set
        .as_ref()
        .and_then(|spec| spec.scm_root_ca_config_map.as_deref())
        .filter(|name| !name.is_empty())
}

/// Data of a ConfigMap, or `None` when it does not exist
async fn config_map_data(
    cluster: &dyn ClusterApi,
    namespace: &str,
    name: &str,
) -> Result<Option<BTreeMap<String, String>>> {
    let key = ObjectKey::namespaced(Kind::ConfigMap, namespace, name);
    let Some(obj) = cluster.get(&key).await? else {
        return Ok(None);
    };
    let map: ConfigMap = from_dynamic(&obj)?;
    Ok(Some(map.data.unwrap_or_default()))
}

#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Secret with string values
#[must_use]
pub fn secret(
    instance: &InstanceRef,
    name: &str,
    component: &str,
    type_: &str,
    data: &[(&str, &str)],
) -> Secret {
    Secret {
        metadata: object_meta(instance, name, Some(&instance.namespace), component),
        type_: Some(type_.to_string()),
        data: Some(
            data.iter()
                .map(|(k, v)| ((*k).to_string(), ByteString(v.as_bytes().to_vec())))
                .collect(),
        ),
        ..Secret::default()
    }
}

/// Certificate authority, server certificate and generated credentials
#[derive(Debug, Default)]
pub struct Trust;

impl ManagedKind for Trust {
    fn component(&self) -> &'static str {
        "trust"
    }

    fn intents(&self, cr: &ArgoCD, ctx: &BuildContext) -> Result<Vec<Intent>> {
        let instance = InstanceRef::of(cr);
        let t = &ctx.trust;
        let secrets = [
            secret(
                &instance,
                &component_name(cr, "ca"),
                "ca",
                "kubernetes.io/tls",
                &[
                    (TLS_CERT, &t.ca_cert_pem),
                    (TLS_KEY, &t.ca_key_pem),
                    (CA_CERT, &t.ca_cert_pem),
                ],
            ),
            secret(
                &instance,
                &component_name(cr, "tls"),
                "server",
                "kubernetes.io/tls",
                &[(TLS_CERT, &t.tls_cert_pem), (TLS_KEY, &t.tls_key_pem)],
            ),
            secret(
                &instance,
                &component_name(cr, "cluster"),
                "server",
                "Opaque",
                &[(ADMIN_PASSWORD, &t.admin_password)],
            ),
            secret(
                &instance,
                ARGOCD_SECRET,
                "server",
                "Opaque",
                &[
                    (SERVER_SECRET_KEY, &t.server_secret_key),
                    (TLS_CERT, &t.tls_cert_pem),
                    (TLS_KEY, &t.tls_key_pem),
                ],
            ),
        ];
        secrets
            .iter()
            .map(|s| present(Kind::Secret, s, LABELS_ONLY))
            .collect()
    }
}
