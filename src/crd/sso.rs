//! # SSO Spec
//!
//! Single sign-on provider configuration. Dex and Keycloak are mutually
//! exclusive; the legacy top-level `spec.dex` field is still honoured.

use crate::crd::ResourceRequirementsSpec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SsoProviderType {
    Dex,
    Keycloak,
}

impl SsoProviderType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SsoProviderType::Dex => "dex",
            SsoProviderType::Keycloak => "keycloak",
        }
    }
}

impl std::fmt::Display for SsoProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SsoSpec {
    /// Which provider to run; required whenever `sso` is set
    #[serde(default)]
    pub provider: Option<SsoProviderType>,
    #[serde(default)]
    pub dex: Option<DexSpec>,
    #[serde(default)]
    pub keycloak: Option<KeycloakSpec>,
    /// Deprecated: use `sso.keycloak.image`
    #[serde(default)]
    pub image: Option<String>,
    /// Deprecated: use `sso.keycloak.version`
    #[serde(default)]
    pub version: Option<String>,
    /// Deprecated: use `sso.keycloak.verifyTLS`
    #[serde(default, rename = "verifyTLS")]
    pub verify_tls: Option<bool>,
    /// Deprecated: use `sso.keycloak.resources`
    #[serde(default)]
    pub resources: Option<ResourceRequirementsSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DexSpec {
    /// Raw `dex.config` for `argocd-cm`
    #[serde(default)]
    pub config: Option<String>,
    /// Use the OpenShift OAuth connector
    #[serde(default, rename = "openShiftOAuth")]
    pub open_shift_oauth: bool,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub resources: Option<ResourceRequirementsSpec>,
}

impl DexSpec {
    /// A legacy `spec.dex` block only requests Dex when it carries configuration
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.config.as_deref().is_some_and(|c| !c.trim().is_empty()) || self.open_shift_oauth
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KeycloakSpec {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    /// Verify the Argo CD server certificate when talking to Keycloak (default true)
    #[serde(default, rename = "verifyTLS")]
    pub verify_tls: Option<bool>,
    #[serde(default)]
    pub resources: Option<ResourceRequirementsSpec>,
    /// PEM encoded CA used by Argo CD to verify Keycloak
    #[serde(default, rename = "rootCA")]
    pub root_ca: Option<String>,
}
