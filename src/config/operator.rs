//! # Operator Settings
//!
//! Behaviour toggles and image overrides read once at startup and injected
//! into the reconciler context.

use std::collections::BTreeSet;

/// Full image references (`repo:tag` or `repo@digest`) overriding the built-in defaults
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageOverrides {
    /// `ARGOCD_IMAGE`
    pub argocd: Option<String>,
    /// `ARGOCD_REDIS_IMAGE`
    pub redis: Option<String>,
    /// `ARGOCD_DEX_IMAGE`
    pub dex: Option<String>,
    /// `ARGOCD_KEYCLOAK_IMAGE`
    pub keycloak: Option<String>,
    /// `ARGO_ROLLOUTS_IMAGE`
    pub rollouts: Option<String>,
}

/// Namespaces whose instances are granted cluster-scoped RBAC
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ClusterConfigNamespaces {
    #[default]
    None,
    /// `*`
    All,
    Listed(BTreeSet<String>),
}

impl ClusterConfigNamespaces {
    /// Parse the comma separated `ARGOCD_CLUSTER_CONFIG_NAMESPACES` value
    #[must_use]
    pub fn parse(value: &str) -> Self {
        let listed: BTreeSet<String> = value
            .split(',')
            .map(str::trim)
            .filter(|ns| !ns.is_empty())
            .map(ToString::to_string)
            .collect();
        if listed.contains("*") {
            Self::All
        } else if listed.is_empty() {
            Self::None
        } else {
            Self::Listed(listed)
        }
    }

    #[must_use]
    pub fn allows(&self, namespace: &str) -> bool {
        match self {
            Self::None => false,
            Self::All => true,
            Self::Listed(namespaces) => namespaces.contains(namespace),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OperatorSettings {
    pub images: ImageOverrides,
    /// `DISABLE_DEX`: Dex may not be requested and legacy Dex config is ignored
    pub disable_dex: bool,
    /// `CONTROLLER_CLUSTER_ROLE`: bind the application controller to this ClusterRole
    pub controller_cluster_role: Option<String>,
    /// `SERVER_CLUSTER_ROLE`: bind the server to this ClusterRole
    pub server_cluster_role: Option<String>,
    /// `ARGOCD_CLUSTER_CONFIG_NAMESPACES`
    pub cluster_config_namespaces: ClusterConfigNamespaces,
    /// `REMOVE_MANAGED_BY_LABEL_ON_ARGOCD_DELETION`
    pub remove_managed_by_label_on_deletion: bool,
}

impl OperatorSettings {
    /// Load settings from the process environment
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(super::env_var_opt)
    }

    /// Load settings through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |key: &str| lookup(key).is_some_and(|v| super::parse_bool(&v));
        Self {
            images: ImageOverrides {
                argocd: lookup("ARGOCD_IMAGE"),
                redis: lookup("ARGOCD_REDIS_IMAGE"),
                dex: lookup("ARGOCD_DEX_IMAGE"),
                keycloak: lookup("ARGOCD_KEYCLOAK_IMAGE"),
                rollouts: lookup("ARGO_ROLLOUTS_IMAGE"),
            },
            disable_dex: flag("DISABLE_DEX"),
            controller_cluster_role: lookup("CONTROLLER_CLUSTER_ROLE"),
            server_cluster_role: lookup("SERVER_CLUSTER_ROLE"),
            cluster_config_namespaces: lookup("ARGOCD_CLUSTER_CONFIG_NAMESPACES")
                .map(|v| ClusterConfigNamespaces::parse(&v))
                .unwrap_or_default(),
            remove_managed_by_label_on_deletion: flag(
                "REMOVE_MANAGED_BY_LABEL_ON_ARGOCD_DELETION",
            ),
        }
    }
}
