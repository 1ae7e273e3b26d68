//! # CRD Tests
//!
//! `ArgoCD` manifests and the generated CustomResourceDefinition.

use argocd_operator::crd::{ArgoCD, SsoProviderType};
use kube::CustomResourceExt;

const MANIFEST: &str = r#"
apiVersion: argoproj.io/v1beta1
kind: ArgoCD
metadata:
  name: example
  namespace: argocd
spec:
  sso:
    provider: dex
    dex:
      openShiftOAuth: true
  server:
    host: argocd.example.com
    ingress:
      enabled: true
  sourceNamespaces:
    - team-a
    - team-b
  extraConfig:
    users.anonymous.enabled: "false"
"#;

#[test]
fn test_manifest_deserializes() {
    let cr: ArgoCD = serde_yaml::from_str(MANIFEST).expect("valid manifest");
    assert_eq!(cr.metadata.name.as_deref(), Some("example"));

    let sso = cr.spec.sso.as_ref().expect("sso block");
    assert_eq!(sso.provider, Some(SsoProviderType::Dex));
    assert!(sso.dex.as_ref().is_some_and(|d| d.open_shift_oauth));
    assert!(sso.keycloak.is_none());
    assert!(cr.spec.dex.is_none());

    assert!(cr.spec.server.ingress.enabled);
    assert_eq!(cr.spec.server.host.as_deref(), Some("argocd.example.com"));
    assert_eq!(cr.spec.source_namespaces, vec!["team-a", "team-b"]);
    assert_eq!(
        cr.spec.extra_config.get("users.anonymous.enabled").map(String::as_str),
        Some("false")
    );
    assert!(cr.spec.application_set.is_none());
    assert!(cr.status.is_none());
}

#[test]
fn test_empty_spec_is_valid() {
    let cr: ArgoCD = serde_yaml::from_str(
        "apiVersion: argoproj.io/v1beta1\nkind: ArgoCD\nmetadata:\n  name: bare\nspec: {}\n",
    )
    .expect("valid manifest");
    assert!(cr.spec.sso.is_none());
    assert!(!cr.spec.server.ingress.enabled);
    assert!(cr.spec.source_namespaces.is_empty());
}

#[test]
fn test_crd_definition() {
    let crd = ArgoCD::crd();
    assert_eq!(crd.spec.group, "argoproj.io");
    assert_eq!(crd.spec.names.kind, "ArgoCD");
    assert_eq!(crd.spec.scope, "Namespaced");

    let version = &crd.spec.versions[0];
    assert_eq!(version.name, "v1beta1");
    assert!(version
        .subresources
        .as_ref()
        .is_some_and(|s| s.status.is_some()));
}
