//! # Custom Resource Definitions
//!
//! CRD types for the ArgoCD operator.
//!
//! ## Module Structure
//!
//! - `spec.rs` - the `ArgoCD` resource and per-component specification
//! - `sso.rs` - single sign-on provider configuration (Dex, Keycloak)
//! - `status.rs` - status projection and conditions

mod spec;
mod sso;
mod status;

pub use spec::{
    ApplicationControllerSpec, ApplicationSetSpec, ArgoCD, ArgoCDSpec, AutoscaleSpec,
    IngressTlsSpec, NodePlacementSpec, NotificationsSpec, PrometheusSpec, RbacSpec, RedisSpec,
    RepoSpec, ResourceRequirementsSpec, RolloutsSpec, RouteSpec, ServerIngressSpec, ServerSpec,
    TolerationSpec,
};
pub use sso::{DexSpec, KeycloakSpec, SsoProviderType, SsoSpec};
pub use status::{ArgoCDStatus, ComponentPhase, Condition, ConditionStatus};
