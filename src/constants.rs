//! # Constants
//!
//! Shared constants used throughout the operator.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Default watch stream backoff starting value (milliseconds)
pub const DEFAULT_BACKOFF_START_MS: u64 = 1000;

/// Default watch stream backoff maximum value (milliseconds)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;

/// Default delay before restarting watch stream after unknown errors (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Default delay before restarting watch stream after it ends (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS: u64 = 1;

/// Default number of instances reconciled in parallel
pub const DEFAULT_MAX_CONCURRENT_RECONCILIATIONS: u16 = 10;

/// How often optional API groups are re-probed (seconds)
pub const DEFAULT_FEATURE_REFRESH_INTERVAL_SECS: u64 = 300;

/// Requeue interval after a successful reconciliation (seconds)
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 600;

/// Fibonacci backoff bounds for failed reconciliations (minutes)
pub const RECONCILE_BACKOFF_MIN_MINUTES: u64 = 1;
pub const RECONCILE_BACKOFF_MAX_MINUTES: u64 = 10;

/// Field manager / event reporter name
pub const OPERATOR_NAME: &str = "argocd-operator";

/// Finalizer placed on every ArgoCD instance
pub const FINALIZER: &str = "argoproj.io/finalizer";

/// Default Argo CD image and tag
pub const ARGOCD_DEFAULT_IMAGE: &str = "quay.io/argoproj/argocd";
pub const ARGOCD_DEFAULT_VERSION: &str = "v2.13.1";

/// Default Dex image and tag
pub const DEX_DEFAULT_IMAGE: &str = "ghcr.io/dexidp/dex";
pub const DEX_DEFAULT_VERSION: &str = "v2.41.1";

/// Default Keycloak image (pinned by digest)
pub const KEYCLOAK_DEFAULT_IMAGE: &str = "quay.io/keycloak/keycloak";
pub const KEYCLOAK_DEFAULT_VERSION: &str =
    "sha256:64fb81886fde61dee55091e6033481fa5ccdac62ae30a4fd29b54eb5e97df6a9";

/// Default Redis image and tag
pub const REDIS_DEFAULT_IMAGE: &str = "redis";
pub const REDIS_DEFAULT_VERSION: &str = "7.0.15-alpine";

/// Default Argo Rollouts image and tag
pub const ROLLOUTS_DEFAULT_IMAGE: &str = "quay.io/argoproj/argo-rollouts";
pub const ROLLOUTS_DEFAULT_VERSION: &str = "v1.7.2";

/// Default Prometheus replica count for the monitoring integration
pub const DEFAULT_PROMETHEUS_REPLICAS: i32 = 1;

/// Externally provisioned TLS secrets whose rotation rolls dependent pods
pub const REDIS_TLS_SECRET: &str = "argocd-operator-redis-tls";
pub const REPO_SERVER_TLS_SECRET: &str = "argocd-repo-server-tls";
