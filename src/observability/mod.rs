//! # Observability
//!
//! - `metrics`: Prometheus metrics collection
//! - `events`: Kubernetes events on ArgoCD resources

pub mod events;
pub mod metrics;

pub use metrics::*;
