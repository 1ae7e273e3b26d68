//! # Prelude
//!
//! Re-exports commonly used types.
//!
//! ```rust
//! use argocd_operator::prelude::*;
//! ```

// CRD types
pub use crate::crd::*;

// Cluster access
pub use crate::cluster::{ClusterApi, ClusterError, Kind, ObjectKey};

// Reconciler types
pub use crate::controller::hooks::HookRegistry;
pub use crate::controller::reconciler::{reconcile, BackoffState, Reconciler, ReconcilerError};

// Config types
pub use crate::config::{
    ControllerConfig, OperatorSettings, ServerConfig, SharedControllerConfig, SharedServerConfig,
};
