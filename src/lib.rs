//! Argo CD Operator Library
//!
//! Reconciliation engine that turns `ArgoCD` custom resources into a running
//! Argo CD installation. Unit tests live next to the code they cover.
//!
//! ## Quick Start
//!
//! ```rust
//! use argocd_operator::prelude::*;
//! ```

pub mod cluster;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod prelude;
pub mod runtime;
pub mod server;
