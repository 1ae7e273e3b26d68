//! # Controller
//!
//! Reconciliation engine for `ArgoCD` instances.
//!
//! - `apply`: diff and apply engine for desired objects
//! - `backoff`: Fibonacci backoff for error retries
//! - `events`: watch event routing to owning instances
//! - `hooks`: mutation hooks run before objects are written
//! - `labels`: labels, back references and instance identity
//! - `reconciler`: orchestration of a reconciliation cycle
//! - `resources`: desired-state builders per resource group
//! - `sso`: single sign-on provider state machine
//! - `tenancy`: managed and source namespace tracking

pub mod apply;
pub mod backoff;
pub mod events;
pub mod hooks;
pub mod labels;
pub mod reconciler;
pub mod resources;
pub mod sso;
pub mod tenancy;
