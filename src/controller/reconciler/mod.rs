//! # Reconciler
//!
//! Orchestrates one reconciliation cycle of an `ArgoCD` instance.
//!
//! ## Module Structure
//!
//! - `types` - shared context, backoff state and the error type
//! - `reconcile` - entry point: fetch, finalizer handling, dispatch
//! - `pipeline` - the ordered resource stages and their failure policies
//! - `status` - status projection and conditions
//! - `teardown` - cleanup of a deleted instance

pub mod pipeline;
mod reconcile;
pub mod status;
pub mod teardown;
mod types;

pub use reconcile::reconcile;
pub use types::{BackoffState, Reconciler, ReconcilerError};
