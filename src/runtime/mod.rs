//! # Runtime
//!
//! Process wiring around the reconciler.
//!
//! - `initialization.rs` - start-up of tracing, metrics, server and client
//! - `watch_loop.rs` - the controller and its secondary watches
//! - `error_policy.rs` - retry backoff and watch error classification

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;
