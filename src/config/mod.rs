//! # Configuration
//!
//! Process-level configuration loaded from environment variables.
//!
//! - `controller.rs` - watch loop, backoff and concurrency settings
//! - `server.rs` - metrics/probe server settings
//! - `operator.rs` - operator behaviour toggles and image overrides

mod controller;
mod operator;
mod server;

use std::sync::Arc;
use tokio::sync::RwLock;

pub use controller::ControllerConfig;
pub use operator::{ClusterConfigNamespaces, ImageOverrides, OperatorSettings};
pub use server::ServerConfig;

/// Controller configuration shared between the watch loop and its filters
pub type SharedControllerConfig = Arc<RwLock<ControllerConfig>>;

/// Server configuration shared with the startup probe
pub type SharedServerConfig = Arc<RwLock<ServerConfig>>;

/// Build shared configuration from the environment
#[must_use]
pub fn create_shared_config() -> (SharedControllerConfig, SharedServerConfig) {
    (
        Arc::new(RwLock::new(ControllerConfig::from_env())),
        Arc::new(RwLock::new(ServerConfig::from_env())),
    )
}

/// Read environment variable or return default value
pub(crate) fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Read an optional, non-empty environment variable
pub(crate) fn env_var_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn parse_bool(value: &str) -> bool {
    let v_lower = value.trim().to_lowercase();
    v_lower == "true" || v_lower == "1" || v_lower == "yes" || v_lower == "on"
}
