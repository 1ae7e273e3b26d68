//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use super::env_var_or_default;
use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Watch stream backoff starting value (milliseconds)
    pub backoff_start_ms: u64,
    /// Watch stream backoff maximum value (milliseconds)
    pub backoff_max_ms: u64,
    /// Watch stream restart delay after unknown errors (seconds)
    pub watch_restart_delay_secs: u64,
    /// Watch stream restart delay after stream ends (seconds)
    pub watch_restart_delay_after_end_secs: u64,
    /// Maximum concurrent reconciliations across all instances
    pub max_concurrent_reconciliations: u16,
    /// Interval between optional API group probes (seconds)
    pub feature_refresh_interval_secs: u64,
    /// Requeue interval after a successful reconciliation (seconds)
    pub resync_interval_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            backoff_start_ms: DEFAULT_BACKOFF_START_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            watch_restart_delay_after_end_secs: DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS,
            max_concurrent_reconciliations: DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            feature_refresh_interval_secs: DEFAULT_FEATURE_REFRESH_INTERVAL_SECS,
            resync_interval_secs: DEFAULT_RESYNC_INTERVAL_SECS,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        use crate::constants::*;
        Self {
            backoff_start_ms: env_var_or_default("BACKOFF_START_MS", DEFAULT_BACKOFF_START_MS),
            backoff_max_ms: env_var_or_default("BACKOFF_MAX_MS", DEFAULT_BACKOFF_MAX_MS),
            watch_restart_delay_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_SECS",
                DEFAULT_WATCH_RESTART_DELAY_SECS,
            ),
            watch_restart_delay_after_end_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_AFTER_END_SECS",
                DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS,
            ),
            max_concurrent_reconciliations: env_var_or_default(
                "MAX_CONCURRENT_RECONCILIATIONS",
                DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            ),
            feature_refresh_interval_secs: env_var_or_default(
                "FEATURE_REFRESH_INTERVAL_SECS",
                DEFAULT_FEATURE_REFRESH_INTERVAL_SECS,
            ),
            resync_interval_secs: env_var_or_default(
                "RESYNC_INTERVAL_SECS",
                DEFAULT_RESYNC_INTERVAL_SECS,
            ),
        }
    }

    /// Get watch restart delay duration
    #[must_use]
    pub fn watch_restart_delay_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }

    /// Get watch restart delay after end duration
    #[must_use]
    pub fn watch_restart_delay_after_end_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_after_end_secs)
    }

    #[must_use]
    pub fn feature_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.feature_refresh_interval_secs)
    }

    #[must_use]
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }
}
