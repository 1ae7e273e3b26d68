//! # Types
//!
//! Core types for the reconciler.

use crate::cluster::{ClusterApi, ClusterFeatures};
use crate::config::OperatorSettings;
use crate::constants::{
    DEFAULT_RESYNC_INTERVAL_SECS, RECONCILE_BACKOFF_MAX_MINUTES, RECONCILE_BACKOFF_MIN_MINUTES,
};
use crate::controller::backoff::FibonacciBackoff;
use crate::controller::hooks::HookRegistry;
use crate::controller::sso::DeprecationTracker;
use crate::observability::events::{EventPublisher, NoopEventPublisher};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("Reconciliation failed: {0:#}")]
    ReconciliationFailed(#[from] anyhow::Error),
}

/// Backoff state for a specific resource
/// Tracks error count and backoff calculator for progressive retries
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl Default for BackoffState {
    fn default() -> Self {
        Self::new()
    }
}

impl BackoffState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::new(
                RECONCILE_BACKOFF_MIN_MINUTES,
                RECONCILE_BACKOFF_MAX_MINUTES,
            ),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Shared context handed to every reconciliation
#[derive(Clone)]
pub struct Reconciler {
    pub cluster: Arc<dyn ClusterApi>,
    pub hooks: Arc<HookRegistry>,
    pub settings: OperatorSettings,
    pub features: Arc<ClusterFeatures>,
    // Per-instance deprecation warnings, cleared on final deletion
    pub deprecations: Arc<DeprecationTracker>,
    pub events: Arc<dyn EventPublisher>,
    // Backoff state per instance (identified by namespace/name)
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
    /// Requeue interval after a successful cycle
    pub resync_interval: Duration,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("hooks", &self.hooks.len())
            .field("settings", &self.settings)
            .field("features", &self.features.snapshot())
            .field("resync_interval", &self.resync_interval)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        settings: OperatorSettings,
        features: Arc<ClusterFeatures>,
    ) -> Self {
        Self {
            cluster,
            hooks: Arc::new(HookRegistry::new()),
            settings,
            features,
            deprecations: Arc::new(DeprecationTracker::new()),
            events: Arc::new(NoopEventPublisher),
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
            resync_interval: Duration::from_secs(DEFAULT_RESYNC_INTERVAL_SECS),
        }
    }

    #[must_use]
    pub fn with_hooks(mut self, hooks: Arc<HookRegistry>) -> Self {
        self.hooks = hooks;
        self
    }

    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = events;
        self
    }

    #[must_use]
    pub fn with_resync_interval(mut self, interval: Duration) -> Self {
        self.resync_interval = interval;
        self
    }

    /// Reset the error backoff of an instance; returns whether it had failed before
    pub fn reset_backoff(&self, instance_key: &str) -> bool {
        let Ok(mut states) = self.backoff_states.lock() else {
            return false;
        };
        match states.get_mut(instance_key) {
            Some(state) => {
                let had_errors = state.error_count > 0;
                state.reset();
                had_errors
            }
            None => false,
        }
    }

    /// Drop all per-instance process state
    pub fn forget(&self, instance_key: &str) {
        self.deprecations.forget(instance_key);
        if let Ok(mut states) = self.backoff_states.lock() {
            states.remove(instance_key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_state_reset() {
        let mut state = BackoffState::new();
        assert_eq!(state.backoff.next_backoff_seconds(), 60);
        assert_eq!(state.backoff.next_backoff_seconds(), 60);
        assert_eq!(state.backoff.next_backoff_seconds(), 120);
        state.increment_error();
        state.increment_error();
        assert_eq!(state.error_count, 2);

        state.reset();
        assert_eq!(state.error_count, 0);
        assert_eq!(state.backoff.next_backoff_seconds(), 60);
    }
}
