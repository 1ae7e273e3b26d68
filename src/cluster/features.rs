//! # Cluster Features
//!
//! Cached presence flags for optional API groups. Refreshed periodically in
//! the background and read without coordination; a stale value only delays a
//! stage by one refresh interval.

use anyhow::{Context, Result};
use kube::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const ROUTE_GROUP: &str = "route.openshift.io";
const MONITORING_GROUP: &str = "monitoring.coreos.com";
const TEMPLATE_GROUP: &str = "template.openshift.io";

/// Point-in-time copy of the feature flags used for one reconciliation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeatureSnapshot {
    /// OpenShift routes
    pub routes: bool,
    /// Prometheus operator CRDs
    pub monitoring: bool,
    /// OpenShift templates
    pub templates: bool,
}

impl FeatureSnapshot {
    pub fn from_groups<'a>(groups: impl IntoIterator<Item = &'a str>) -> Self {
        let mut snapshot = Self::default();
        for group in groups {
            match group {
                ROUTE_GROUP => snapshot.routes = true,
                MONITORING_GROUP => snapshot.monitoring = true,
                TEMPLATE_GROUP => snapshot.templates = true,
                _ => {}
            }
        }
        snapshot
    }
}

#[derive(Debug, Default)]
pub struct ClusterFeatures {
    routes: AtomicBool,
    monitoring: AtomicBool,
    templates: AtomicBool,
}

impl ClusterFeatures {
    #[must_use]
    pub fn new(snapshot: FeatureSnapshot) -> Self {
        let features = Self::default();
        features.store(snapshot);
        features
    }

    #[must_use]
    pub fn snapshot(&self) -> FeatureSnapshot {
        FeatureSnapshot {
            routes: self.routes.load(Ordering::Relaxed),
            monitoring: self.monitoring.load(Ordering::Relaxed),
            templates: self.templates.load(Ordering::Relaxed),
        }
    }

    pub fn store(&self, snapshot: FeatureSnapshot) {
        self.routes.store(snapshot.routes, Ordering::Relaxed);
        self.monitoring.store(snapshot.monitoring, Ordering::Relaxed);
        self.templates.store(snapshot.templates, Ordering::Relaxed);
    }

    /// Query the API server for the optional groups
    pub async fn probe(client: &Client) -> Result<FeatureSnapshot> {
        let groups = client
            .list_api_groups()
            .await
            .context("Failed to list API groups")?;
        Ok(FeatureSnapshot::from_groups(
            groups.groups.iter().map(|g| g.name.as_str()),
        ))
    }

    /// Re-probe every `interval` until the process exits
    pub fn spawn_refresh(
        self: &Arc<Self>,
        client: Client,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let features = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // first tick completes immediately; startup already probed
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match Self::probe(&client).await {
                    Ok(snapshot) => {
                        let previous = features.snapshot();
                        if previous != snapshot {
                            info!(?previous, current = ?snapshot, "Optional API groups changed");
                        } else {
                            debug!("Optional API groups unchanged");
                        }
                        features.store(snapshot);
                    }
                    Err(e) => warn!("Feature probe failed, keeping cached flags: {:#}", e),
                }
            }
        })
    }
}
