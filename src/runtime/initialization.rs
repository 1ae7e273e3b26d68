//! # Initialization
//!
//! Process start-up: crypto provider, tracing, metrics, the probe server,
//! the Kubernetes client, cluster feature probing and the reconciler context.

use crate::cluster::{ClusterFeatures, FeatureSnapshot, KubeCluster};
use crate::config::{
    create_shared_config, OperatorSettings, SharedControllerConfig, SharedServerConfig,
};
use crate::constants::OPERATOR_NAME;
use crate::controller::reconciler::Reconciler;
use crate::crd::ArgoCD;
use crate::observability;
use crate::observability::events::KubeEventPublisher;
use crate::server::{start_server, ServerState};
use anyhow::{Context, Result};
use kube::api::{Api, ListParams};
use kube::Client;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Everything the watch loop needs
pub struct InitializationResult {
    pub client: Client,
    pub reconciler: Arc<Reconciler>,
    pub server_state: Arc<ServerState>,
    pub controller_config: SharedControllerConfig,
    pub server_config: SharedServerConfig,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("server_ready", &self.server_state.ready())
            .field("reconciler", &self.reconciler)
            .finish_non_exhaustive()
    }
}

fn init_tracing() {
    if let Err(e) = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "argocd_operator=info".into()),
        )
        .try_init()
    {
        eprintln!("Tracing subscriber already initialized: {e}");
    }
}

/// Initialize the operator runtime
pub async fn initialize() -> Result<InitializationResult> {
    // Must happen before any TLS connection is made
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("rustls crypto provider was already installed");
    }

    init_tracing();

    info!("Starting Argo CD Operator");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    observability::register_metrics().context("Failed to register metrics")?;

    let server_state = Arc::new(ServerState::default());
    let (controller_config, server_config) = create_shared_config();

    let server_port = server_config.read().await.metrics_port;
    let server_state_clone = server_state.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });
    wait_for_server_ready(&server_state, &server_handle, server_config.clone()).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let settings = OperatorSettings::from_env();
    info!(?settings, "Operator settings loaded");

    let snapshot = match ClusterFeatures::probe(&client).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!("Feature probe failed, assuming no optional API groups: {:#}", e);
            FeatureSnapshot::default()
        }
    };
    info!(
        routes = snapshot.routes,
        monitoring = snapshot.monitoring,
        templates = snapshot.templates,
        "Optional API groups detected"
    );
    let features = Arc::new(ClusterFeatures::new(snapshot));
    let config = controller_config.read().await;
    features.spawn_refresh(client.clone(), config.feature_refresh_interval());
    let resync_interval = config.resync_interval();
    drop(config);

    let reconciler = Arc::new(
        Reconciler::new(Arc::new(KubeCluster::new(client.clone())), settings, features)
            .with_events(Arc::new(KubeEventPublisher::new(client.clone(), OPERATOR_NAME)))
            .with_resync_interval(resync_interval),
    );

    check_crd_installed(&client).await;

    info!("Operator initialized, starting watch loop...");

    Ok(InitializationResult {
        client,
        reconciler,
        server_state,
        controller_config,
        server_config,
    })
}

/// Wait for the HTTP server to become ready
async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
    server_config: SharedServerConfig,
) -> Result<()> {
    let config = server_config.read().await;
    let startup_timeout = std::time::Duration::from_secs(config.startup_timeout_secs);
    let poll_interval = std::time::Duration::from_millis(config.poll_interval_ms);
    drop(config);
    let start_time = std::time::Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }
        if server_state.ready() {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }
        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// Log whether the ArgoCD CRD is queryable; the watch loop retries regardless
async fn check_crd_installed(client: &Client) {
    let argocds: Api<ArgoCD> = Api::all(client.clone());
    match argocds.list(&ListParams::default().limit(1)).await {
        Ok(list) => info!(
            "ArgoCD CRD is installed ({} instance(s) in first page)",
            list.items.len()
        ),
        Err(e) => {
            error!("ArgoCD CRD is not queryable; {:?}. Is the CRD installed?", e);
            error!("Installation: cargo run --bin crdgen | kubectl apply -f -");
            warn!("Continuing despite CRD check failure - the watch loop will retry");
        }
    }
}
