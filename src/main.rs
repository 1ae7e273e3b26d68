//! # Argo CD Operator
//!
//! Reconciles `ArgoCD` custom resources into running Argo CD installations.

use anyhow::Result;
use argocd_operator::runtime::{initialization, watch_loop};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialization::initialize().await?;

    watch_loop::run_watch_loop(
        init.client,
        init.reconciler,
        init.server_state,
        init.controller_config,
    )
    .await?;

    info!("Argo CD Operator exited");
    Ok(())
}
