//! # Watch Loop
//!
//! Runs the kube-runtime controller for `ArgoCD` instances. Owned namespaced
//! kinds are followed through owner references; everything else reaches the
//! controller through the event router streams.

use crate::config::SharedControllerConfig;
use crate::constants::OPERATOR_NAME;
use crate::controller::events::{self, mappers, predicates};
use crate::controller::labels::{LABEL_MANAGED_BY, SECRET_TYPE, SECRET_TYPE_CLUSTER};
use crate::controller::reconciler::{reconcile, Reconciler, ReconcilerError};
use crate::crd::ArgoCD;
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use crate::server::ServerState;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret, Service, ServiceAccount};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use kube::api::Api;
use kube::Client;
use kube_runtime::reflector::Store;
use kube_runtime::{controller, controller::Action, watcher, Controller};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn, Instrument};

/// Controller for instances across all namespaces, with every secondary watch attached
fn build_controller(client: &Client, concurrency: u16) -> Controller<ArgoCD> {
    let managed = format!("{LABEL_MANAGED_BY}={OPERATOR_NAME}");
    let owned = || watcher::Config::default().labels(&managed);

    let controller = Controller::new(
        Api::<ArgoCD>::all(client.clone()),
        watcher::Config::default().any_semantic(),
    )
    .with_config(controller::Config::default().concurrency(concurrency));
    let store: Store<ArgoCD> = controller.store();

    controller
        .owns(Api::<ConfigMap>::all(client.clone()), owned())
        .owns(Api::<Secret>::all(client.clone()), owned())
        .owns(Api::<Service>::all(client.clone()), owned())
        .owns(Api::<Ingress>::all(client.clone()), owned())
        .owns(Api::<Role>::all(client.clone()), owned())
        .owns(Api::<RoleBinding>::all(client.clone()), owned())
        .owns(Api::<ServiceAccount>::all(client.clone()), owned())
        .owns(Api::<StatefulSet>::all(client.clone()), owned())
        .reconcile_on(events::triggers(
            Api::<Deployment>::all(client.clone()),
            owned(),
            store.clone(),
            predicates::deployment_changed,
            |deploy, _, _| mappers::owner_instances(deploy),
        ))
        .reconcile_on(events::triggers(
            Api::<ClusterRole>::all(client.clone()),
            owned(),
            store.clone(),
            predicates::cluster_role_changed,
            |role, _, _| mappers::annotated_instance(role),
        ))
        .reconcile_on(events::triggers(
            Api::<ClusterRoleBinding>::all(client.clone()),
            owned(),
            store.clone(),
            predicates::cluster_role_binding_changed,
            |binding, _, _| mappers::annotated_instance(binding),
        ))
        .reconcile_on(events::triggers(
            Api::<Namespace>::all(client.clone()),
            watcher::Config::default(),
            store.clone(),
            predicates::namespace_claims_changed,
            |ns, old, index: &Store<ArgoCD>| mappers::namespace_instances(ns, old, index),
        ))
        .reconcile_on(events::triggers(
            Api::<Secret>::all(client.clone()),
            watcher::Config::default().labels(&format!("{SECRET_TYPE}={SECRET_TYPE_CLUSTER}")),
            store.clone(),
            predicates::cluster_secret_changed,
            |secret, _, index: &Store<ArgoCD>| mappers::cluster_secret_instances(secret, index),
        ))
        .reconcile_on(events::triggers(
            Api::<ConfigMap>::all(client.clone()),
            watcher::Config::default(),
            store.clone(),
            predicates::config_map_data_changed,
            |map, _, index: &Store<ArgoCD>| mappers::scm_tls_configmap_instances(map, index),
        ))
        .reconcile_on(events::triggers(
            Api::<Secret>::all(client.clone()),
            watcher::Config::default().fields("type=kubernetes.io/tls"),
            store,
            predicates::tls_secret_changed,
            |secret, _, _| mappers::tls_secret_instances(secret),
        ))
}

/// Run the controller until a shutdown signal, restarting the stream when it ends
pub async fn run_watch_loop(
    client: Client,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
    controller_config: SharedControllerConfig,
) -> Result<(), anyhow::Error> {
    let config = controller_config.read().await;
    let backoff_start_ms = config.backoff_start_ms;
    let concurrency = config.max_concurrent_reconciliations;
    drop(config);

    let backoff_duration_ms = Arc::new(AtomicU64::new(backoff_start_ms));

    let shutdown_server_state = server_state.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            warn!("Failed to listen for shutdown signal");
            return;
        }
        info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");
        shutdown_server_state.set_ready(false);
        info!("Marked server as not ready, waiting for in-flight reconciliations to complete...");
    });

    loop {
        if !server_state.ready() {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let backoff = backoff_duration_ms.clone();
        let config_for_filter = controller_config.clone();
        let watch_span = tracing::span!(
            tracing::Level::INFO,
            "controller.watch",
            operation = "watch_loop"
        );

        info!("Starting controller watch loop (max {} concurrent reconciliations)...", concurrency);
        build_controller(&client, concurrency)
            .shutdown_on_signal()
            .run(
                create_reconcile_fn,
                |obj, error, ctx| handle_reconciliation_error(obj, error, ctx),
                reconciler.clone(),
            )
            .filter_map(move |x| {
                let backoff = backoff.clone();
                let config = config_for_filter.clone();
                async move {
                    match &x {
                        Ok(_) => {
                            let backoff_start = config.read().await.backoff_start_ms;
                            backoff.store(backoff_start, Ordering::Relaxed);
                            debug!("watch.event.success");
                            Some(x)
                        }
                        Err(e) => {
                            let error_string = format!("{e:?}");
                            let config = config.read().await;
                            let max_backoff = config.backoff_max_ms;
                            let restart_delay = config.watch_restart_delay_duration();
                            drop(config);
                            handle_watch_stream_error(
                                &error_string,
                                &backoff,
                                max_backoff,
                                restart_delay,
                            )
                            .await
                            .map(|()| x)
                        }
                    }
                }
            })
            .for_each(|_| futures::future::ready(()))
            .instrument(watch_span)
            .await;

        if !server_state.ready() {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let delay = controller_config
            .read()
            .await
            .watch_restart_delay_after_end_duration();
        warn!(
            "Controller watch stream ended, restarting in {} seconds...",
            delay.as_secs()
        );
        tokio::time::sleep(delay).await;
    }

    info!("Controller stopped gracefully");
    Ok(())
}

/// Wrap one reconciliation in its span and log the result
async fn create_reconcile_fn(
    obj: Arc<ArgoCD>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let name = obj.metadata.name.clone().unwrap_or_else(|| "unknown".into());
    let namespace = obj.metadata.namespace.clone().unwrap_or_else(|| "default".into());
    let resource_version = obj
        .metadata
        .resource_version
        .clone()
        .unwrap_or_else(|| "unknown".into());
    let generation = obj.metadata.generation.unwrap_or(0);
    let observed_generation = obj
        .status
        .as_ref()
        .and_then(|s| s.observed_generation)
        .unwrap_or(0);

    let reconcile_span = tracing::span!(
        tracing::Level::INFO,
        "controller.watch.reconcile",
        resource.name = name.as_str(),
        resource.namespace = namespace.as_str(),
        resource.version = resource_version.as_str(),
        resource.generation = generation,
        resource.observed_generation = observed_generation,
    );

    async move {
        debug!(
            generation = generation,
            observed_generation = observed_generation,
            "watch.event.received"
        );
        let result = reconcile(obj, ctx).await;
        match &result {
            Ok(action) => debug!(action = ?action, "watch.event.reconciled"),
            Err(e) => error!(error = %e, "watch.event.reconciliation_failed"),
        }
        result
    }
    .instrument(reconcile_span)
    .await
}
