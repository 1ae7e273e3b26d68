//! # Monitoring
//!
//! Prometheus operator objects scraping the instance. Only built when the
//! `monitoring.coreos.com` API group is served; there are no typed bindings,
//! so objects are written as JSON.

use super::{
    component_name, instance_namespace, present_json, BuildContext, ManagedKind, SPEC_SUBSET,
};
use crate::cluster::{Kind, ObjectKey};
use crate::constants::DEFAULT_PROMETHEUS_REPLICAS;
use crate::controller::apply::Intent;
use crate::controller::labels::{object_meta, selector_labels, InstanceRef};
use crate::crd::ArgoCD;
use anyhow::{Context, Result};
use serde_json::{json, Value};

const API_VERSION: &str = "monitoring.coreos.com/v1";
pub const COMPONENT_STATUS_RULE: &str = "argocd-component-status-alert";

fn metadata(instance: &InstanceRef, name: &str) -> Result<Value> {
    serde_json::to_value(object_meta(instance, name, Some(&instance.namespace), "monitoring"))
        .context("Failed to encode monitoring metadata")
}

fn service_monitor(instance: &InstanceRef, name: &str, service: &str) -> Result<Value> {
    Ok(json!({
        "apiVersion": API_VERSION,
        "kind": "ServiceMonitor",
        "metadata": metadata(instance, name)?,
        "spec": {
            "selector": {"matchLabels": selector_labels(service)},
            "endpoints": [{"port": "metrics"}],
        },
    }))
}

fn component_alert(cr: &ArgoCD, alert: &str, workload: &str, kind: &str) -> Value {
    let ns = instance_namespace(cr);
    let (metric, resource) = match kind {
        "StatefulSet" => ("kube_statefulset_status_replicas_ready", "statefulset"),
        _ => ("kube_deployment_status_replicas_ready", "deployment"),
    };
    let desired = metric.replace("_ready", "");
    json!({
        "alert": alert,
        "annotations": {
            "message": format!("{kind} {workload} in namespace {ns} has no ready replicas"),
        },
        "expr": format!(
            "{desired}{{{resource}=\"{workload}\",namespace=\"{ns}\"}} - {metric}{{{resource}=\"{workload}\",namespace=\"{ns}\"}} != 0"
        ),
        "for": "1m",
        "labels": {"severity": "warning"},
    })
}

/// Prometheus, service monitors and component alerts
#[derive(Debug, Default)]
pub struct Monitoring;

impl Monitoring {
    fn prometheus(cr: &ArgoCD, instance: &InstanceRef) -> Result<Value> {
        Ok(json!({
            "apiVersion": API_VERSION,
            "kind": "Prometheus",
            "metadata": metadata(instance, &instance.name)?,
            "spec": {
                "replicas": cr.spec.prometheus.replicas.unwrap_or(DEFAULT_PROMETHEUS_REPLICAS),
                "serviceAccountName": "prometheus-k8s",
                "serviceMonitorSelector": {},
                "ruleSelector": {},
            },
        }))
    }

    fn rule(cr: &ArgoCD, instance: &InstanceRef) -> Result<Value> {
        let rules = [
            ("ApplicationController", "application-controller", "StatefulSet"),
            ("ServerDeployment", "server", "Deployment"),
            ("RepoServerDeployment", "repo-server", "Deployment"),
            ("RedisDeployment", "redis", "Deployment"),
        ]
        .iter()
        .map(|(alert, suffix, kind)| {
            component_alert(
                cr,
                &format!("{alert}NotReady"),
                &component_name(cr, suffix),
                kind,
            )
        })
        .collect::<Vec<_>>();
        Ok(json!({
            "apiVersion": API_VERSION,
            "kind": "PrometheusRule",
            "metadata": metadata(instance, COMPONENT_STATUS_RULE)?,
            "spec": {
                "groups": [{"name": "ArgoCDComponentStatus", "rules": rules}],
            },
        }))
    }

    fn monitors(cr: &ArgoCD) -> [(String, String); 3] {
        [
            (component_name(cr, "metrics"), component_name(cr, "metrics")),
            (
                component_name(cr, "repo-server-metrics"),
                component_name(cr, "repo-server"),
            ),
            (
                component_name(cr, "server-metrics"),
                component_name(cr, "server-metrics"),
            ),
        ]
    }
}

impl ManagedKind for Monitoring {
    fn component(&self) -> &'static str {
        "monitoring"
    }

    fn intents(&self, cr: &ArgoCD, ctx: &BuildContext) -> Result<Vec<Intent>> {
        if !ctx.features.monitoring {
            return Ok(Vec::new());
        }
        let instance = InstanceRef::of(cr);
        let ns = instance.namespace.clone();
        if !cr.spec.prometheus.enabled {
            let mut keys = vec![
                ObjectKey::namespaced(Kind::Prometheus, &ns, &instance.name),
                ObjectKey::namespaced(Kind::PrometheusRule, &ns, COMPONENT_STATUS_RULE),
            ];
            keys.extend(
                Self::monitors(cr)
                    .into_iter()
                    .map(|(name, _)| ObjectKey::namespaced(Kind::ServiceMonitor, &ns, name)),
            );
            return Ok(keys.into_iter().map(Intent::Absent).collect());
        }

        let mut intents = vec![present_json(
            Kind::Prometheus,
            Self::prometheus(cr, &instance)?,
            SPEC_SUBSET,
        )?];
        for (name, service) in Self::monitors(cr) {
            intents.push(present_json(
                Kind::ServiceMonitor,
                service_monitor(&instance, &name, &service)?,
                SPEC_SUBSET,
            )?);
        }
        intents.push(present_json(
            Kind::PrometheusRule,
            Self::rule(cr, &instance)?,
            SPEC_SUBSET,
        )?);
        Ok(intents)
    }
}
