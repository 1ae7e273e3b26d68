//! # Network Exposure
//!
//! Services for every core component, plus the server ingress and (on
//! OpenShift) route. Ingress and route follow their spec toggles and are
//! deleted when turned off.

use super::{
    component_name, instance_namespace, present, present_json, BuildContext, ManagedKind, INGRESS,
    SERVICE, SPEC_SUBSET,
};
use crate::cluster::{Kind, ObjectKey};
use crate::controller::apply::Intent;
use crate::controller::labels::{object_meta, selector_labels, InstanceRef};
use crate::crd::ArgoCD;
use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde_json::{json, Value};
use std::collections::BTreeMap;

#[must_use]
pub fn port(name: &str, port: i32, target: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port,
        target_port: Some(IntOrString::Int(target)),
        protocol: Some("TCP".to_string()),
        ..ServicePort::default()
    }
}

/// ClusterIP service selecting the pods of workload `target`
#[must_use]
pub fn service(
    instance: &InstanceRef,
    name: &str,
    component: &str,
    target: &str,
    ports: Vec<ServicePort>,
) -> Service {
    Service {
        metadata: object_meta(instance, name, Some(&instance.namespace), component),
        spec: Some(ServiceSpec {
            selector: Some(selector_labels(target)),
            ports: Some(ports),
            ..ServiceSpec::default()
        }),
        ..Service::default()
    }
}

/// Ingress routing `/` on `host` to `service:port_name`
#[allow(clippy::too_many_arguments, reason = "mirrors the ingress fields")]
#[must_use]
pub fn ingress(
    instance: &InstanceRef,
    name: &str,
    component: &str,
    host: &str,
    service: &str,
    port_name: &str,
    class: Option<String>,
    annotations: BTreeMap<String, String>,
    tls: Vec<IngressTLS>,
) -> Ingress {
    let mut metadata = object_meta(instance, name, Some(&instance.namespace), component);
    metadata.annotations = (!annotations.is_empty()).then_some(annotations);
    Ingress {
        metadata,
        spec: Some(IngressSpec {
            ingress_class_name: class,
            rules: Some(vec![IngressRule {
                host: Some(host.to_string()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some("/".to_string()),
                        path_type: "ImplementationSpecific".to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: service.to_string(),
                                port: Some(ServiceBackendPort {
                                    name: Some(port_name.to_string()),
                                    number: None,
                                }),
                            }),
                            resource: None,
                        },
                    }],
                }),
            }]),
            tls: (!tls.is_empty()).then_some(tls),
            ..IngressSpec::default()
        }),
        ..Ingress::default()
    }
}

/// OpenShift route; there are no typed bindings for `route.openshift.io`
pub fn route(
    instance: &InstanceRef,
    name: &str,
    component: &str,
    host: Option<&str>,
    service: &str,
    target_port: &str,
    termination: &str,
) -> Result<Value> {
    let metadata = serde_json::to_value(object_meta(
        instance,
        name,
        Some(&instance.namespace),
        component,
    ))
    .context("Failed to encode route metadata")?;
    let mut spec = json!({
        "to": {"kind": "Service", "name": service, "weight": 100},
        "port": {"targetPort": target_port},
        "tls": {"termination": termination, "insecureEdgeTerminationPolicy": "Redirect"},
        "wildcardPolicy": "None",
    });
    if let Some(host) = host {
        spec["host"] = Value::from(host);
    }
    Ok(json!({
        "apiVersion": "route.openshift.io/v1",
        "kind": "Route",
        "metadata": metadata,
        "spec": spec,
    }))
}

/// Services, server ingress and route
#[derive(Debug, Default)]
pub struct Network;

impl Network {
    fn services(cr: &ArgoCD, instance: &InstanceRef) -> Vec<Service> {
        let server = component_name(cr, "server");
        let repo = component_name(cr, "repo-server");
        let redis = component_name(cr, "redis");
        let controller = component_name(cr, "application-controller");
        vec![
            service(
                instance,
                &server,
                "server",
                &server,
                vec![port("http", 80, 8080), port("https", 443, 8080)],
            ),
            service(
                instance,
                &component_name(cr, "server-metrics"),
                "server",
                &server,
                vec![port("metrics", 8083, 8083)],
            ),
            service(
                instance,
                &repo,
                "repo-server",
                &repo,
                vec![port("server", 8081, 8081), port("metrics", 8084, 8084)],
            ),
            service(
                instance,
                &redis,
                "redis",
                &redis,
                vec![port("tcp-redis", 6379, 6379)],
            ),
            service(
                instance,
                &component_name(cr, "metrics"),
                "metrics",
                &controller,
                vec![port("metrics", 8082, 8082)],
            ),
        ]
    }

    fn server_ingress(cr: &ArgoCD, instance: &InstanceRef) -> Ingress {
        let spec = &cr.spec.server.ingress;
        let mut annotations = BTreeMap::from([
            (
                "nginx.ingress.kubernetes.io/force-ssl-redirect".to_string(),
                "true".to_string(),
            ),
            (
                "nginx.ingress.kubernetes.io/ssl-passthrough".to_string(),
                "true".to_string(),
            ),
        ]);
        annotations.extend(spec.annotations.clone());
        let host = super::config::server_host(cr);
        let tls = if spec.tls.is_empty() {
            vec![IngressTLS {
                hosts: Some(vec![host.clone()]),
                secret_name: Some(component_name(cr, "tls")),
            }]
        } else {
            spec.tls
                .iter()
                .map(|t| IngressTLS {
                    hosts: (!t.hosts.is_empty()).then(|| t.hosts.clone()),
                    secret_name: t.secret_name.clone(),
                })
                .collect()
        };
        ingress(
            instance,
            &component_name(cr, "server"),
            "server",
            &host,
            &component_name(cr, "server"),
            if cr.spec.server.insecure { "http" } else { "https" },
            spec.ingress_class_name.clone(),
            annotations,
            tls,
        )
    }
}

impl ManagedKind for Network {
    fn component(&self) -> &'static str {
        "network"
    }

    fn intents(&self, cr: &ArgoCD, ctx: &BuildContext) -> Result<Vec<Intent>> {
        let instance = InstanceRef::of(cr);
        let mut intents = Self::services(cr, &instance)
            .iter()
            .map(|svc| present(Kind::Service, svc, SERVICE))
            .collect::<Result<Vec<_>>>()?;

        let name = component_name(cr, "server");
        let ns = instance_namespace(cr);
        if cr.spec.server.ingress.enabled {
            intents.push(present(
                Kind::Ingress,
                &Self::server_ingress(cr, &instance),
                INGRESS,
            )?);
        } else {
            intents.push(Intent::Absent(ObjectKey::namespaced(Kind::Ingress, &ns, &name)));
        }

        if ctx.features.routes {
            if cr.spec.server.route.enabled {
                let termination = if cr.spec.server.insecure { "edge" } else { "passthrough" };
                let route = route(
                    &instance,
                    &name,
                    "server",
                    cr.spec.server.host.as_deref(),
                    &name,
                    if cr.spec.server.insecure { "http" } else { "https" },
                    termination,
                )?;
                intents.push(present_json(Kind::Route, route, SPEC_SUBSET)?);
            } else {
                intents.push(Intent::Absent(ObjectKey::namespaced(Kind::Route, &ns, &name)));
            }
        }
        Ok(intents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::FeatureSnapshot;
    use crate::controller::resources::testing::instance;
    use crate::crd::{ArgoCDSpec, RouteSpec, ServerIngressSpec, ServerSpec};

    fn kinds(intents: &[Intent]) -> Vec<(Kind, bool)> {
        intents
            .iter()
            .filter(|i| !matches!(i.key().kind, Kind::Service))
            .map(|i| (i.key().kind, matches!(i, Intent::Present(_))))
            .collect()
    }

    #[test]
    fn test_services_select_their_workloads() {
        let cr = instance(ArgoCDSpec::default());
        let services = Network::services(&cr, &InstanceRef::of(&cr));
        let names: Vec<_> = services
            .iter()
            .map(|s| s.metadata.name.clone().unwrap())
            .collect();
        assert_eq!(
            names,
            vec![
                "example-server",
                "example-server-metrics",
                "example-repo-server",
                "example-redis",
                "example-metrics"
            ]
        );
        let metrics = services.last().unwrap();
        assert_eq!(
            metrics.spec.as_ref().unwrap().selector.as_ref().unwrap()["app.kubernetes.io/name"],
            "example-application-controller"
        );
    }

    #[test]
    fn test_ingress_follows_toggle() {
        let cr = instance(ArgoCDSpec::default());
        let intents = Network.intents(&cr, &BuildContext::default()).unwrap();
        assert_eq!(kinds(&intents), vec![(Kind::Ingress, false)]);

        let cr = instance(ArgoCDSpec {
            server: ServerSpec {
                host: Some("argocd.example.com".into()),
                ingress: ServerIngressSpec {
                    enabled: true,
                    annotations: BTreeMap::from([("team".to_string(), "platform".to_string())]),
                    ..Default::default()
                },
                ..Default::default()
            },
            ..ArgoCDSpec::default()
        });
        let intents = Network.intents(&cr, &BuildContext::default()).unwrap();
        let ingress = intents
            .iter()
            .find_map(|i| match i {
                Intent::Present(d) if d.key.kind == Kind::Ingress => Some(d),
                _ => None,
            })
            .unwrap();
        let ing: Ingress = crate::cluster::from_dynamic(&ingress.object).unwrap();
        let rule = &ing.spec.unwrap().rules.unwrap()[0];
        assert_eq!(rule.host.as_deref(), Some("argocd.example.com"));
        assert_eq!(ing.metadata.annotations.unwrap()["team"], "platform");
    }

    #[test]
    fn test_route_only_with_route_api() {
        let cr = instance(ArgoCDSpec {
            server: ServerSpec {
                route: RouteSpec { enabled: true },
                ..Default::default()
            },
            ..ArgoCDSpec::default()
        });
        let without_api = Network.intents(&cr, &BuildContext::default()).unwrap();
        assert!(without_api.iter().all(|i| i.key().kind != Kind::Route));

        let ctx = BuildContext {
            features: FeatureSnapshot {
                routes: true,
                ..FeatureSnapshot::default()
            },
            ..BuildContext::default()
        };
        let with_api = Network.intents(&cr, &ctx).unwrap();
        assert!(with_api
            .iter()
            .any(|i| i.key().kind == Kind::Route && matches!(i, Intent::Present(_))));
    }
}
