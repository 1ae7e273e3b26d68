//! # Event Router Tests
//!
//! Watch events on secondary kinds routed through the change tracker,
//! the per-kind predicates and the reverse mappers.

use argocd_operator::controller::events::{mappers, predicates, route, ChangeTracker};
use argocd_operator::controller::labels::{
    InstanceRef, MANAGED_BY_NAMESPACE, SOURCE_NAMESPACE_CLAIM,
};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus};
use k8s_openapi::api::core::v1::{Namespace, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::ByteString;
use kube_runtime::watcher::Event;
use std::collections::BTreeMap;

fn owned_deployment(generation: i64, available: i32) -> Deployment {
    Deployment {
        metadata: ObjectMeta {
            name: Some("example-server".into()),
            namespace: Some("argocd".into()),
            generation: Some(generation),
            owner_references: Some(vec![OwnerReference {
                api_version: "argoproj.io/v1beta1".into(),
                kind: "ArgoCD".into(),
                name: "example".into(),
                uid: "cr-uid".into(),
                controller: Some(true),
                ..OwnerReference::default()
            }]),
            ..ObjectMeta::default()
        },
        status: Some(DeploymentStatus {
            available_replicas: Some(available),
            ..DeploymentStatus::default()
        }),
        ..Deployment::default()
    }
}

fn namespace(labels: &[(&str, &str)]) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some("apps".into()),
            labels: Some(
                labels
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect(),
            ),
            ..ObjectMeta::default()
        },
        ..Namespace::default()
    }
}

fn deployment_targets(tracker: &mut ChangeTracker<Deployment>, event: Event<Deployment>) -> usize {
    tracker
        .observe(event)
        .iter()
        .map(|change| {
            route(change, predicates::deployment_changed, |d, _| {
                mappers::owner_instances(d)
            })
            .len()
        })
        .sum()
}

#[test]
fn test_deployment_events_reach_owner() {
    let mut tracker = ChangeTracker::new();

    // create always passes
    assert_eq!(deployment_targets(&mut tracker, Event::Apply(owned_deployment(1, 0))), 1);
    // status churn that keeps availability at zero is dropped
    assert_eq!(deployment_targets(&mut tracker, Event::Apply(owned_deployment(1, 0))), 0);
    // availability crossing zero passes
    assert_eq!(deployment_targets(&mut tracker, Event::Apply(owned_deployment(1, 2))), 1);
    assert_eq!(deployment_targets(&mut tracker, Event::Apply(owned_deployment(1, 3))), 0);
    // spec change passes
    assert_eq!(deployment_targets(&mut tracker, Event::Apply(owned_deployment(2, 3))), 1);
    // delete always passes
    assert_eq!(deployment_targets(&mut tracker, Event::Delete(owned_deployment(2, 3))), 1);
}

#[test]
fn test_namespace_relabel_triggers_old_and_new_owner() {
    let index = vec![
        InstanceRef::new("argocd", "example"),
        InstanceRef::new("team", "other"),
        InstanceRef::new("unrelated", "third"),
    ];
    let mut tracker = ChangeTracker::new();
    tracker.observe(Event::Apply(namespace(&[(SOURCE_NAMESPACE_CLAIM, "argocd")])));

    let changes = tracker.observe(Event::Apply(namespace(&[(SOURCE_NAMESPACE_CLAIM, "team")])));
    let targets = route(&changes[0], predicates::namespace_claims_changed, |ns, old| {
        mappers::namespace_instances(ns, old, &index)
    });
    assert_eq!(
        targets.into_iter().collect::<Vec<_>>(),
        vec![
            InstanceRef::new("argocd", "example"),
            InstanceRef::new("team", "other")
        ]
    );

    // unrelated label change is filtered
    let changes = tracker.observe(Event::Apply(namespace(&[
        (SOURCE_NAMESPACE_CLAIM, "team"),
        ("team", "payments"),
    ])));
    assert!(route(&changes[0], predicates::namespace_claims_changed, |ns, old| {
        mappers::namespace_instances(ns, old, &index)
    })
    .is_empty());
}

#[test]
fn test_managed_by_change_is_interesting() {
    let old = namespace(&[]);
    let new = namespace(&[(MANAGED_BY_NAMESPACE, "argocd")]);
    assert!(predicates::namespace_claims_changed(&old, &new));
    assert!(!predicates::namespace_claims_changed(&new, &new.clone()));
}

#[test]
fn test_tls_secret_predicate_only_watches_data() {
    let mut old = Secret::default();
    old.data = Some(BTreeMap::from([(
        "tls.crt".to_string(),
        ByteString(b"one".to_vec()),
    )]));
    let mut relabelled = old.clone();
    relabelled.metadata.labels = Some(BTreeMap::from([("a".to_string(), "b".to_string())]));
    assert!(!predicates::tls_secret_changed(&old, &relabelled));
    assert!(predicates::cluster_secret_changed(&old, &relabelled));

    let mut rotated = old.clone();
    rotated.data = Some(BTreeMap::from([(
        "tls.crt".to_string(),
        ByteString(b"two".to_vec()),
    )]));
    assert!(predicates::tls_secret_changed(&old, &rotated));
}
