//! # Event Router
//!
//! Turns watch events on secondary kinds into reconcile requests for ArgoCD
//! instances.
//!
//! Watch streams only carry the latest object, so a [`ChangeTracker`] keeps
//! the last seen copy of each object to recover the old/new pair an update
//! predicate needs. Creates and deletes always pass; updates pass when the
//! kind's predicate finds them interesting. A mapper then resolves the object
//! to the instances it affects.
//!
//! ## Module Structure
//!
//! - `predicates.rs` - per-kind update filters
//! - `mappers.rs` - reverse lookups from an object to instances

pub mod mappers;
pub mod predicates;

use crate::controller::labels::InstanceRef;
use crate::crd::ArgoCD;
use futures::{stream, Stream, StreamExt};
use kube::api::Api;
use kube::Resource;
use kube_runtime::reflector::{ObjectRef, Store};
use kube_runtime::watcher;
use serde::de::DeserializeOwned;
use std::collections::{BTreeSet, HashMap};
use std::fmt::Debug;
use tracing::{debug, warn};

/// A change observed on a watched object
#[derive(Debug, Clone, PartialEq)]
pub enum Change<K> {
    Created(K),
    Updated { old: K, new: K },
    Deleted(K),
}

type Key = (Option<String>, String);

fn key_of<K: Resource>(obj: &K) -> Key {
    (
        obj.meta().namespace.clone(),
        obj.meta().name.clone().unwrap_or_default(),
    )
}

/// Last seen copy of every watched object
#[derive(Debug)]
pub struct ChangeTracker<K> {
    seen: HashMap<Key, K>,
    /// Keys seen during an in-progress relist
    relist: Option<HashMap<Key, ()>>,
}

impl<K> Default for ChangeTracker<K> {
    fn default() -> Self {
        Self {
            seen: HashMap::new(),
            relist: None,
        }
    }
}

impl<K: Resource + Clone> ChangeTracker<K> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn upsert(&mut self, obj: K) -> Change<K> {
        match self.seen.insert(key_of(&obj), obj.clone()) {
            Some(old) => Change::Updated { old, new: obj },
            None => Change::Created(obj),
        }
    }

    /// Fold one watcher event into the cache and report what changed
    ///
    /// A relist (`Init` .. `InitDone`) reports objects that disappeared while
    /// the watch was down as deleted.
    pub fn observe(&mut self, event: watcher::Event<K>) -> Vec<Change<K>> {
        match event {
            watcher::Event::Apply(obj) => vec![self.upsert(obj)],
            watcher::Event::Delete(obj) => {
                self.seen.remove(&key_of(&obj));
                vec![Change::Deleted(obj)]
            }
            watcher::Event::Init => {
                self.relist = Some(HashMap::new());
                Vec::new()
            }
            watcher::Event::InitApply(obj) => {
                if let Some(relist) = self.relist.as_mut() {
                    relist.insert(key_of(&obj), ());
                }
                vec![self.upsert(obj)]
            }
            watcher::Event::InitDone => {
                let Some(relist) = self.relist.take() else {
                    return Vec::new();
                };
                let gone: Vec<Key> = self
                    .seen
                    .keys()
                    .filter(|k| !relist.contains_key(*k))
                    .cloned()
                    .collect();
                gone.into_iter()
                    .filter_map(|k| self.seen.remove(&k))
                    .map(Change::Deleted)
                    .collect()
            }
        }
    }
}

/// Lookup of known instances by namespace
pub trait InstanceIndex {
    fn instances_in(&self, namespace: &str) -> Vec<InstanceRef>;
}

impl InstanceIndex for Store<ArgoCD> {
    fn instances_in(&self, namespace: &str) -> Vec<InstanceRef> {
        self.state()
            .iter()
            .filter(|cr| cr.metadata.namespace.as_deref() == Some(namespace))
            .map(|cr| InstanceRef::of(cr))
            .collect()
    }
}

impl InstanceIndex for Vec<InstanceRef> {
    fn instances_in(&self, namespace: &str) -> Vec<InstanceRef> {
        self.iter()
            .filter(|i| i.namespace == namespace)
            .cloned()
            .collect()
    }
}

/// Instances to re-reconcile for one change
///
/// `mapper` receives the current object and, for updates, the previous one.
pub fn route<K, P, M>(change: &Change<K>, predicate: P, mapper: M) -> BTreeSet<InstanceRef>
where
    P: Fn(&K, &K) -> bool,
    M: Fn(&K, Option<&K>) -> Vec<InstanceRef>,
{
    let instances = match change {
        Change::Created(obj) | Change::Deleted(obj) => mapper(obj, None),
        Change::Updated { old, new } if predicate(old, new) => mapper(new, Some(old)),
        Change::Updated { .. } => Vec::new(),
    };
    instances.into_iter().collect()
}

/// Reconcile triggers for a secondary kind, suitable for `Controller::reconcile_on`
pub fn triggers<K, I, P, M>(
    api: Api<K>,
    config: watcher::Config,
    index: I,
    predicate: P,
    mapper: M,
) -> impl Stream<Item = ObjectRef<ArgoCD>> + Send + 'static
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    I: InstanceIndex + Send + 'static,
    P: Fn(&K, &K) -> bool + Send + 'static,
    M: Fn(&K, Option<&K>, &I) -> Vec<InstanceRef> + Send + 'static,
{
    let kind = std::any::type_name::<K>();
    watcher::watcher(api, config)
        .scan(ChangeTracker::<K>::new(), move |tracker, event| {
            let changes = match event {
                Ok(event) => tracker.observe(event),
                Err(e) => {
                    warn!("Watch error on {}: {}", kind, e);
                    Vec::new()
                }
            };
            futures::future::ready(Some(changes))
        })
        .flat_map(move |changes| {
            let mut targets = BTreeSet::new();
            for change in &changes {
                targets.extend(route(change, &predicate, |obj, old| mapper(obj, old, &index)));
            }
            if !targets.is_empty() {
                debug!("{} change triggers {} instance(s)", kind, targets.len());
            }
            stream::iter(targets.into_iter().map(|i| i.object_ref()).collect::<Vec<_>>())
        })
}
