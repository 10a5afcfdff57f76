//! In-memory mirror of remote objects, maintained via list+watch.
//!
//! One store per kind, each fed by its own background watch task. Readers go
//! through the store listers and never touch the remote API. A resync (the
//! watch stream re-listing after a disconnect) replaces a store's contents in
//! one step, so listers always observe a consistent snapshot.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Namespace, Node, Pod, Service};
use kube::{Api, Client, Resource};
use kube_runtime::{watcher, WatchStreamExt};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::backup::{Backup, Schedule};
use super::snapshot::Snapshot;
use crate::health::{EntityKind, UpdateAction};

/// How long the startup sync may take before the process gives up.
pub const SYNC_TIMEOUT: Duration = Duration::from_secs(300);

const SYNC_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("informer cache failed to sync within {0:?}")]
    SyncTimeout(Duration),
}

/// A raw change observed by a watch task, before health evaluation.
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub action: UpdateAction,
    pub snapshot: Snapshot,
    /// The snapshot the object replaced; present for updates.
    pub previous: Option<Snapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ObjectKey {
    namespace: String,
    name: String,
}

fn key_of<K: Resource>(obj: &K) -> ObjectKey {
    ObjectKey {
        namespace: obj.meta().namespace.clone().unwrap_or_default(),
        name: obj.meta().name.clone().unwrap_or_default(),
    }
}

/// The mirror for a single kind.
pub struct KindStore<K> {
    kind: EntityKind,
    objects: RwLock<HashMap<ObjectKey, Arc<K>>>,
    synced: AtomicBool,
}

impl<K: Resource> KindStore<K> {
    fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            objects: RwLock::new(HashMap::new()),
            synced: AtomicBool::new(false),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ObjectKey, Arc<K>>> {
        self.objects.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ObjectKey, Arc<K>>> {
        self.objects.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// True once the initial list for this kind has been applied.
    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    pub fn mark_synced(&self) {
        self.synced.store(true, Ordering::Release);
    }

    /// Insert or replace one object, returning the previous snapshot.
    pub fn apply(&self, obj: Arc<K>) -> Option<Arc<K>> {
        self.write().insert(key_of(obj.as_ref()), obj)
    }

    /// Remove one object, returning the forgotten snapshot.
    pub fn forget(&self, namespace: &str, name: &str) -> Option<Arc<K>> {
        self.write().remove(&ObjectKey {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }

    /// Replace the whole store with a freshly listed snapshot, returning the
    /// differences against the previous contents.
    fn replace(
        &self,
        next: HashMap<ObjectKey, Arc<K>>,
    ) -> Vec<(UpdateAction, Arc<K>, Option<Arc<K>>)> {
        let mut guard = self.write();
        let previous = std::mem::replace(&mut *guard, next);
        let current = &*guard;

        let mut diff = Vec::new();
        for (key, obj) in current {
            match previous.get(key) {
                None => diff.push((UpdateAction::Add, obj.clone(), None)),
                Some(old) if old.meta().resource_version != obj.meta().resource_version => {
                    diff.push((UpdateAction::Update, obj.clone(), Some(old.clone())));
                }
                Some(_) => {}
            }
        }
        for (key, old) in &previous {
            if !current.contains_key(key) {
                diff.push((UpdateAction::Delete, old.clone(), None));
            }
        }
        diff
    }

    pub fn get(&self, namespace: &str, name: &str) -> Option<Arc<K>> {
        self.read()
            .get(&ObjectKey {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
            .cloned()
    }

    pub fn list_all(&self) -> Vec<Arc<K>> {
        let mut items: Vec<Arc<K>> = self.read().values().cloned().collect();
        items.sort_by(|a, b| a.meta().name.cmp(&b.meta().name));
        items
    }

    pub fn list_namespace(&self, namespace: &str) -> Vec<Arc<K>> {
        let mut items: Vec<Arc<K>> = self
            .read()
            .iter()
            .filter(|(key, _)| key.namespace == namespace)
            .map(|(_, obj)| obj.clone())
            .collect();
        items.sort_by(|a, b| a.meta().name.cmp(&b.meta().name));
        items
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

/// Drive one kind's watch stream into its store, forwarding changes.
async fn run_watch<K>(
    api: Api<K>,
    store: Arc<KindStore<K>>,
    wrap: fn(Arc<K>) -> Snapshot,
    events: mpsc::Sender<RawEvent>,
    mut shutdown: watch::Receiver<bool>,
) where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default + Clone + Eq + std::hash::Hash,
{
    let kind = store.kind;
    debug!("Starting watch for {kind}");

    let mut stream = watcher(api, watcher::Config::default())
        .default_backoff()
        .boxed();
    let mut pending: Option<HashMap<ObjectKey, Arc<K>>> = None;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    debug!("Stopping watch for {kind}");
                    return;
                }
            }
            item = stream.next() => match item {
                Some(Ok(event)) => match event {
                    watcher::Event::Init => {
                        pending = Some(HashMap::new());
                    }
                    watcher::Event::InitApply(obj) => {
                        if let Some(buffer) = pending.as_mut() {
                            buffer.insert(key_of(&obj), Arc::new(obj));
                        }
                    }
                    watcher::Event::InitDone => {
                        let listed = pending.take().unwrap_or_default();
                        let was_synced = store.is_synced();
                        let count = listed.len();
                        let diff = store.replace(listed);
                        store.mark_synced();

                        if was_synced {
                            // A resync after a disconnect: surface whatever
                            // changed while we were away.
                            for (action, obj, previous) in diff {
                                forward(&events, RawEvent {
                                    action,
                                    snapshot: wrap(obj),
                                    previous: previous.map(wrap),
                                }).await;
                            }
                        } else {
                            info!("Cache for {kind} synced with {count} objects.");
                        }
                    }
                    watcher::Event::Apply(obj) => {
                        let obj = Arc::new(obj);
                        let previous = store.apply(obj.clone());
                        let action = if previous.is_some() {
                            UpdateAction::Update
                        } else {
                            UpdateAction::Add
                        };
                        forward(&events, RawEvent {
                            action,
                            snapshot: wrap(obj),
                            previous: previous.map(wrap),
                        }).await;
                    }
                    watcher::Event::Delete(obj) => {
                        let obj = Arc::new(obj);
                        let key = key_of(obj.as_ref());
                        store.forget(&key.namespace, &key.name);
                        forward(&events, RawEvent {
                            action: UpdateAction::Delete,
                            snapshot: wrap(obj),
                            previous: None,
                        }).await;
                    }
                },
                Some(Err(err)) => {
                    // The watcher re-lists on its own; just surface the error.
                    warn!("Watch stream for {kind} errored: {err}");
                }
                None => {
                    warn!("Watch stream for {kind} ended");
                    return;
                }
            }
        }
    }
}

async fn forward(events: &mpsc::Sender<RawEvent>, event: RawEvent) {
    if events.send(event).await.is_err() {
        debug!("Event channel closed; dropping raw event");
    }
}

/// The full set of per-kind mirrors.
pub struct ClusterCache {
    pub nodes: Arc<KindStore<Node>>,
    pub namespaces: Arc<KindStore<Namespace>>,
    pub daemon_sets: Arc<KindStore<DaemonSet>>,
    pub deployments: Arc<KindStore<Deployment>>,
    pub stateful_sets: Arc<KindStore<StatefulSet>>,
    pub pods: Arc<KindStore<Pod>>,
    pub services: Arc<KindStore<Service>>,
    /// Present only when the backup extension was detected.
    pub backup_runs: Option<Arc<KindStore<Backup>>>,
    pub backup_schedules: Option<Arc<KindStore<Schedule>>>,
}

impl ClusterCache {
    pub fn new(backup_enabled: bool) -> Self {
        Self {
            nodes: Arc::new(KindStore::new(EntityKind::Node)),
            namespaces: Arc::new(KindStore::new(EntityKind::Namespace)),
            daemon_sets: Arc::new(KindStore::new(EntityKind::DaemonSet)),
            deployments: Arc::new(KindStore::new(EntityKind::Deployment)),
            stateful_sets: Arc::new(KindStore::new(EntityKind::StatefulSet)),
            pods: Arc::new(KindStore::new(EntityKind::Pod)),
            services: Arc::new(KindStore::new(EntityKind::Service)),
            backup_runs: backup_enabled
                .then(|| Arc::new(KindStore::new(EntityKind::BackupRun))),
            backup_schedules: backup_enabled
                .then(|| Arc::new(KindStore::new(EntityKind::BackupSchedule))),
        }
    }

    /// Spawn one watch task per kind.
    pub fn start(
        &self,
        client: Client,
        events: mpsc::Sender<RawEvent>,
        shutdown: watch::Receiver<bool>,
    ) {
        tokio::spawn(run_watch(
            Api::<Node>::all(client.clone()),
            self.nodes.clone(),
            Snapshot::Node,
            events.clone(),
            shutdown.clone(),
        ));
        tokio::spawn(run_watch(
            Api::<Namespace>::all(client.clone()),
            self.namespaces.clone(),
            Snapshot::Namespace,
            events.clone(),
            shutdown.clone(),
        ));
        tokio::spawn(run_watch(
            Api::<DaemonSet>::all(client.clone()),
            self.daemon_sets.clone(),
            Snapshot::DaemonSet,
            events.clone(),
            shutdown.clone(),
        ));
        tokio::spawn(run_watch(
            Api::<Deployment>::all(client.clone()),
            self.deployments.clone(),
            Snapshot::Deployment,
            events.clone(),
            shutdown.clone(),
        ));
        tokio::spawn(run_watch(
            Api::<StatefulSet>::all(client.clone()),
            self.stateful_sets.clone(),
            Snapshot::StatefulSet,
            events.clone(),
            shutdown.clone(),
        ));
        tokio::spawn(run_watch(
            Api::<Pod>::all(client.clone()),
            self.pods.clone(),
            Snapshot::Pod,
            events.clone(),
            shutdown.clone(),
        ));
        tokio::spawn(run_watch(
            Api::<Service>::all(client.clone()),
            self.services.clone(),
            Snapshot::Service,
            events.clone(),
            shutdown.clone(),
        ));

        if let Some(store) = &self.backup_runs {
            tokio::spawn(run_watch(
                Api::<Backup>::all(client.clone()),
                store.clone(),
                Snapshot::BackupRun,
                events.clone(),
                shutdown.clone(),
            ));
        }
        if let Some(store) = &self.backup_schedules {
            tokio::spawn(run_watch(
                Api::<Schedule>::all(client),
                store.clone(),
                Snapshot::BackupSchedule,
                events,
                shutdown,
            ));
        }
    }

    pub fn is_synced(&self, kind: EntityKind) -> bool {
        match kind {
            EntityKind::Node => self.nodes.is_synced(),
            EntityKind::Namespace => self.namespaces.is_synced(),
            EntityKind::DaemonSet => self.daemon_sets.is_synced(),
            EntityKind::Deployment => self.deployments.is_synced(),
            EntityKind::StatefulSet => self.stateful_sets.is_synced(),
            EntityKind::Pod => self.pods.is_synced(),
            EntityKind::Service => self.services.is_synced(),
            EntityKind::BackupRun => self.backup_runs.as_ref().is_some_and(|s| s.is_synced()),
            EntityKind::BackupSchedule => {
                self.backup_schedules.as_ref().is_some_and(|s| s.is_synced())
            }
            EntityKind::UrlProbe => true,
        }
    }

    fn all_synced(&self) -> bool {
        let core = self.nodes.is_synced()
            && self.namespaces.is_synced()
            && self.daemon_sets.is_synced()
            && self.deployments.is_synced()
            && self.stateful_sets.is_synced()
            && self.pods.is_synced()
            && self.services.is_synced();
        let backup = self.backup_runs.as_ref().map_or(true, |s| s.is_synced())
            && self.backup_schedules.as_ref().map_or(true, |s| s.is_synced());
        core && backup
    }

    /// Block until every kind has completed its initial list, or time out.
    pub async fn wait_for_sync(&self, timeout: Duration) -> Result<(), CacheError> {
        let deadline = tokio::time::Instant::now() + timeout;
        while !self.all_synced() {
            if tokio::time::Instant::now() >= deadline {
                return Err(CacheError::SyncTimeout(timeout));
            }
            tokio::time::sleep(SYNC_POLL_INTERVAL).await;
        }
        Ok(())
    }

    /// Pods in a namespace whose labels satisfy the given selector.
    pub fn pods_matching(
        &self,
        namespace: &str,
        selector: &std::collections::BTreeMap<String, String>,
    ) -> Vec<Arc<Pod>> {
        if selector.is_empty() {
            return Vec::new();
        }
        self.pods
            .list_namespace(namespace)
            .into_iter()
            .filter(|pod| {
                let labels = pod.metadata.labels.as_ref();
                selector.iter().all(|(key, value)| {
                    labels.and_then(|l| l.get(key)).is_some_and(|v| v == value)
                })
            })
            .collect()
    }

    /// Pods in a namespace with no owning controller.
    pub fn orphan_pods(&self, namespace: &str) -> Vec<Arc<Pod>> {
        self.pods
            .list_namespace(namespace)
            .into_iter()
            .filter(|pod| {
                pod.metadata
                    .owner_references
                    .as_ref()
                    .map_or(true, |owners| owners.is_empty())
            })
            .collect()
    }

    /// Backup runs covering a namespace (empty when the addon is absent).
    pub fn backups_covering(&self, namespace: &str) -> Vec<Arc<Backup>> {
        self.backup_runs
            .as_ref()
            .map(|store| {
                store
                    .list_all()
                    .into_iter()
                    .filter(|backup| backup.covers(namespace))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Backup schedules covering a namespace (empty when the addon is absent).
    pub fn schedules_covering(&self, namespace: &str) -> Vec<Arc<Schedule>> {
        self.backup_schedules
            .as_ref()
            .map(|store| {
                store
                    .list_all()
                    .into_iter()
                    .filter(|schedule| schedule.covers(namespace))
                    .collect()
            })
            .unwrap_or_default()
    }
}
