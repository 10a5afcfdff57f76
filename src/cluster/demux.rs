//! Event demultiplexer: raw cache events in, health updates out.
//!
//! Every watch event is turned into a per-object [`HealthUpdate`] and
//! published on the bus; updates are emitted only when the status actually
//! changed. Each event also arms a debounced recomputation of the owning
//! namespace, published as an `action=refresh` update.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace};

use super::addons::AddonSet;
use super::cache::{ClusterCache, RawEvent};
use super::evaluate::evaluate_snapshot;
use super::namespace::evaluate_namespace;
use super::snapshot::Snapshot;
use crate::bus::Bus;
use crate::health::{
    EntityKind, EnvironmentSet, HealthReport, HealthUpdate, UpdateAction,
};

pub struct Demux {
    cache: Arc<ClusterCache>,
    bus: Arc<Bus>,
    addons: Arc<AddonSet>,
    environments: Arc<EnvironmentSet>,
    /// Debounce window for namespace recomputation.
    notification_delay: Duration,
    /// Namespaces with a recompute already armed.
    pending: DashMap<String, ()>,
}

impl Demux {
    pub fn new(
        cache: Arc<ClusterCache>,
        bus: Arc<Bus>,
        addons: Arc<AddonSet>,
        environments: Arc<EnvironmentSet>,
        notification_delay: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            cache,
            bus,
            addons,
            environments,
            notification_delay,
            pending: DashMap::new(),
        })
    }

    /// Consume raw events until the channel closes or shutdown fires.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<RawEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Event demultiplexer started.");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                event = events.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                }
            }
        }
        info!("Event demultiplexer stopped.");
    }

    fn handle(self: &Arc<Self>, event: RawEvent) {
        let kind = event.snapshot.kind();
        if !self.cache.is_synced(kind) {
            trace!("Dropping {kind} event: cache not synced yet");
            return;
        }

        let report = evaluate_snapshot(&self.cache, &self.addons, &event.snapshot);
        let previous_report = event
            .previous
            .as_ref()
            .map(|prev| evaluate_snapshot(&self.cache, &self.addons, prev));

        // Updates are transition-only; adds and deletes always go out.
        let is_transition = match (&event.action, &previous_report) {
            (UpdateAction::Update, Some(previous)) => previous.status != report.status,
            _ => true,
        };

        if is_transition {
            let update = self.build_update(&event.snapshot, event.action, report, previous_report);
            debug!(
                "Publishing {} {}/{} ({:?})",
                update.kind, update.namespace, update.name, update.action
            );
            self.bus.broadcast(&update);
        }

        let namespace = event.snapshot.namespace();
        if !namespace.is_empty() {
            self.schedule_refresh(namespace);
        }
    }

    fn build_update(
        &self,
        snapshot: &Snapshot,
        action: UpdateAction,
        report: HealthReport,
        previous_report: Option<HealthReport>,
    ) -> HealthUpdate {
        let name = snapshot.name();
        let namespace = snapshot.namespace();
        // Cluster-scoped entities derive their tenant from their own name.
        let tenant = if namespace.is_empty() {
            self.environments.parse(&name)
        } else {
            self.environments.parse(&namespace)
        };

        HealthUpdate {
            api_version: Some(snapshot.api_version().to_string()),
            kind: snapshot.kind(),
            namespace,
            name,
            tenant,
            action,
            report,
            previous_report,
        }
    }

    /// Arm a debounced namespace recomputation. A namespace with a pending
    /// recompute is not re-armed; one emission covers the whole burst.
    fn schedule_refresh(self: &Arc<Self>, namespace: String) {
        if self.pending.insert(namespace.clone(), ()).is_some() {
            return;
        }

        let demux = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(demux.notification_delay).await;
            demux.pending.remove(&namespace);
            demux.publish_refresh(&namespace);
        });
    }

    fn publish_refresh(&self, namespace: &str) {
        let report = evaluate_namespace(&self.cache, &self.addons, namespace);
        let update = HealthUpdate {
            api_version: Some("v1".to_string()),
            kind: EntityKind::Namespace,
            namespace: String::new(),
            name: namespace.to_string(),
            tenant: self.environments.parse(namespace),
            action: UpdateAction::Refresh,
            report,
            previous_report: None,
        };
        self.bus.broadcast(&update);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Pod, PodCondition, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::HashMap;

    fn pod(namespace: &str, name: &str, ready: &str) -> Arc<Pod> {
        Arc::new(Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..ObjectMeta::default()
            },
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                conditions: Some(vec![PodCondition {
                    type_: "Ready".to_string(),
                    status: ready.to_string(),
                    ..PodCondition::default()
                }]),
                ..PodStatus::default()
            }),
            ..Pod::default()
        })
    }

    fn demux_with_session() -> (Arc<Demux>, tokio::sync::mpsc::Receiver<String>) {
        let cache = Arc::new(ClusterCache::new(false));
        cache.pods.mark_synced();
        let bus = Arc::new(Bus::new(Vec::new()));
        let (_, rx) = bus.register(HashMap::new());
        let demux = Demux::new(
            cache,
            bus,
            Arc::new(AddonSet::default()),
            Arc::new(EnvironmentSet::default()),
            Duration::from_millis(10),
        );
        (demux, rx)
    }

    #[tokio::test]
    async fn test_add_always_emits() {
        let (demux, mut rx) = demux_with_session();
        demux.handle(RawEvent {
            action: UpdateAction::Add,
            snapshot: Snapshot::Pod(pod("app-dev", "web-0", "True")),
            previous: None,
        });

        let msg = rx.try_recv().unwrap();
        assert!(msg.contains("\"action\":\"add\""));
        assert!(msg.contains("\"healthy\":\"True\""));
        assert!(msg.contains("\"tenant\":{\"name\":\"app\",\"environment\":\"dev\"}"));
    }

    #[tokio::test]
    async fn test_update_without_transition_is_silent() {
        let (demux, mut rx) = demux_with_session();
        demux.handle(RawEvent {
            action: UpdateAction::Update,
            snapshot: Snapshot::Pod(pod("app-dev", "web-0", "True")),
            previous: Some(Snapshot::Pod(pod("app-dev", "web-0", "True"))),
        });

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_update_with_transition_carries_both_reports() {
        let (demux, mut rx) = demux_with_session();
        demux.handle(RawEvent {
            action: UpdateAction::Update,
            snapshot: Snapshot::Pod(pod("app-dev", "web-0", "False")),
            previous: Some(Snapshot::Pod(pod("app-dev", "web-0", "True"))),
        });

        let msg = rx.try_recv().unwrap();
        assert!(msg.contains("\"healthy\":\"False\""));
        assert!(msg.contains("\"previousReport\""));
    }

    #[tokio::test]
    async fn test_unsynced_kind_is_rejected() {
        let cache = Arc::new(ClusterCache::new(false));
        let bus = Arc::new(Bus::new(Vec::new()));
        let (_, mut rx) = bus.register(HashMap::new());
        let demux = Demux::new(
            cache,
            bus,
            Arc::new(AddonSet::default()),
            Arc::new(EnvironmentSet::default()),
            Duration::from_millis(10),
        );

        demux.handle(RawEvent {
            action: UpdateAction::Add,
            snapshot: Snapshot::Pod(pod("app-dev", "web-0", "True")),
            previous: None,
        });

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_namespace_refresh_is_debounced() {
        let (demux, mut rx) = demux_with_session();
        demux.cache.namespaces.mark_synced();

        // A burst of events in the same namespace arms one recompute.
        for name in ["web-0", "web-1", "web-2"] {
            demux.handle(RawEvent {
                action: UpdateAction::Add,
                snapshot: Snapshot::Pod(pod("team-prod", name, "True")),
                previous: None,
            });
        }

        // Drain the three per-pod adds.
        for _ in 0..3 {
            rx.try_recv().unwrap();
        }
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(50)).await;

        let refresh = rx.try_recv().unwrap();
        assert!(refresh.contains("\"action\":\"refresh\""));
        assert!(refresh.contains("\"kind\":\"namespace\""));
        assert!(rx.try_recv().is_err(), "only one refresh for the burst");
    }
}
