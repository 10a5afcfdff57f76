//! Subscription bus: session registry and broadcast fan-out.
//!
//! Every subscriber is a [`Session`] with an attribute bag and a bounded
//! outbound queue. Broadcasting never blocks a producer: messages are
//! enqueued with `try_send`, and a session whose queue is full is evicted so
//! one slow consumer cannot hold everyone else up.

use std::collections::HashMap;

use dashmap::DashMap;
use std::sync::{PoisonError, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::config::Filter;
use crate::health::HealthUpdate;

/// Outbound queue depth per session. A session that falls this far behind is
/// dropped.
pub const SESSION_QUEUE_DEPTH: usize = 64;

/// Attribute keys a session may filter on.
const ALLOWED_KEYS: &[&str] = &["kind", "namespace", "name"];

/// Matches any value in a session attribute.
const WILDCARD: &str = "all";

struct SessionHandle {
    attributes: HashMap<String, String>,
    tx: mpsc::Sender<String>,
}

/// The in-process registry and broadcast engine.
pub struct Bus {
    sessions: DashMap<Uuid, SessionHandle>,
    filters: RwLock<Vec<Filter>>,
}

impl Bus {
    pub fn new(filters: Vec<Filter>) -> Self {
        Self {
            sessions: DashMap::new(),
            filters: RwLock::new(filters),
        }
    }

    /// Install a new session. Attribute keys outside the allowed set are
    /// dropped; key lookup is case-insensitive.
    ///
    /// Returns the session id and the receiving end of its outbound queue.
    /// The caller owns draining the queue onto the transport; when the
    /// receiver is dropped the session is dead and will be removed on the
    /// next broadcast that touches it.
    pub fn register(&self, attributes: HashMap<String, String>) -> (Uuid, mpsc::Receiver<String>) {
        let attributes: HashMap<String, String> = attributes
            .into_iter()
            .map(|(key, value)| (key.to_ascii_lowercase(), value))
            .filter(|(key, _)| ALLOWED_KEYS.contains(&key.as_str()))
            .collect();

        let (tx, rx) = mpsc::channel(SESSION_QUEUE_DEPTH);
        let id = Uuid::new_v4();
        debug!("Session {id} registered with attributes {attributes:?}");
        self.sessions.insert(id, SessionHandle { attributes, tx });
        (id, rx)
    }

    pub fn unregister(&self, id: &Uuid) {
        if self.sessions.remove(id).is_some() {
            debug!("Session {id} unregistered");
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Replace the broadcast suppression rules (config reload).
    pub fn set_filters(&self, filters: Vec<Filter>) {
        *self.filters.write().unwrap_or_else(PoisonError::into_inner) = filters;
    }

    /// True when a configured `ignore` rule hides this entity entirely.
    pub fn is_ignored(&self, kind: &str, namespace: &str, name: &str) -> bool {
        self.filters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|f| f.is_ignore() && f.matches(kind, namespace, name))
    }

    fn suppressed(&self, update: &HealthUpdate) -> bool {
        self.filters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|f| f.matches(update.kind.as_str(), &update.namespace, &update.name))
    }

    /// Serialize the update once and enqueue it on every matching session.
    ///
    /// Never blocks: sessions whose queue is full (or whose receiver is gone)
    /// are evicted on the spot.
    pub fn broadcast(&self, update: &HealthUpdate) {
        if self.suppressed(update) {
            trace!(
                "Broadcast for {}/{} suppressed by filter",
                update.kind,
                update.name
            );
            return;
        }

        let msg = update.to_message();
        if msg.is_empty() {
            return;
        }

        let mut dead = Vec::new();
        for entry in self.sessions.iter() {
            if !session_matches(&entry.attributes, update) {
                continue;
            }
            match entry.tx.try_send(msg.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("Session {} is too slow; dropping it", entry.key());
                    dead.push(*entry.key());
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    dead.push(*entry.key());
                }
            }
        }

        for id in dead {
            self.sessions.remove(&id);
            debug!("Session {id} removed");
        }
    }
}

/// Every attribute the session requested must match the update: either the
/// session value is the wildcard, or it equals the update's field ignoring
/// case. An attribute the session did not set is no constraint.
fn session_matches(attributes: &HashMap<String, String>, update: &HealthUpdate) -> bool {
    attributes.iter().all(|(key, wanted)| {
        if wanted.eq_ignore_ascii_case(WILDCARD) {
            return true;
        }
        update
            .attribute(key)
            .is_some_and(|actual| wanted.eq_ignore_ascii_case(actual))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{EntityKind, HealthReport, TenantInfo, UpdateAction};

    fn update_for(kind: EntityKind, namespace: &str, name: &str) -> HealthUpdate {
        HealthUpdate {
            api_version: None,
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
            tenant: TenantInfo::platform(),
            action: UpdateAction::Update,
            report: HealthReport::new(),
            previous_report: None,
        }
    }

    fn attrs(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_kind_filtering() {
        let bus = Bus::new(Vec::new());
        let (_, mut deployments) = bus.register(attrs(&[("kind", "deployment")]));
        let (_, mut everything) = bus.register(attrs(&[("kind", "all")]));
        let (_, mut unfiltered) = bus.register(HashMap::new());

        bus.broadcast(&update_for(EntityKind::Pod, "ns", "web-0"));
        bus.broadcast(&update_for(EntityKind::Deployment, "ns", "web"));
        bus.broadcast(&update_for(EntityKind::Namespace, "", "ns"));

        // Kind-filtered session sees only the deployment.
        let msg = deployments.try_recv().unwrap();
        assert!(msg.contains("\"kind\":\"deployment\""));
        assert!(deployments.try_recv().is_err());

        // Wildcard and unfiltered sessions see all three.
        for rx in [&mut everything, &mut unfiltered] {
            for _ in 0..3 {
                rx.try_recv().unwrap();
            }
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn test_matching_is_case_insensitive() {
        let bus = Bus::new(Vec::new());
        let (_, mut rx) = bus.register(attrs(&[("Kind", "DePloyMent")]));

        bus.broadcast(&update_for(EntityKind::Deployment, "ns", "web"));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_all_requested_attributes_must_match() {
        let bus = Bus::new(Vec::new());
        let (_, mut rx) =
            bus.register(attrs(&[("kind", "pod"), ("namespace", "team-prod")]));

        bus.broadcast(&update_for(EntityKind::Pod, "other", "web-0"));
        assert!(rx.try_recv().is_err());

        bus.broadcast(&update_for(EntityKind::Pod, "team-prod", "web-0"));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_empty_update_field_rejects_constrained_session() {
        let bus = Bus::new(Vec::new());
        let (_, mut rx) = bus.register(attrs(&[("namespace", "team-prod")]));

        // Cluster-scoped update carries no namespace.
        bus.broadcast(&update_for(EntityKind::Node, "", "worker-1"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_unknown_attribute_keys_are_dropped() {
        let bus = Bus::new(Vec::new());
        let (_, mut rx) = bus.register(attrs(&[("phase", "Running")]));

        bus.broadcast(&update_for(EntityKind::Pod, "ns", "web-0"));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_fifo_per_session() {
        let bus = Bus::new(Vec::new());
        let (_, mut rx) = bus.register(HashMap::new());

        for name in ["a", "b", "c"] {
            bus.broadcast(&update_for(EntityKind::Pod, "ns", name));
        }

        let order: Vec<String> = (0..3).map(|_| rx.try_recv().unwrap()).collect();
        assert!(order[0].contains("\"name\":\"a\""));
        assert!(order[1].contains("\"name\":\"b\""));
        assert!(order[2].contains("\"name\":\"c\""));
    }

    #[test]
    fn test_slow_consumer_is_evicted_others_survive() {
        let bus = Bus::new(Vec::new());
        let (slow_id, slow_rx) = bus.register(HashMap::new());
        let (_, mut healthy_rx) = bus.register(HashMap::new());

        // Fill the slow session's queue without draining it, while the
        // healthy session keeps up.
        let mut received = 0;
        for i in 0..SESSION_QUEUE_DEPTH {
            bus.broadcast(&update_for(EntityKind::Pod, "ns", &format!("pod-{i}")));
            if healthy_rx.try_recv().is_ok() {
                received += 1;
            }
        }
        assert_eq!(bus.session_count(), 2);

        // The overflowing broadcast evicts the slow session.
        bus.broadcast(&update_for(EntityKind::Pod, "ns", "overflow"));
        assert_eq!(bus.session_count(), 1);
        assert!(!bus.sessions.contains_key(&slow_id));

        // The healthy consumer keeps receiving.
        while healthy_rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, SESSION_QUEUE_DEPTH + 1);

        drop(slow_rx);
    }

    #[test]
    fn test_closed_session_is_removed_on_broadcast() {
        let bus = Bus::new(Vec::new());
        let (_, rx) = bus.register(HashMap::new());
        drop(rx);

        bus.broadcast(&update_for(EntityKind::Pod, "ns", "web-0"));
        assert_eq!(bus.session_count(), 0);
    }

    #[test]
    fn test_config_filters_suppress_broadcast() {
        use crate::config::{Filter, FilterAction};

        let bus = Bus::new(vec![Filter {
            action: FilterAction::Mute,
            kind: "deployment".to_string(),
            namespace: String::new(),
            name: "noisy".to_string(),
        }]);
        let (_, mut rx) = bus.register(HashMap::new());

        bus.broadcast(&update_for(EntityKind::Deployment, "ns", "noisy"));
        assert!(rx.try_recv().is_err());

        bus.broadcast(&update_for(EntityKind::Deployment, "ns", "quiet"));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_is_ignored_only_for_ignore_filters() {
        use crate::config::{Filter, FilterAction};

        let bus = Bus::new(vec![
            Filter {
                action: FilterAction::Ignore,
                kind: "pod".to_string(),
                namespace: String::new(),
                name: "hidden".to_string(),
            },
            Filter {
                action: FilterAction::Mute,
                kind: "pod".to_string(),
                namespace: String::new(),
                name: "muted".to_string(),
            },
        ]);

        assert!(bus.is_ignored("pod", "ns", "hidden"));
        assert!(!bus.is_ignored("pod", "ns", "muted"));
    }
}
