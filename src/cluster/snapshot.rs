//! Immutable snapshots of remote objects.
//!
//! The aggregator works over a closed set of kinds, so raw objects are carried
//! as a tagged enum rather than trait objects. Snapshots are cheap to clone
//! and share the underlying object via `Arc`.

use std::sync::Arc;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Namespace, Node, Pod, Service};

use super::backup::{Backup, Schedule};
use crate::health::EntityKind;

/// One observed remote object.
#[derive(Debug, Clone)]
pub enum Snapshot {
    Node(Arc<Node>),
    Namespace(Arc<Namespace>),
    DaemonSet(Arc<DaemonSet>),
    Deployment(Arc<Deployment>),
    StatefulSet(Arc<StatefulSet>),
    Pod(Arc<Pod>),
    Service(Arc<Service>),
    BackupSchedule(Arc<Schedule>),
    BackupRun(Arc<Backup>),
}

impl Snapshot {
    pub fn kind(&self) -> EntityKind {
        match self {
            Snapshot::Node(_) => EntityKind::Node,
            Snapshot::Namespace(_) => EntityKind::Namespace,
            Snapshot::DaemonSet(_) => EntityKind::DaemonSet,
            Snapshot::Deployment(_) => EntityKind::Deployment,
            Snapshot::StatefulSet(_) => EntityKind::StatefulSet,
            Snapshot::Pod(_) => EntityKind::Pod,
            Snapshot::Service(_) => EntityKind::Service,
            Snapshot::BackupSchedule(_) => EntityKind::BackupSchedule,
            Snapshot::BackupRun(_) => EntityKind::BackupRun,
        }
    }

    pub fn name(&self) -> String {
        self.meta().name.clone().unwrap_or_default()
    }

    /// Empty for cluster-scoped kinds.
    pub fn namespace(&self) -> String {
        self.meta().namespace.clone().unwrap_or_default()
    }

    pub fn api_version(&self) -> &'static str {
        match self {
            Snapshot::Node(_) | Snapshot::Namespace(_) | Snapshot::Pod(_) | Snapshot::Service(_) => {
                "v1"
            }
            Snapshot::DaemonSet(_) | Snapshot::Deployment(_) | Snapshot::StatefulSet(_) => {
                "apps/v1"
            }
            Snapshot::BackupSchedule(_) | Snapshot::BackupRun(_) => "velero.io/v1",
        }
    }

    fn meta(&self) -> &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
        match self {
            Snapshot::Node(o) => &o.metadata,
            Snapshot::Namespace(o) => &o.metadata,
            Snapshot::DaemonSet(o) => &o.metadata,
            Snapshot::Deployment(o) => &o.metadata,
            Snapshot::StatefulSet(o) => &o.metadata,
            Snapshot::Pod(o) => &o.metadata,
            Snapshot::Service(o) => &o.metadata,
            Snapshot::BackupSchedule(o) => &o.metadata,
            Snapshot::BackupRun(o) => &o.metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    #[test]
    fn test_snapshot_identity() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("web-0".to_string()),
                namespace: Some("app-dev".to_string()),
                ..ObjectMeta::default()
            },
            ..Pod::default()
        };

        let snapshot = Snapshot::Pod(Arc::new(pod));
        assert_eq!(snapshot.kind(), EntityKind::Pod);
        assert_eq!(snapshot.name(), "web-0");
        assert_eq!(snapshot.namespace(), "app-dev");
        assert_eq!(snapshot.api_version(), "v1");
    }

    #[test]
    fn test_cluster_scoped_namespace_is_empty() {
        let node = Node {
            metadata: ObjectMeta {
                name: Some("worker-1".to_string()),
                ..ObjectMeta::default()
            },
            ..Node::default()
        };

        let snapshot = Snapshot::Node(Arc::new(node));
        assert_eq!(snapshot.namespace(), "");
    }
}
