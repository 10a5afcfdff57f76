//! Response models assembled from cache snapshots.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cluster::evaluate::{
    evaluate_daemon_set, evaluate_deployment, evaluate_node, evaluate_pod, evaluate_service,
    evaluate_stateful_set,
};
use crate::cluster::{evaluate_namespace, AddonSet, ClusterCache};
use crate::health::{EntityKind, EnvironmentSet, HealthReport, HealthStatus, TenantInfo};
use crate::probe::ProbeResult;

/// A workload (controller or pod) with its evaluated health.
#[derive(Debug, Clone, Serialize)]
pub struct WorkloadView {
    pub kind: EntityKind,
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    pub tenant: TenantInfo,
    pub health: HealthReport,
}

impl WorkloadView {
    fn new(
        environments: &EnvironmentSet,
        kind: EntityKind,
        name: Option<&String>,
        namespace: Option<&String>,
        health: HealthReport,
    ) -> Self {
        let namespace = namespace.cloned().unwrap_or_default();
        Self {
            kind,
            name: name.cloned().unwrap_or_default(),
            tenant: environments.parse(&namespace),
            namespace,
            health,
        }
    }

    pub fn is_unhealthy(&self) -> bool {
        self.health.status == HealthStatus::Unhealthy
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeView {
    pub name: String,
    pub health: HealthReport,
}

/// A namespace with its rolled-up health.
#[derive(Debug, Clone, Serialize)]
pub struct NamespaceHealth {
    pub name: String,
    pub tenant: TenantInfo,
    pub health: HealthReport,
}

/// A namespace and everything it contains.
#[derive(Debug, Clone, Serialize)]
pub struct NamespaceDetail {
    pub name: String,
    pub tenant: TenantInfo,
    pub health: HealthReport,
    pub daemonsets: Vec<WorkloadView>,
    pub deployments: Vec<WorkloadView>,
    pub statefulsets: Vec<WorkloadView>,
    pub services: Vec<WorkloadView>,
    pub pods: Vec<WorkloadView>,
}

/// A backup resource with its evaluated health.
#[derive(Debug, Clone, Serialize)]
pub struct BackupView {
    pub name: String,
    pub namespace: String,
    pub tenant: TenantInfo,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub phase: String,
    pub health: HealthReport,
}

/// The synthesized cluster report: all nodes, unhealthy workloads only, and
/// current URL probe results.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub date: DateTime<Utc>,
    pub errors: Vec<String>,
    pub nodes: Vec<NodeView>,
    pub unhealthy_daemonsets: Vec<WorkloadView>,
    pub unhealthy_deployments: Vec<WorkloadView>,
    pub unhealthy_pods: Vec<WorkloadView>,
    pub unhealthy_statefulsets: Vec<WorkloadView>,
    pub urlchecks: Vec<ProbeResult>,
}

pub fn node_views(cache: &ClusterCache) -> Vec<NodeView> {
    cache
        .nodes
        .list_all()
        .iter()
        .map(|node| NodeView {
            name: node.metadata.name.clone().unwrap_or_default(),
            health: evaluate_node(node),
        })
        .collect()
}

pub fn pod_views(
    cache: &ClusterCache,
    environments: &EnvironmentSet,
    namespace: Option<&str>,
) -> Vec<WorkloadView> {
    let pods = match namespace {
        Some(ns) => cache.pods.list_namespace(ns),
        None => cache.pods.list_all(),
    };
    pods.iter()
        .map(|pod| {
            WorkloadView::new(
                environments,
                EntityKind::Pod,
                pod.metadata.name.as_ref(),
                pod.metadata.namespace.as_ref(),
                evaluate_pod(pod),
            )
        })
        .collect()
}

pub fn daemon_set_views(
    cache: &ClusterCache,
    environments: &EnvironmentSet,
    namespace: Option<&str>,
) -> Vec<WorkloadView> {
    let items = match namespace {
        Some(ns) => cache.daemon_sets.list_namespace(ns),
        None => cache.daemon_sets.list_all(),
    };
    items
        .iter()
        .map(|ds| {
            WorkloadView::new(
                environments,
                EntityKind::DaemonSet,
                ds.metadata.name.as_ref(),
                ds.metadata.namespace.as_ref(),
                evaluate_daemon_set(ds),
            )
        })
        .collect()
}

pub fn deployment_views(
    cache: &ClusterCache,
    environments: &EnvironmentSet,
    namespace: Option<&str>,
) -> Vec<WorkloadView> {
    let items = match namespace {
        Some(ns) => cache.deployments.list_namespace(ns),
        None => cache.deployments.list_all(),
    };
    items
        .iter()
        .map(|deployment| {
            WorkloadView::new(
                environments,
                EntityKind::Deployment,
                deployment.metadata.name.as_ref(),
                deployment.metadata.namespace.as_ref(),
                evaluate_deployment(deployment),
            )
        })
        .collect()
}

pub fn stateful_set_views(
    cache: &ClusterCache,
    environments: &EnvironmentSet,
    namespace: Option<&str>,
) -> Vec<WorkloadView> {
    let items = match namespace {
        Some(ns) => cache.stateful_sets.list_namespace(ns),
        None => cache.stateful_sets.list_all(),
    };
    items
        .iter()
        .map(|ss| {
            WorkloadView::new(
                environments,
                EntityKind::StatefulSet,
                ss.metadata.name.as_ref(),
                ss.metadata.namespace.as_ref(),
                evaluate_stateful_set(ss),
            )
        })
        .collect()
}

pub fn service_views(
    cache: &ClusterCache,
    environments: &EnvironmentSet,
    namespace: &str,
) -> Vec<WorkloadView> {
    cache
        .services
        .list_namespace(namespace)
        .iter()
        .map(|service| {
            let selector = service
                .spec
                .as_ref()
                .and_then(|s| s.selector.clone())
                .unwrap_or_default();
            let pod_reports: Vec<HealthReport> = cache
                .pods_matching(namespace, &selector)
                .iter()
                .map(|pod| evaluate_pod(pod))
                .collect();
            WorkloadView::new(
                environments,
                EntityKind::Service,
                service.metadata.name.as_ref(),
                service.metadata.namespace.as_ref(),
                evaluate_service(service, &pod_reports),
            )
        })
        .collect()
}

pub fn namespace_health_views(
    cache: &ClusterCache,
    addons: &AddonSet,
    environments: &EnvironmentSet,
) -> Vec<NamespaceHealth> {
    cache
        .namespaces
        .list_all()
        .iter()
        .filter_map(|ns| ns.metadata.name.clone())
        .map(|name| NamespaceHealth {
            tenant: environments.parse(&name),
            health: evaluate_namespace(cache, addons, &name),
            name,
        })
        .collect()
}

pub fn namespace_detail(
    cache: &ClusterCache,
    addons: &AddonSet,
    environments: &EnvironmentSet,
    name: &str,
) -> Option<NamespaceDetail> {
    cache.namespaces.get("", name)?;

    Some(NamespaceDetail {
        name: name.to_string(),
        tenant: environments.parse(name),
        health: evaluate_namespace(cache, addons, name),
        daemonsets: daemon_set_views(cache, environments, Some(name)),
        deployments: deployment_views(cache, environments, Some(name)),
        statefulsets: stateful_set_views(cache, environments, Some(name)),
        services: service_views(cache, environments, name),
        pods: pod_views(cache, environments, Some(name)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Namespace, Pod, PodCondition, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::sync::Arc;

    fn seeded_cache() -> ClusterCache {
        let cache = ClusterCache::new(false);
        cache.namespaces.apply(Arc::new(Namespace {
            metadata: ObjectMeta {
                name: Some("app-dev".to_string()),
                ..ObjectMeta::default()
            },
            ..Namespace::default()
        }));
        cache.pods.apply(Arc::new(Pod {
            metadata: ObjectMeta {
                name: Some("web-0".to_string()),
                namespace: Some("app-dev".to_string()),
                ..ObjectMeta::default()
            },
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                conditions: Some(vec![PodCondition {
                    type_: "Ready".to_string(),
                    status: "True".to_string(),
                    ..PodCondition::default()
                }]),
                ..PodStatus::default()
            }),
            ..Pod::default()
        }));
        cache
    }

    #[test]
    fn test_namespace_detail_for_known_namespace() {
        let cache = seeded_cache();
        let detail = namespace_detail(
            &cache,
            &AddonSet::default(),
            &EnvironmentSet::default(),
            "app-dev",
        )
        .unwrap();

        assert_eq!(detail.tenant.name, "app");
        assert_eq!(detail.tenant.environment, "dev");
        assert_eq!(detail.pods.len(), 1);
        assert_eq!(detail.health.status, HealthStatus::Healthy);
    }

    #[test]
    fn test_namespace_detail_for_unknown_namespace() {
        let cache = ClusterCache::new(false);
        assert!(namespace_detail(
            &cache,
            &AddonSet::default(),
            &EnvironmentSet::default(),
            "ghost"
        )
        .is_none());
    }

    #[test]
    fn test_pod_view_carries_tenant() {
        let cache = seeded_cache();
        let views = pod_views(&cache, &EnvironmentSet::default(), None);
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].tenant.environment, "dev");
        assert!(!views[0].is_unhealthy());
    }
}
