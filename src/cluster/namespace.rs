//! Namespace-level health aggregation.
//!
//! A namespace report folds the reports of the workloads it contains:
//! controllers, services, and pods nobody owns (pods under a controller are
//! accounted for by that controller). The evaluator queries the cache on
//! demand rather than holding references to children, so there is no cycle
//! between a namespace and its contents.

use chrono::Utc;

use super::addons::{AddonSet, ADDON_BACKUP};
use super::cache::ClusterCache;
use super::evaluate::{
    evaluate_backup_run, evaluate_daemon_set, evaluate_deployment, evaluate_pod,
    evaluate_service, evaluate_stateful_set,
};
use crate::health::{HealthReport, HealthStatus};

const BACKUP_STALE_AFTER_HOURS: i64 = 24;

/// Compute the rolled-up report for one namespace from the current cache
/// contents.
pub fn evaluate_namespace(cache: &ClusterCache, addons: &AddonSet, name: &str) -> HealthReport {
    let mut report = HealthReport::new();

    for daemon_set in cache.daemon_sets.list_namespace(name) {
        let child = evaluate_daemon_set(&daemon_set);
        report.fold_in(&child, &child_prefix("DaemonSet", &daemon_set.metadata.name));
    }

    for deployment in cache.deployments.list_namespace(name) {
        let child = evaluate_deployment(&deployment);
        report.fold_in(&child, &child_prefix("Deployment", &deployment.metadata.name));
    }

    for stateful_set in cache.stateful_sets.list_namespace(name) {
        let child = evaluate_stateful_set(&stateful_set);
        report.fold_in(&child, &child_prefix("StatefulSet", &stateful_set.metadata.name));
    }

    for service in cache.services.list_namespace(name) {
        let selector = service
            .spec
            .as_ref()
            .and_then(|s| s.selector.clone())
            .unwrap_or_default();
        let pod_reports: Vec<HealthReport> = cache
            .pods_matching(name, &selector)
            .iter()
            .map(|pod| evaluate_pod(pod))
            .collect();
        let child = evaluate_service(&service, &pod_reports);
        report.fold_in(&child, &child_prefix("Service", &service.metadata.name));
    }

    for pod in cache.orphan_pods(name) {
        let child = evaluate_pod(&pod);
        report.fold_in(&child, &child_prefix("Pod", &pod.metadata.name));
    }

    if addons.has(ADDON_BACKUP) {
        check_backup_health(cache, name, &mut report);
    }

    report.fail_healthy();
    report
}

fn child_prefix(kind: &str, name: &Option<String>) -> String {
    format!("{kind}[{}]", name.as_deref().unwrap_or_default())
}

/// Backup coverage rules, applied only when the backup extension exists.
fn check_backup_health(cache: &ClusterCache, namespace: &str, report: &mut HealthReport) {
    let schedules = cache.schedules_covering(namespace);
    if schedules.is_empty() {
        report.add_warning("There are no backup schedules that include this namespace.");
    }

    let backups = cache.backups_covering(namespace);
    let most_recent = backups
        .iter()
        .filter_map(|backup| backup.completion_time().map(|at| (at, backup)))
        .max_by_key(|(at, _)| *at);

    match most_recent {
        None => {
            report.add_warning("There are no recent backups for this namespace.");
        }
        Some((completed_at, backup)) => {
            let age_hours = (Utc::now() - completed_at).num_hours();
            if age_hours > BACKUP_STALE_AFTER_HOURS {
                let days = age_hours / 24;
                report.add_warning(format!("The most recent backup is [{days}] days old."));
            } else {
                let child = evaluate_backup_run(backup);
                if child.status != HealthStatus::Healthy {
                    report.add_warning(format!(
                        "The most recent backup is in phase [{}].",
                        backup.phase()
                    ));
                }
            }
        }
    }
}
