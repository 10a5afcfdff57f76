//! Per-kind health evaluators.
//!
//! Each evaluator is a pure function from one object snapshot to a
//! [`HealthReport`]: start `Unknown`, apply the rules for the kind, then
//! resolve any remaining `Unknown` with `fail_healthy`. Evaluators never
//! panic and may run concurrently.

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Node, Pod, Service};

use super::addons::AddonSet;
use super::backup::{
    Backup, Schedule, PHASE_COMPLETED, PHASE_FAILED, PHASE_FAILED_VALIDATION,
    PHASE_PARTIALLY_FAILED,
};
use super::cache::ClusterCache;
use super::namespace::evaluate_namespace;
use super::snapshot::Snapshot;
use crate::health::{HealthReport, HealthStatus};

/// Dispatch one snapshot to the evaluator for its kind.
///
/// Services and namespaces read their children through the cache; every
/// other kind is judged from the snapshot alone.
pub fn evaluate_snapshot(
    cache: &ClusterCache,
    addons: &AddonSet,
    snapshot: &Snapshot,
) -> HealthReport {
    match snapshot {
        Snapshot::Node(node) => evaluate_node(node),
        Snapshot::Pod(pod) => evaluate_pod(pod),
        Snapshot::DaemonSet(daemon_set) => evaluate_daemon_set(daemon_set),
        Snapshot::Deployment(deployment) => evaluate_deployment(deployment),
        Snapshot::StatefulSet(stateful_set) => evaluate_stateful_set(stateful_set),
        Snapshot::Service(service) => {
            let namespace = snapshot.namespace();
            let selector = service
                .spec
                .as_ref()
                .and_then(|s| s.selector.clone())
                .unwrap_or_default();
            let pod_reports: Vec<HealthReport> = cache
                .pods_matching(&namespace, &selector)
                .iter()
                .map(|pod| evaluate_pod(pod))
                .collect();
            evaluate_service(service, &pod_reports)
        }
        Snapshot::Namespace(_) => evaluate_namespace(cache, addons, &snapshot.name()),
        Snapshot::BackupRun(backup) => evaluate_backup_run(backup),
        Snapshot::BackupSchedule(schedule) => evaluate_backup_schedule(schedule),
    }
}

/// Pods carrying this label are CI build agents and never count against
/// their namespace.
const JENKINS_LABEL: (&str, &str) = ("jenkins", "slave");

pub fn evaluate_node(node: &Node) -> HealthReport {
    let mut report = HealthReport::new();

    let conditions = node
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_deref())
        .unwrap_or_default();

    for condition in conditions {
        let healthy = if condition.type_ == "Ready" {
            condition.status == "True"
        } else {
            // Pressure and availability conditions signal trouble when True.
            condition.status == "False"
        };

        if !healthy {
            let msg = condition.message.clone().unwrap_or_else(|| {
                format!("Node condition [{}] is [{}].", condition.type_, condition.status)
            });
            report.add_error(msg);
        }
    }

    report.fail_healthy();
    report
}

pub fn evaluate_pod(pod: &Pod) -> HealthReport {
    // Job pods run to completion and are judged by their Job; build agent
    // pods are transient.
    let owned_by_job = pod
        .metadata
        .owner_references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .any(|owner| owner.kind == "Job");

    let is_build_agent = pod
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(JENKINS_LABEL.0))
        .is_some_and(|value| value == JENKINS_LABEL.1);

    if owned_by_job || is_build_agent {
        return HealthReport::ignored();
    }

    let mut report = HealthReport::new();

    let status = pod.status.as_ref();
    let phase = status.and_then(|s| s.phase.as_deref()).unwrap_or("");

    if phase != "Succeeded" {
        let conditions = status.and_then(|s| s.conditions.as_deref()).unwrap_or_default();
        for condition in conditions {
            if condition.type_ == "Ready" && condition.status == "False" {
                let msg = condition
                    .message
                    .clone()
                    .unwrap_or_else(|| "Pod condition [Ready] is [False].".to_string());
                report.add_error(msg);
            }
        }
    }

    report.fail_healthy();
    report
}

pub fn evaluate_daemon_set(daemon_set: &DaemonSet) -> HealthReport {
    let mut report = HealthReport::new();

    if let Some(status) = daemon_set.status.as_ref() {
        let desired = status.desired_number_scheduled;
        let ready = status.number_ready;
        if desired != ready {
            let msg = format!(
                "The number of desired pods [{desired}] does not match the number of ready pods [{ready}]."
            );
            if ready == 0 {
                report.add_error(msg);
            } else {
                report.add_warning(msg);
            }
        }
    }

    report.fail_healthy();
    report
}

pub fn evaluate_deployment(deployment: &Deployment) -> HealthReport {
    let mut report = HealthReport::new();

    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let status = deployment.status.as_ref();
    let ready = status.and_then(|s| s.ready_replicas).unwrap_or(0);

    let conditions = status.and_then(|s| s.conditions.as_deref()).unwrap_or_default();
    for condition in conditions {
        if condition.type_ == "Available" && condition.status == "False" {
            let msg = format!(
                "The number of desired replicas [{desired}] does not match the number of ready replicas [{ready}]."
            );
            if ready == 0 {
                report.add_error(msg);
            } else {
                report.add_warning(msg);
            }
        }
    }

    report.fail_healthy();
    report
}

pub fn evaluate_stateful_set(stateful_set: &StatefulSet) -> HealthReport {
    let mut report = HealthReport::new();

    let desired = stateful_set
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let ready = stateful_set
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);

    if desired != ready {
        let msg = format!(
            "The number of desired replicas [{desired}] does not match the number of ready replicas [{ready}]."
        );
        if ready == 0 {
            report.add_error(msg);
        } else {
            report.add_warning(msg);
        }
    }

    report.fail_healthy();
    report
}

/// A service is judged by the pods its selector matches; the caller supplies
/// their already-evaluated reports.
pub fn evaluate_service(_service: &Service, pod_reports: &[HealthReport]) -> HealthReport {
    let mut report = HealthReport::new();

    let total = pod_reports.len();
    let healthy = pod_reports
        .iter()
        .filter(|r| r.status == HealthStatus::Healthy)
        .count();

    if total != healthy {
        if healthy == 0 {
            report.add_error("There are no ready pods handling request");
        } else {
            report.add_warning(format!(
                "There are {} pods matching selector but not ready.",
                total - healthy
            ));
        }
    }

    report.fail_healthy();
    report
}

pub fn evaluate_backup_run(backup: &Backup) -> HealthReport {
    let mut report = HealthReport::new();

    match backup.phase() {
        PHASE_COMPLETED => report.status = HealthStatus::Healthy,
        phase @ (PHASE_FAILED | PHASE_FAILED_VALIDATION) => {
            report.add_error(format!("Backup failed in state: {phase}"));
        }
        PHASE_PARTIALLY_FAILED => {
            report.add_warning("Backup partially failed. See logs for details.");
        }
        // New, InProgress, Deleting: nothing to judge yet.
        _ => {}
    }

    report
}

pub fn evaluate_backup_schedule(schedule: &Schedule) -> HealthReport {
    let mut report = HealthReport::new();

    if schedule.phase() == PHASE_FAILED_VALIDATION {
        report.add_error("failed validation phase");
    }

    report.fail_healthy();
    report
}
